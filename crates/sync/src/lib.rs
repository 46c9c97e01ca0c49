//! DAG transfer over framed byte streams: the upload and download state
//! machines with stop-and-wait packet acknowledgement, the query
//! protocol, and the per-root mutex registry. This is the only path by
//! which untrusted bytes reach the DAG store, so every packet is
//! verified as it arrives and the assembled DAG is verified end to end
//! before anything persists.

use core::time::Duration;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use thiserror::Error;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use nectar_dagstore::DagStoreError;
use nectar_merkle::MerkleError;

mod download;
mod locks;
mod query;
mod upload;
pub mod wire;

pub use download::{fetch_dag, serve_download, DownloadOutcome};
pub use locks::{RootGuard, RootLocks};
pub use query::{query_remote, serve_query};
pub use upload::{send_dag, serve_upload, UploadOutcome};
pub use wire::{
    Ack, CodecError, DownloadRequest, DownloadSelector, Frame, FrameCodec, QueryFilter,
    SyncMessage, MAX_FRAME_SIZE,
};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("invalid: {0}")]
    Protocol(String),

    #[error("restricted: {0}")]
    Unauthorized(String),

    #[error("busy: root {0} has a transfer in flight")]
    Busy(String),

    #[error("duplicate: root {0} is already stored")]
    Duplicate(String),

    #[error("timed out waiting for the peer")]
    Timeout,

    #[error("cancelled")]
    Cancelled,

    #[error("peer closed the stream")]
    PeerClosed,

    #[error("peer reported: {0}")]
    Rejected(String),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Merkle(#[from] MerkleError),

    #[error(transparent)]
    Store(#[from] DagStoreError),
}

/// Read timeouts for both state machines; the handshake is short, data
/// packets get longer.
#[derive(Copy, Clone, Debug)]
pub struct SyncConfig {
    pub handshake_timeout: Duration,
    pub read_timeout: Duration,
    /// Reject a second uploader on a busy root instead of queueing it.
    pub reject_busy: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(30),
            reject_busy: false,
        }
    }
}

/// The framed byte stream both state machines run over.
pub trait SyncStream:
    Stream<Item = Result<Frame, CodecError>> + Sink<Frame, Error = CodecError> + Unpin + Send
{
}

impl<T> SyncStream for T where
    T: Stream<Item = Result<Frame, CodecError>> + Sink<Frame, Error = CodecError> + Unpin + Send
{
}

pub(crate) async fn recv<S: SyncStream>(
    stream: &mut S,
    wait: Duration,
    cancel: &CancellationToken,
) -> Result<SyncMessage, SyncError> {
    let frame = tokio::select! {
        () = cancel.cancelled() => return Err(SyncError::Cancelled),
        next = timeout(wait, stream.next()) => match next {
            Err(_elapsed) => return Err(SyncError::Timeout),
            Ok(None) => return Err(SyncError::PeerClosed),
            Ok(Some(Err(err))) => return Err(SyncError::Codec(err)),
            Ok(Some(Ok(frame))) => frame,
        },
    };

    SyncMessage::from_frame(&frame)
}

pub(crate) async fn send<S: SyncStream>(
    stream: &mut S,
    message: &SyncMessage,
) -> Result<(), SyncError> {
    stream.send(message.to_frame()?).await.map_err(SyncError::Codec)
}

/// Best-effort error frame before tearing a stream down.
pub(crate) async fn send_error<S: SyncStream>(stream: &mut S, error: &SyncError) {
    let message = SyncMessage::Error {
        reason: error.to_string(),
    };

    if let Ok(frame) = message.to_frame() {
        let _unsent = stream.send(frame).await;
    }
}
