use tokio_util::sync::CancellationToken;
use tracing::debug;

use nectar_dagstore::DagStore;
use nectar_merkle::Dag;

use crate::wire::{Ack, DownloadRequest, DownloadSelector, SyncMessage};
use crate::{recv, send, send_error, SyncConfig, SyncError, SyncStream};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DownloadOutcome {
    pub root: String,
    pub packets: usize,
}

/// Server side of a download stream: dual shape of the upload machine.
/// The server drives packet by packet in deterministic traversal order;
/// the client acks each one. The first packet bears the stored ownership
/// claim, the last sets `final`.
pub async fn serve_download<S: SyncStream>(
    stream: &mut S,
    store: &DagStore,
    config: &SyncConfig,
    cancel: &CancellationToken,
) -> Result<DownloadOutcome, SyncError> {
    match drive(stream, store, config, cancel).await {
        Ok(outcome) => Ok(outcome),
        Err(err) => {
            if !matches!(err, SyncError::PeerClosed | SyncError::Cancelled) {
                send_error(stream, &err).await;
            }
            Err(err)
        }
    }
}

async fn drive<S: SyncStream>(
    stream: &mut S,
    store: &DagStore,
    config: &SyncConfig,
    cancel: &CancellationToken,
) -> Result<DownloadOutcome, SyncError> {
    let SyncMessage::Download(request) = recv(stream, config.handshake_timeout, cancel).await?
    else {
        return Err(SyncError::Protocol(
            "expected a download request".to_owned(),
        ));
    };

    let dag = match &request.selector {
        None => store.build_dag(&request.root, request.include_content)?,
        Some(DownloadSelector::Hashes(hashes)) => {
            store.build_partial_dag(&request.root, hashes, request.include_content)?
        }
        Some(DownloadSelector::Range { from, to }) => {
            store.build_partial_dag_by_range(&request.root, *from, *to, request.include_content)?
        }
    };

    let packets = dag.to_packets(request.include_content)?;

    for packet in &packets {
        send(stream, &SyncMessage::Packet(packet.clone())).await?;

        let SyncMessage::Ack(ack) = recv(stream, config.read_timeout, cancel).await? else {
            return Err(SyncError::Protocol("expected an ack".to_owned()));
        };

        if ack.hash != packet.leaf.hash {
            return Err(SyncError::Protocol(format!(
                "ack for {} while sending {}",
                ack.hash, packet.leaf.hash
            )));
        }
    }

    debug!(root = %dag.root, packets = packets.len(), "download complete");

    Ok(DownloadOutcome {
        root: dag.root,
        packets: packets.len(),
    })
}

/// Client side: request a DAG (full, by hash set, or by label range),
/// apply and verify packets as they arrive, ack each, and verify the
/// assembled result end to end.
pub async fn fetch_dag<S: SyncStream>(
    stream: &mut S,
    request: DownloadRequest,
    config: &SyncConfig,
) -> Result<Dag, SyncError> {
    let cancel = CancellationToken::new();

    send(stream, &SyncMessage::Download(request)).await?;

    let mut dag = Dag::receiver();

    loop {
        match recv(stream, config.read_timeout, &cancel).await? {
            SyncMessage::Packet(packet) => {
                dag.apply_and_verify_packet(&packet)?;

                send(
                    stream,
                    &SyncMessage::Ack(Ack {
                        hash: packet.leaf.hash.clone(),
                        final_ack: packet.final_packet,
                    }),
                )
                .await?;

                if packet.final_packet {
                    break;
                }
            }
            SyncMessage::Error { reason } => return Err(SyncError::Rejected(reason)),
            _ => return Err(SyncError::Protocol("expected a packet".to_owned())),
        }
    }

    dag.verify()?;

    Ok(dag)
}
