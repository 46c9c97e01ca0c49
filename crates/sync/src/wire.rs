use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tokio_util::codec::{Decoder, Encoder};

use nectar_merkle::TransmissionPacket;
use nectar_primitives::Pubkey;

use crate::SyncError;

/// Upper bound on a single wire frame.
pub const MAX_FRAME_SIZE: usize = 8 * 1024 * 1024;

const LEN_PREFIX: usize = 4;

/// One length-prefixed frame of opaque bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub data: Bytes,
}

impl Frame {
    #[must_use]
    pub fn new(data: Vec<u8>) -> Self {
        Self { data: data.into() }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("frame of {got} bytes exceeds the {max} byte limit")]
    TooLarge { got: usize, max: usize },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// `u32` big-endian length prefix framing.
#[derive(Copy, Clone, Debug)]
pub struct FrameCodec {
    max_frame_size: usize,
}

impl FrameCodec {
    #[must_use]
    pub fn new(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(MAX_FRAME_SIZE)
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, CodecError> {
        if src.len() < LEN_PREFIX {
            return Ok(None);
        }

        let mut len_bytes = [0_u8; LEN_PREFIX];
        len_bytes.copy_from_slice(&src[..LEN_PREFIX]);
        let len = u32::from_be_bytes(len_bytes) as usize;

        if len > self.max_frame_size {
            return Err(CodecError::TooLarge {
                got: len,
                max: self.max_frame_size,
            });
        }

        if src.len() < LEN_PREFIX + len {
            src.reserve(LEN_PREFIX + len - src.len());
            return Ok(None);
        }

        src.advance(LEN_PREFIX);
        let data = src.split_to(len).freeze();

        Ok(Some(Frame { data }))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = CodecError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), CodecError> {
        let len = frame.data.len();

        if len > self.max_frame_size {
            return Err(CodecError::TooLarge {
                got: len,
                max: self.max_frame_size,
            });
        }

        dst.reserve(LEN_PREFIX + len);
        dst.put_u32(u32::try_from(len).map_err(|_| CodecError::TooLarge {
            got: len,
            max: self.max_frame_size,
        })?);
        dst.extend_from_slice(&frame.data);

        Ok(())
    }
}

/// Acknowledgement for one packet; `final_ack` closes an upload after
/// the whole DAG verified and persisted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    #[serde(rename = "Hash")]
    pub hash: String,

    #[serde(rename = "Final", default)]
    pub final_ack: bool,
}

/// Query over stored roots: any criterion matching includes the root.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryFilter {
    #[serde(rename = "Pubkeys", default, skip_serializing_if = "Vec::is_empty")]
    pub pubkeys: Vec<Pubkey>,

    #[serde(rename = "Hashes", default, skip_serializing_if = "Vec::is_empty")]
    pub hashes: Vec<String>,

    #[serde(rename = "Labels", default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<u64>,
}

/// What part of a DAG a download wants.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DownloadSelector {
    #[serde(rename = "Hashes")]
    Hashes(Vec<String>),

    #[serde(rename = "Range")]
    Range { from: u64, to: u64 },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadRequest {
    #[serde(rename = "Root")]
    pub root: String,

    #[serde(rename = "IncludeContent", default)]
    pub include_content: bool,

    #[serde(rename = "Selector", default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<DownloadSelector>,
}

/// Everything that travels inside a frame on the sync protocols.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum SyncMessage {
    Packet(TransmissionPacket),
    Ack(Ack),
    Query(QueryFilter),
    QueryResponse { hashes: Vec<String> },
    Download(DownloadRequest),
    Error { reason: String },
}

impl SyncMessage {
    pub fn to_frame(&self) -> Result<Frame, SyncError> {
        let data = serde_cbor::to_vec(self).map_err(|e| SyncError::Protocol(e.to_string()))?;
        Ok(Frame::new(data))
    }

    pub fn from_frame(frame: &Frame) -> Result<Self, SyncError> {
        serde_cbor::from_slice(&frame.data).map_err(|e| SyncError::Protocol(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use futures_util::StreamExt;
    use tokio_test::io::Builder;
    use tokio_util::codec::FramedRead;

    use super::*;

    #[test]
    fn frame_encode_decode_roundtrip() {
        let first = Frame::new(b"Hello".to_vec());
        let second = Frame::new(b"World".to_vec());

        let mut buffer = BytesMut::new();
        let mut codec = FrameCodec::default();
        codec.encode(first.clone(), &mut buffer).expect("encode");
        codec.encode(second.clone(), &mut buffer).expect("encode");

        assert_eq!(codec.decode(&mut buffer).expect("decode"), Some(first));
        assert_eq!(codec.decode(&mut buffer).expect("decode"), Some(second));
        assert_eq!(codec.decode(&mut buffer).expect("decode"), None);
    }

    #[test]
    fn partial_input_waits_for_more() {
        let mut buffer = BytesMut::new();
        let mut codec = FrameCodec::default();
        codec
            .encode(Frame::new(vec![7; 100]), &mut buffer)
            .expect("encode");

        let mut partial = buffer.split_to(50);
        assert_eq!(codec.decode(&mut partial).expect("decode"), None);

        partial.unsplit(buffer);
        assert!(codec.decode(&mut partial).expect("decode").is_some());
    }

    #[test]
    fn oversize_frames_are_rejected_both_ways() {
        let mut codec = FrameCodec::new(16);
        let mut buffer = BytesMut::new();

        assert!(matches!(
            codec.encode(Frame::new(vec![0; 17]), &mut buffer),
            Err(CodecError::TooLarge { .. })
        ));

        let mut bogus = BytesMut::new();
        bogus.put_u32(1_000);
        bogus.extend_from_slice(&[0; 8]);
        assert!(matches!(
            codec.decode(&mut bogus),
            Err(CodecError::TooLarge { .. })
        ));
    }

    #[tokio::test]
    async fn framed_stream_yields_messages() {
        let message = SyncMessage::Ack(Ack {
            hash: "broot".to_owned(),
            final_ack: true,
        });

        let mut buffer = BytesMut::new();
        let mut codec = FrameCodec::default();
        codec
            .encode(message.to_frame().expect("frame"), &mut buffer)
            .expect("encode");

        let mut io = Builder::new().read(&buffer.freeze()).build();
        let mut framed = FramedRead::new(&mut io, FrameCodec::default());

        let frame = framed.next().await.expect("frame").expect("ok");
        assert_eq!(SyncMessage::from_frame(&frame).expect("decode"), message);

        assert!(framed.next().await.is_none());
    }
}
