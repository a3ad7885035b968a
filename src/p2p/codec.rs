//! Frame encoding for the control plane.
//!
//! The reference format is a 4-byte big-endian length followed by a bincode
//! body. Payload bytes that follow a `StoreAnnounce` are not framed at all;
//! decoders must never read past the end of the current frame.

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

use super::types::{ControlMessage, Frame};

/// Upper bound on a single control frame body.
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Read size of [`NopDecoder`].
pub const RAW_READ_SIZE: usize = 1028;

#[derive(Error, Debug)]
pub enum DecodeError {
    /// The connection failed or closed. Unrecoverable.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Declared frame length exceeds [`MAX_FRAME_SIZE`]. Unrecoverable.
    #[error("Frame too large: {0} bytes")]
    FrameTooLarge(usize),

    /// The frame was consumed in full but its body is not a valid message.
    #[error("Malformed frame: {0}")]
    Malformed(String),
}

impl DecodeError {
    /// Whether the stream is still positioned at a frame boundary.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, DecodeError::Malformed(_))
    }
}

#[async_trait]
pub trait Decoder: Send + Sync {
    async fn decode(&self, reader: &mut (dyn AsyncRead + Send + Unpin)) -> Result<Frame, DecodeError>;
}

/// Length-prefixed bincode frames carrying a [`ControlMessage`].
#[derive(Debug, Default, Clone, Copy)]
pub struct BincodeDecoder;

#[async_trait]
impl Decoder for BincodeDecoder {
    async fn decode(&self, reader: &mut (dyn AsyncRead + Send + Unpin)) -> Result<Frame, DecodeError> {
        let mut len_buf = [0u8; 4];
        reader.read_exact(&mut len_buf).await?;

        let len = u32::from_be_bytes(len_buf) as usize;
        if len > MAX_FRAME_SIZE {
            return Err(DecodeError::FrameTooLarge(len));
        }

        let mut body = vec![0u8; len];
        reader.read_exact(&mut body).await?;

        let msg = bincode::deserialize::<ControlMessage>(&body)
            .map_err(|e| DecodeError::Malformed(e.to_string()))?;
        Ok(Frame::Control(msg))
    }
}

/// Performs no decoding; hands back whatever bytes one read returns.
#[derive(Debug, Default, Clone, Copy)]
pub struct NopDecoder;

#[async_trait]
impl Decoder for NopDecoder {
    async fn decode(&self, reader: &mut (dyn AsyncRead + Send + Unpin)) -> Result<Frame, DecodeError> {
        let mut buf = vec![0u8; RAW_READ_SIZE];
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Err(DecodeError::Io(std::io::ErrorKind::UnexpectedEof.into()));
        }
        buf.truncate(n);
        Ok(Frame::Raw(buf))
    }
}

/// Serializes a message into the frame layout read by [`BincodeDecoder`].
pub fn encode_frame(msg: &ControlMessage) -> anyhow::Result<Vec<u8>> {
    let body = bincode::serialize(msg)?;
    if body.len() > MAX_FRAME_SIZE {
        anyhow::bail!("Frame too large: {} bytes", body.len());
    }

    let mut frame = Vec::with_capacity(4 + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bincode_frame_roundtrip() {
        let msg = ControlMessage::GetRequest {
            key: "somekey".to_string(),
        };
        let bytes = encode_frame(&msg).unwrap();
        let mut reader: &[u8] = &bytes;

        let frame = BincodeDecoder.decode(&mut reader).await.unwrap();

        assert_eq!(frame, Frame::Control(msg));
        assert!(reader.is_empty(), "decoder must consume exactly one frame");
    }

    #[tokio::test]
    async fn test_bincode_rejects_oversized_length() {
        let bytes = ((MAX_FRAME_SIZE + 1) as u32).to_be_bytes();
        let mut reader: &[u8] = &bytes;

        let err = BincodeDecoder.decode(&mut reader).await.unwrap_err();

        assert!(matches!(err, DecodeError::FrameTooLarge(_)));
        assert!(!err.is_recoverable());
    }

    #[tokio::test]
    async fn test_bincode_truncated_frame_is_io_error() {
        let bytes = encode_frame(&ControlMessage::GetRequest { key: "k".into() }).unwrap();
        let mut reader: &[u8] = &bytes[..bytes.len() - 1];

        let err = BincodeDecoder.decode(&mut reader).await.unwrap_err();
        assert!(matches!(err, DecodeError::Io(_)));
    }

    #[tokio::test]
    async fn test_nop_decoder_returns_raw_bytes() {
        let mut reader: &[u8] = b"hello raw";

        let frame = NopDecoder.decode(&mut reader).await.unwrap();
        assert_eq!(frame, Frame::Raw(b"hello raw".to_vec()));

        let err = NopDecoder.decode(&mut reader).await.unwrap_err();
        assert!(matches!(err, DecodeError::Io(_)));
    }
}
