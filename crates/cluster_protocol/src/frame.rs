//! Length-prefixed framing for control links.
//!
//! Wire layout of one frame:
//!
//! ```text
//! +----------------+---------------------------+
//! | len: u32 (LE)  | payload (len bytes)       |
//! +----------------+---------------------------+
//! ```
//!
//! The payload is passed through the direction's [`StreamCipher`]; the
//! length prefix stays in the clear. An empty frame is valid and is used as
//! the challenge acknowledgement.

use crate::cipher::StreamCipher;
use crate::error::ProtocolError;
use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest payload either side accepts.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Encodes a frame into a contiguous buffer, encrypting the payload.
pub fn encode_frame(payload: &[u8], cipher: &mut StreamCipher) -> Result<BytesMut, ProtocolError> {
    if payload.len() > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge {
            len: payload.len(),
            max: MAX_FRAME_LEN,
        });
    }

    let mut buf = BytesMut::with_capacity(4 + payload.len());
    buf.put_u32_le(payload.len() as u32);
    let start = buf.len();
    buf.extend_from_slice(payload);
    cipher.apply(&mut buf[start..]);
    Ok(buf)
}

/// Writes one frame and flushes it.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8], cipher: &mut StreamCipher) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    let buf = encode_frame(payload, cipher)?;
    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one frame and decrypts it.
///
/// Returns `Ok(None)` when the peer closed the stream cleanly between
/// frames.
pub async fn read_frame<R>(reader: &mut R, cipher: &mut StreamCipher) -> Result<Option<Vec<u8>>, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge { len, max: MAX_FRAME_LEN });
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    cipher.apply(&mut payload);
    Ok(Some(payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::CipherPair;

    #[tokio::test]
    async fn test_frames_survive_a_duplex_pipe() {
        let (mut left, mut right) = tokio::io::duplex(4096);
        let mut registry = CipherPair::for_registry(42);
        let mut node = CipherPair::for_node(42);

        write_frame(&mut left, b"", &mut registry.outbound).await.unwrap();
        write_frame(&mut left, br#"{"op":"server_identify_result","success":true}"#, &mut registry.outbound)
            .await
            .unwrap();
        drop(left);

        let empty = read_frame(&mut right, &mut node.inbound).await.unwrap();
        assert_eq!(empty, Some(Vec::new()));

        let payload = read_frame(&mut right, &mut node.inbound).await.unwrap().unwrap();
        assert_eq!(payload, br#"{"op":"server_identify_result","success":true}"#);

        // Clean close between frames
        assert_eq!(read_frame(&mut right, &mut node.inbound).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_oversized_length_is_rejected() {
        let (mut left, mut right) = tokio::io::duplex(64);
        let len = (MAX_FRAME_LEN as u32 + 1).to_le_bytes();
        left.write_all(&len).await.unwrap();

        let mut cipher = StreamCipher::new(1);
        let result = read_frame(&mut right, &mut cipher).await;
        assert!(matches!(result, Err(ProtocolError::FrameTooLarge { .. })));
    }
}
