//! Native helper wire framing.
//!
//! Each message is a little-endian `u32` byte length followed by that many
//! bytes of UTF-8 JSON. Messages follow each other with no terminator.
//!
//! ```text
//! ┌──────────────┬──────────────────────────┐
//! │ len: u32 LE  │ JSON payload (len bytes) │ ...
//! └──────────────┴──────────────────────────┘
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::io::ErrorKind;

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Largest frame accepted from a helper (1 MiB).
pub const MAX_INBOUND_FRAME: usize = 1024 * 1024;

// ============================================================================
// Encoding
// ============================================================================

/// Encodes `message` as one frame.
///
/// # Errors
///
/// - [`Error::Json`] if serialization fails
/// - [`Error::Protocol`] if the payload does not fit a `u32` length
pub fn encode_frame(message: &Value) -> Result<Vec<u8>> {
    let payload = serde_json::to_vec(message)?;
    let length = u32::try_from(payload.len())
        .map_err(|_| Error::protocol(format!("message too large: {} bytes", payload.len())))?;

    let mut frame = Vec::with_capacity(4 + payload.len());
    frame.extend_from_slice(&length.to_le_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Writes one frame and flushes.
///
/// # Errors
///
/// Returns an error if encoding or the write fails.
pub async fn write_frame<W>(writer: &mut W, message: &Value) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_frame(message)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

// ============================================================================
// Decoding
// ============================================================================

/// Reads one frame.
///
/// Returns `Ok(None)` only when the stream ends exactly on a frame boundary.
///
/// # Errors
///
/// - [`Error::Protocol`] for oversized frames, a truncated length prefix,
///   or invalid JSON
/// - [`Error::Io`] if the stream ends inside a payload
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Value>>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; 4];
    let mut filled = 0;
    while filled < prefix.len() {
        match reader.read(&mut prefix[filled..]).await {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => {
                return Err(Error::protocol(format!(
                    "stream ended after {filled} of 4 length prefix bytes"
                )));
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }

    let length = u32::from_le_bytes(prefix) as usize;
    if length > MAX_INBOUND_FRAME {
        return Err(Error::protocol(format!(
            "frame of {length} bytes exceeds {MAX_INBOUND_FRAME} byte limit"
        )));
    }

    let mut payload = vec![0u8; length];
    reader.read_exact(&mut payload).await?;

    serde_json::from_slice(&payload)
        .map(Some)
        .map_err(|e| Error::protocol(format!("invalid JSON frame: {e}")))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_prefix_is_little_endian_byte_length() {
        let message = json!({ "text": "héllo" });
        let frame = encode_frame(&message).expect("encode");
        let payload = serde_json::to_vec(&message).expect("json");

        assert_eq!(&frame[..4], &(payload.len() as u32).to_le_bytes());
        assert_eq!(&frame[4..], payload.as_slice());
    }

    #[tokio::test]
    async fn test_reads_consecutive_frames() {
        let mut bytes = encode_frame(&json!(1)).expect("encode");
        bytes.extend(encode_frame(&json!({ "n": 2 })).expect("encode"));
        let mut reader = bytes.as_slice();

        assert_eq!(read_frame(&mut reader).await.expect("read"), Some(json!(1)));
        assert_eq!(read_frame(&mut reader).await.expect("read"), Some(json!({ "n": 2 })));
        assert_eq!(read_frame(&mut reader).await.expect("read"), None);
    }

    #[tokio::test]
    async fn test_write_frame_over_duplex() {
        let (mut client, mut server) = tokio::io::duplex(1024);

        write_frame(&mut client, &json!({ "ping": true })).await.expect("write");
        let received = read_frame(&mut server).await.expect("read");
        assert_eq!(received, Some(json!({ "ping": true })));
    }

    #[tokio::test]
    async fn test_oversized_frame_is_rejected() {
        let length = (MAX_INBOUND_FRAME as u32 + 1).to_le_bytes();
        let mut reader = &length[..];

        let err = read_frame(&mut reader).await.unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }));
    }

    #[tokio::test]
    async fn test_truncated_frame_is_io_error() {
        let mut bytes = 10u32.to_le_bytes().to_vec();
        bytes.extend_from_slice(b"{\"a\"");
        let mut reader = bytes.as_slice();

        let err = read_frame(&mut reader).await.unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[tokio::test]
    async fn test_partial_length_prefix_is_not_clean_eof() {
        let bytes = [0x05u8, 0x00];
        let mut reader = &bytes[..];

        let err = read_frame(&mut reader).await.unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }));
    }

    #[tokio::test]
    async fn test_prefix_split_across_reads() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let frame = encode_frame(&json!("split")).expect("encode");

        client.write_all(&frame[..2]).await.expect("write");
        let reading = tokio::spawn(async move { read_frame(&mut server).await });
        tokio::task::yield_now().await;
        client.write_all(&frame[2..]).await.expect("write");

        let received = reading.await.expect("join").expect("read");
        assert_eq!(received, Some(json!("split")));
    }

    #[tokio::test]
    async fn test_invalid_json_is_protocol_error() {
        let mut bytes = 3u32.to_le_bytes().to_vec();
        bytes.extend_from_slice(b"{{{");
        let mut reader = bytes.as_slice();

        let err = read_frame(&mut reader).await.unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }));
    }

    proptest! {
        #[test]
        fn prop_prefix_matches_utf8_length(text in "\\PC{0,64}") {
            let message = json!({ "text": text });
            let frame = encode_frame(&message).unwrap();
            let declared = u32::from_le_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
            prop_assert_eq!(declared, frame.len() - 4);
            prop_assert!(std::str::from_utf8(&frame[4..]).is_ok());
        }
    }
}
