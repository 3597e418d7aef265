use bytes::{BufMut, BytesMut};

use crate::error::{FrameError, Result};

/// Frame header: a single little-endian `i32` payload length.
pub const HEADER_SIZE: usize = 4;

/// Default maximum payload size: 16 MiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// Largest payload the length prefix can describe.
pub(crate) const MAX_WIRE_PAYLOAD: usize = i32::MAX as usize;

/// Encode a payload into the wire format.
///
/// Wire format:
/// ```text
/// ┌──────────────┬─────────────────┐
/// │ Length       │ Payload         │
/// │ (4B i32 LE)  │ (Length bytes)  │
/// └──────────────┴─────────────────┘
/// ```
pub fn encode_frame(payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    if payload.len() > MAX_WIRE_PAYLOAD {
        return Err(FrameError::PayloadTooLarge {
            size: payload.len(),
            max: MAX_WIRE_PAYLOAD,
        });
    }
    dst.reserve(HEADER_SIZE + payload.len());
    dst.put_i32_le(payload.len() as i32);
    dst.put_slice(payload);
    Ok(())
}

/// Validate a raw length prefix against the payload limit.
pub(crate) fn checked_length(raw: i32, max_payload: usize) -> Result<usize> {
    let len = usize::try_from(raw).map_err(|_| FrameError::InvalidLength(raw))?;
    if len > max_payload {
        return Err(FrameError::PayloadTooLarge {
            size: len,
            max: max_payload,
        });
    }
    Ok(len)
}

/// Configuration for the frame codec.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum payload size in bytes. Default: 16 MiB.
    pub max_payload_size: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_writes_header_then_payload() {
        let mut buf = BytesMut::new();
        let payload = b"hello, pixie!";

        encode_frame(payload, &mut buf).unwrap();
        assert_eq!(buf.len(), HEADER_SIZE + payload.len());
        assert_eq!(&buf[HEADER_SIZE..], payload);
    }

    #[test]
    fn test_header_is_signed_little_endian_length() {
        let mut buf = BytesMut::new();
        encode_frame(&[0xAA; 258], &mut buf).unwrap();
        assert_eq!(&buf[..HEADER_SIZE], &[0x02, 0x01, 0x00, 0x00]);
    }

    #[test]
    fn test_encode_appends_after_existing_frames() {
        let mut buf = BytesMut::new();
        encode_frame(b"first", &mut buf).unwrap();
        encode_frame(b"", &mut buf).unwrap();
        encode_frame(b"second", &mut buf).unwrap();

        assert_eq!(buf.len(), 3 * HEADER_SIZE + 5 + 6);
        assert_eq!(&buf[HEADER_SIZE + 5..2 * HEADER_SIZE + 5], &[0, 0, 0, 0]);
    }

    #[test]
    fn test_checked_length_accepts_zero_and_limit() {
        assert_eq!(checked_length(0, 16), Ok(0));
        assert_eq!(checked_length(16, 16), Ok(16));
    }

    #[test]
    fn test_checked_length_rejects_negative() {
        assert_eq!(checked_length(-1, DEFAULT_MAX_PAYLOAD), Err(FrameError::InvalidLength(-1)));
    }

    #[test]
    fn test_checked_length_rejects_over_limit() {
        assert_eq!(
            checked_length(17, 16),
            Err(FrameError::PayloadTooLarge { size: 17, max: 16 })
        );
    }
}
