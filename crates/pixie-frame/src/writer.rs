use std::sync::{Mutex, MutexGuard, PoisonError};

use bytes::{Bytes, BytesMut};

use crate::codec::{encode_frame, FrameConfig, MAX_WIRE_PAYLOAD};
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Outbound frame queue for one connection.
///
/// Payloads are framed as they are queued and accumulate in one contiguous
/// buffer. [`drain`](Self::drain) hands the whole buffer to the writer in a
/// single block, so several queued frames may go out in one socket write.
#[derive(Debug)]
pub struct FrameEncoder {
    buf: Mutex<BytesMut>,
    config: FrameConfig,
}

impl FrameEncoder {
    /// Create an encoder with default configuration.
    pub fn new() -> Self {
        Self::with_config(FrameConfig::default())
    }

    /// Create an encoder with explicit configuration.
    pub fn with_config(config: FrameConfig) -> Self {
        Self {
            buf: Mutex::new(BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY)),
            config,
        }
    }

    /// Frame `payload` and append it to the outbound buffer.
    ///
    /// Oversized payloads are rejected and leave the buffer untouched.
    pub fn queue(&self, payload: &[u8]) -> Result<()> {
        let max = self.config.max_payload_size.min(MAX_WIRE_PAYLOAD);
        if payload.len() > max {
            return Err(FrameError::PayloadTooLarge {
                size: payload.len(),
                max,
            });
        }

        encode_frame(payload, &mut self.lock())
    }

    /// Take everything queued so far as one contiguous block.
    ///
    /// Returns `None` when nothing is queued.
    pub fn drain(&self) -> Option<Bytes> {
        let mut buf = self.lock();
        if buf.is_empty() {
            return None;
        }
        Some(buf.split().freeze())
    }

    /// Number of framed bytes waiting to be drained.
    pub fn pending_len(&self) -> usize {
        self.lock().len()
    }

    /// Current encoder configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, BytesMut> {
        self.buf.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for FrameEncoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::codec::{DEFAULT_MAX_PAYLOAD, HEADER_SIZE};
    use crate::reader::FrameDecoder;

    #[test]
    fn queue_then_drain_single_frame() {
        let encoder = FrameEncoder::new();
        encoder.queue(b"hello").unwrap();
        assert_eq!(encoder.pending_len(), HEADER_SIZE + 5);

        let block = encoder.drain().unwrap();
        assert_eq!(&block[..HEADER_SIZE], &5i32.to_le_bytes());
        assert_eq!(&block[HEADER_SIZE..], b"hello");
        assert_eq!(encoder.pending_len(), 0);
    }

    #[test]
    fn drain_empty_returns_none() {
        let encoder = FrameEncoder::new();
        assert!(encoder.drain().is_none());

        encoder.queue(b"x").unwrap();
        assert!(encoder.drain().is_some());
        assert!(encoder.drain().is_none());
    }

    #[test]
    fn queued_frames_coalesce_in_order() {
        let encoder = FrameEncoder::new();
        encoder.queue(b"A").unwrap();
        encoder.queue(b"BB").unwrap();
        encoder.queue(b"CCC").unwrap();

        let block = encoder.drain().unwrap();
        assert_eq!(block.len(), 3 * HEADER_SIZE + 6);

        let decoder = FrameDecoder::new();
        assert!(decoder.append(&block).unwrap());
        let mut out = Vec::new();
        while decoder.has_message() {
            out.push(decoder.extract_message().unwrap().unwrap().to_vec());
        }
        assert_eq!(out, vec![b"A".to_vec(), b"BB".to_vec(), b"CCC".to_vec()]);
    }

    #[test]
    fn payload_too_large_rejected_without_side_effect() {
        let encoder = FrameEncoder::with_config(FrameConfig {
            max_payload_size: 4,
        });
        encoder.queue(b"ok").unwrap();
        let before = encoder.pending_len();

        let err = encoder.queue(b"oversized").unwrap_err();
        assert_eq!(err, FrameError::PayloadTooLarge { size: 9, max: 4 });
        assert_eq!(encoder.pending_len(), before);
    }

    #[test]
    fn empty_and_large_payloads_encode() {
        let encoder = FrameEncoder::with_config(FrameConfig {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
        });
        let large = vec![0x5A; 70 * 1024];
        encoder.queue(b"").unwrap();
        encoder.queue(&large).unwrap();

        let decoder = FrameDecoder::new();
        decoder.append(&encoder.drain().unwrap()).unwrap();
        assert!(decoder.extract_message().unwrap().unwrap().is_empty());
        assert_eq!(decoder.extract_message().unwrap().unwrap().as_ref(), large.as_slice());
    }

    #[test]
    fn concurrent_queue_keeps_frames_intact() {
        let encoder = Arc::new(FrameEncoder::new());
        let writers: Vec<_> = (0..4)
            .map(|w| {
                let encoder = Arc::clone(&encoder);
                std::thread::spawn(move || {
                    for i in 0..50 {
                        encoder.queue(format!("w{w}-{i}").as_bytes()).unwrap();
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }

        let decoder = FrameDecoder::new();
        decoder.append(&encoder.drain().unwrap()).unwrap();
        let mut count = 0;
        while decoder.has_message() {
            let payload = decoder.extract_message().unwrap().unwrap();
            assert!(payload.starts_with(b"w"));
            count += 1;
        }
        assert_eq!(count, 200);
    }
}
