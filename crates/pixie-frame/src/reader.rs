use std::sync::{Mutex, MutexGuard, PoisonError};

use bytes::{Buf, Bytes, BytesMut};
use tracing::{debug, trace};

use crate::codec::{checked_length, FrameConfig, HEADER_SIZE};
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Incremental frame decoder for one connection.
///
/// Bytes are fed in whatever chunks the socket produced them. The decoder
/// keeps the pending payload length once the 4-byte header has arrived, so
/// the header is parsed exactly once per frame.
///
/// Readiness is reported once per [`append`](Self::append). When a single
/// chunk completes several frames, only one "ready" result is produced, so
/// consumers drain the backlog by polling [`has_message`](Self::has_message)
/// after every [`extract_message`](Self::extract_message).
#[derive(Debug)]
pub struct FrameDecoder {
    state: Mutex<DecoderState>,
    config: FrameConfig,
}

#[derive(Debug)]
struct DecoderState {
    buf: BytesMut,
    expected: Option<usize>,
    fault: Option<FrameError>,
}

impl DecoderState {
    fn read_marker(&mut self, max_payload: usize) {
        if self.expected.is_some() || self.fault.is_some() || self.buf.len() < HEADER_SIZE {
            return;
        }
        let raw = self.buf.get_i32_le();
        match checked_length(raw, max_payload) {
            Ok(len) => {
                trace!(len, "frame header parsed");
                self.expected = Some(len);
            }
            Err(err) => {
                debug!(raw, error = %err, "rejected frame header");
                self.fault = Some(err);
            }
        }
    }

    fn is_ready(&self) -> bool {
        matches!(self.expected, Some(len) if self.buf.len() >= len)
    }
}

impl FrameDecoder {
    /// Create a decoder with default configuration.
    pub fn new() -> Self {
        Self::with_config(FrameConfig::default())
    }

    /// Create a decoder with explicit configuration.
    pub fn with_config(config: FrameConfig) -> Self {
        Self {
            state: Mutex::new(DecoderState {
                buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
                expected: None,
                fault: None,
            }),
            config,
        }
    }

    /// Append freshly received bytes.
    ///
    /// Returns `Ok(true)` when a complete payload is buffered. A length
    /// prefix that is negative or over the payload limit poisons the decoder;
    /// this and every later call return that error.
    pub fn append(&self, bytes: &[u8]) -> Result<bool> {
        let mut state = self.lock();
        if let Some(fault) = &state.fault {
            return Err(fault.clone());
        }

        state.buf.extend_from_slice(bytes);
        state.read_marker(self.config.max_payload_size);

        match &state.fault {
            Some(fault) => Err(fault.clone()),
            None => Ok(state.is_ready()),
        }
    }

    /// Whether a complete payload is buffered right now.
    pub fn has_message(&self) -> bool {
        self.lock().is_ready()
    }

    /// Length of the payload currently being assembled, if its header has
    /// been received.
    pub fn expected_len(&self) -> Option<usize> {
        self.lock().expected
    }

    /// Number of buffered bytes not yet consumed as header or payload.
    pub fn buffered_len(&self) -> usize {
        self.lock().buf.len()
    }

    /// Take the next complete payload off the buffer.
    ///
    /// Returns `Ok(None)` while the header or payload is still incomplete.
    /// After extracting, the next header is parsed straight away if at least
    /// [`HEADER_SIZE`] bytes remain.
    pub fn extract_message(&self) -> Result<Option<Bytes>> {
        let mut state = self.lock();
        if !state.is_ready() {
            return match &state.fault {
                Some(fault) => Err(fault.clone()),
                None => Ok(None),
            };
        }

        let Some(len) = state.expected.take() else {
            return Ok(None);
        };
        let payload = state.buf.split_to(len).freeze();
        state.read_marker(self.config.max_payload_size);
        Ok(Some(payload))
    }

    /// Current decoder configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, DecoderState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}
