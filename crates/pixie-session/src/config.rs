use std::net::SocketAddr;
use std::time::Duration;

use pixie_frame::{FrameConfig, DEFAULT_MAX_PAYLOAD};

/// Bytes requested per socket read by the inbound pump.
pub const DEFAULT_READ_CHUNK_SIZE: usize = 1024;

/// Per-session behavior.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Upper bound for a single socket read. Default: 1 KiB.
    pub read_chunk_size: usize,
    /// Largest payload accepted in either direction. Default: 16 MiB. A peer
    /// announcing a bigger frame is disconnected.
    pub max_payload_size: usize,
    /// Timeout for outbound connects. `None` blocks until the OS gives up.
    pub connect_timeout: Option<Duration>,
    /// Disable Nagle's algorithm on the socket.
    pub nodelay: bool,
}

impl SessionConfig {
    pub fn frame_config(&self) -> FrameConfig {
        FrameConfig {
            max_payload_size: self.max_payload_size,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            connect_timeout: None,
            nodelay: true,
        }
    }
}

/// Server listener and per-session behavior.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to listen on. Default: `127.0.0.1:8000`.
    pub bind_addr: SocketAddr,
    /// Applied to every accepted session.
    pub session: SessionConfig,
}

impl ServerConfig {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            ..Self::default()
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8000)),
            session: SessionConfig::default(),
        }
    }
}
