//! Length-prefixed TCP messaging with typed servers and clients.
//!
//! Every message travels as a 4-byte little-endian length followed by the
//! serialized payload. A [`PixieServer`](session::PixieServer) holds new
//! connections as pending until the application accepts them and routes
//! replies by session id; a [`PixieClient`](session::PixieClient) wraps a
//! single outbound connection.
//!
//! # Crate Structure
//!
//! - [`transport`]: TCP listener and connect helpers
//! - [`frame`]: length-prefixed framing and payload serializers
//! - [`session`]: sessions, session registry, server and client

/// Re-export transport types.
pub mod transport {
    pub use pixie_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use pixie_frame::*;
}

/// Re-export session, server and client types.
pub mod session {
    pub use pixie_session::*;
}

pub use pixie_session::{
    ConnectionState, PixieClient, PixieServer, ServerConfig, Session, SessionConfig, SessionError,
    SessionId,
};
