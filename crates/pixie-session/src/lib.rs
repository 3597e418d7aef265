//! Sessions, session registry, server and typed client.
//!
//! A [`Session`] owns one TCP connection and runs two pumps: the inbound
//! pump decodes frames as bytes arrive, the outbound pump writes whatever
//! has been queued. [`PixieServer`] accepts connections, parks them as
//! *pending* until the application accepts them, and routes sends by
//! [`SessionId`]. [`PixieClient`] wraps a single outbound session behind a
//! typed API.

pub mod client;
pub mod config;
pub mod error;
mod events;
pub mod handle;
pub mod registry;
pub mod server;
pub mod session;
pub mod state;

pub use client::PixieClient;
pub use config::{ServerConfig, SessionConfig, DEFAULT_READ_CHUNK_SIZE};
pub use error::{Result, SessionError};
pub use handle::SessionHandle;
pub use registry::SessionRegistry;
pub use server::PixieServer;
pub use session::Session;
pub use state::{ConnectionState, SessionId};
