//! TCP transport for pixie.
//!
//! This is the lowest layer of pixie: binding a listener, accepting raw
//! connections and dialing a remote endpoint. Everything above it works on
//! plain [`std::net::TcpStream`] values handed out here.

pub mod error;
pub mod tcp;

pub use error::{Result, TransportError};
pub use tcp::{connect, TcpTransport};
