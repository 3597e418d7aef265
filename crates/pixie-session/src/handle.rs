use std::net::SocketAddr;

use serde::Serialize;

use crate::error::Result;
use crate::state::{ConnectionState, SessionId};

/// What the registry needs from a session.
///
/// [`Session`](crate::Session) is the production implementation; the
/// registry is generic over this trait so admission and routing can be
/// exercised without sockets.
pub trait SessionHandle: Clone + Send + Sync + 'static {
    fn id(&self) -> SessionId;

    fn remote_addr(&self) -> SocketAddr;

    fn state(&self) -> ConnectionState;

    fn open(&self) -> Result<()>;

    fn close(&self) -> Result<()>;

    /// Queue a message for delivery. Fire-and-forget.
    fn send<T>(&self, message: &T) -> Result<()>
    where
        T: Serialize + ?Sized;
}
