use crate::state::SessionId;

/// Errors that can occur in session, server and client operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The operation is not valid in the session's current state.
    #[error("invalid operation: {0}")]
    InvalidOperation(&'static str),

    /// No pending session carries this id.
    #[error("session {0} not found among pending sessions")]
    NotFound(SessionId),

    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] pixie_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] pixie_frame::FrameError),

    /// Payload serialization error.
    #[error("serialization error: {0}")]
    Serializer(#[from] pixie_frame::SerializerError),

    /// Socket or thread setup error.
    #[error("session I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SessionError>;
