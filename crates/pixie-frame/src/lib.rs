//! Length-prefixed message framing for pixie.
//!
//! Every message on the wire is a 4-byte little-endian signed payload
//! length followed by exactly that many payload bytes. There is no magic
//! number, version byte or checksum.
//!
//! [`FrameDecoder`] turns arbitrary read chunks back into payloads and
//! [`FrameEncoder`] accumulates framed payloads for the next socket write.
//! Payload bytes are produced and consumed by a [`Serializer`]; the framing
//! never looks inside them.

pub mod codec;
pub mod error;
pub mod reader;
pub mod serializer;
pub mod writer;

pub use codec::{encode_frame, FrameConfig, DEFAULT_MAX_PAYLOAD, HEADER_SIZE};
pub use error::{FrameError, Result};
pub use reader::FrameDecoder;
#[cfg(feature = "bincode")]
pub use serializer::BincodeSerializer;
pub use serializer::{JsonSerializer, Serializer, SerializerError};
pub use writer::FrameEncoder;
