//! Pluggable payload serialization.
//!
//! The framing layer treats payloads as opaque bytes. Both ends of a
//! connection must agree on the same [`Serializer`].

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Errors produced while converting messages to or from payload bytes.
#[derive(Debug, thiserror::Error)]
pub enum SerializerError {
    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Bincode serialization/deserialization error.
    #[cfg(feature = "bincode")]
    #[error("bincode error: {0}")]
    Bincode(#[from] bincode::Error),
}

/// Converts messages to and from frame payloads.
pub trait Serializer: Clone + Send + Sync + 'static {
    /// Serialize `value` into payload bytes.
    fn serialize<T>(&self, value: &T) -> Result<Vec<u8>, SerializerError>
    where
        T: Serialize + ?Sized;

    /// Deserialize payload bytes into a `T`.
    fn deserialize<T>(&self, bytes: &[u8]) -> Result<T, SerializerError>
    where
        T: DeserializeOwned;
}

/// JSON payloads via `serde_json`. The default serializer.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn serialize<T>(&self, value: &T) -> Result<Vec<u8>, SerializerError>
    where
        T: Serialize + ?Sized,
    {
        Ok(serde_json::to_vec(value)?)
    }

    fn deserialize<T>(&self, bytes: &[u8]) -> Result<T, SerializerError>
    where
        T: DeserializeOwned,
    {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Compact binary payloads via `bincode`.
#[cfg(feature = "bincode")]
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeSerializer;

#[cfg(feature = "bincode")]
impl Serializer for BincodeSerializer {
    fn serialize<T>(&self, value: &T) -> Result<Vec<u8>, SerializerError>
    where
        T: Serialize + ?Sized,
    {
        Ok(bincode::serialize(value)?)
    }

    fn deserialize<T>(&self, bytes: &[u8]) -> Result<T, SerializerError>
    where
        T: DeserializeOwned,
    {
        Ok(bincode::deserialize(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Chat {
        from: String,
        body: String,
        seq: u32,
    }

    fn sample() -> Chat {
        Chat {
            from: "alice".to_string(),
            body: "hi there".to_string(),
            seq: 7,
        }
    }

    #[test]
    fn json_string_payload_is_quoted_text() {
        let bytes = JsonSerializer.serialize("hello").unwrap();
        assert_eq!(bytes, br#""hello""#);
        let back: String = JsonSerializer.deserialize(&bytes).unwrap();
        assert_eq!(back, "hello");
    }

    #[test]
    fn json_struct_roundtrip() {
        let bytes = JsonSerializer.serialize(&sample()).unwrap();
        let back: Chat = JsonSerializer.deserialize(&bytes).unwrap();
        assert_eq!(back, sample());
    }

    #[test]
    fn json_type_mismatch_is_error() {
        let bytes = JsonSerializer.serialize(&42u32).unwrap();
        let err = JsonSerializer.deserialize::<Chat>(&bytes).unwrap_err();
        assert!(matches!(err, SerializerError::Json(_)));
    }

    #[cfg(feature = "bincode")]
    #[test]
    fn bincode_struct_roundtrip() {
        let bytes = BincodeSerializer.serialize(&sample()).unwrap();
        let back: Chat = BincodeSerializer.deserialize(&bytes).unwrap();
        assert_eq!(back, sample());
    }

    #[cfg(feature = "bincode")]
    #[test]
    fn bincode_truncated_payload_is_error() {
        let bytes = BincodeSerializer.serialize(&sample()).unwrap();
        let err = BincodeSerializer
            .deserialize::<Chat>(&bytes[..bytes.len() - 3])
            .unwrap_err();
        assert!(matches!(err, SerializerError::Bincode(_)));
    }
}
