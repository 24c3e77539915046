//! Payload serialization boundary.
//!
//! The core never mandates a wire format; network-facing shuttles, the
//! recorder gateway and simulated lines all go through a [`Serializer`]
//! injected by the caller. [`JsonSerializer`] covers the common case where
//! every payload crossing the boundary is one serde-friendly type.

use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::message::{payload, payload_as, Payload};

/// Errors crossing the serialization boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SerializeError {
    /// The payload's concrete type is not one this serializer handles.
    #[error("payload type not handled by this serializer")]
    UnsupportedPayload,
    /// Encoding failed.
    #[error("encode failed: {0}")]
    Encode(String),
    /// Decoding failed.
    #[error("decode failed: {0}")]
    Decode(String),
}

/// Opaque bytes ↔ payload conversion.
pub trait Serializer: Send + Sync {
    /// Encode a payload to bytes.
    fn serialize(&self, payload: &Payload) -> Result<Vec<u8>, SerializeError>;

    /// Decode bytes back into a payload.
    fn deserialize(&self, bytes: &[u8]) -> Result<Payload, SerializeError>;
}

/// JSON serializer for a single concrete payload type `T`.
///
/// Payloads that are not a `T` fail with
/// [`SerializeError::UnsupportedPayload`].
pub struct JsonSerializer<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonSerializer<T> {
    /// Create the serializer.
    pub fn new() -> Self {
        JsonSerializer { _marker: PhantomData }
    }
}

impl<T> Default for JsonSerializer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Serializer for JsonSerializer<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn serialize(&self, payload: &Payload) -> Result<Vec<u8>, SerializeError> {
        let value = payload_as::<T>(payload).ok_or(SerializeError::UnsupportedPayload)?;
        serde_json::to_vec(value).map_err(|e| SerializeError::Encode(e.to_string()))
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Payload, SerializeError> {
        let value: T =
            serde_json::from_slice(bytes).map_err(|e| SerializeError::Decode(e.to_string()))?;
        Ok(payload(value))
    }
}
