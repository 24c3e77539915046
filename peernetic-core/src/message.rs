//! Messages and opaque payloads.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::Address;

/// Opaque payload carried by a [`Message`].
///
/// Payloads are reference-counted so that duplication (lossy lines replaying
/// a packet, the transmission layer re-sending a request) never requires the
/// payload type to be `Clone`.
pub type Payload = Arc<dyn Any + Send + Sync>;

/// Wrap a value as a [`Payload`].
pub fn payload<T: Any + Send + Sync>(value: T) -> Payload {
    Arc::new(value)
}

/// Borrow a payload back as its concrete type, if it is one.
pub fn payload_as<T: Any>(payload: &Payload) -> Option<&T> {
    payload.downcast_ref::<T>()
}

/// An immutable routed message: source address, destination address, and an
/// opaque payload. The framework attaches no semantics to payloads.
#[derive(Clone)]
pub struct Message {
    source: Address,
    destination: Address,
    payload: Payload,
}

impl Message {
    /// Construct a message.
    pub fn new(source: Address, destination: Address, payload: Payload) -> Self {
        Message { source, destination, payload }
    }

    /// Where the message came from.
    pub fn source(&self) -> &Address {
        &self.source
    }

    /// Where the message is going.
    pub fn destination(&self) -> &Address {
        &self.destination
    }

    /// The opaque payload.
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Payload downcast shorthand.
    pub fn payload_as<T: Any>(&self) -> Option<&T> {
        payload_as::<T>(&self.payload)
    }

    /// Same payload, different endpoints. Used by proxies and replayers that
    /// re-address traffic.
    pub fn readdressed(&self, source: Address, destination: Address) -> Message {
        Message {
            source,
            destination,
            payload: Arc::clone(&self.payload),
        }
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("source", &self.source.to_string())
            .field("destination", &self.destination.to_string())
            .finish_non_exhaustive()
    }
}
