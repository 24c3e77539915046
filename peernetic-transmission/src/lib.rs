//! # Peernetic transmission layer
//!
//! At-least-once request/response semantics on top of the peernetic
//! message fabric: nonce-tagged requests with scheduled resends, timed
//! duplicate suppression on both sides of the conversation, and typed
//! timeout notifications.
//!
//! The centrepiece is [`TransmissionCoroutine`], hosted as an ordinary
//! actor between the application actor and the (possibly lossy) outside
//! world. [`NonceManager`] is the standalone time-indexed nonce set for
//! actors that track request state themselves.

#![warn(missing_docs)]

mod manager;
mod nonce;
mod params;
mod task;

use thiserror::Error;

pub use manager::{NonceError, NonceManager};
pub use nonce::{
    ByteArrayNonceGenerator, Nonce, NonceAccessor, NonceGenerator, SharedNonceAccessor,
};
pub use params::{MessageClass, TypeMappings};
pub use task::{RequestTimedOut, TransmissionCoroutine};

/// Errors raised by the transmission layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransmissionError {
    /// A response with this nonce was already sent.
    #[error("response already sent for this nonce")]
    ResponseAlreadySent,
    /// An outgoing payload's type has no registered [`MessageClass`].
    #[error("no type mapping for outgoing payload")]
    UnmappedOutgoingType,
    /// An outgoing payload carried no readable nonce.
    #[error("cannot extract nonce from outgoing payload")]
    NonceExtraction,
    /// A resend schedule failed validation.
    #[error("invalid resend schedule: {0}")]
    InvalidSchedule(String),
    /// A payload type was registered twice.
    #[error("type mapping already registered for {0}")]
    DuplicateTypeMapping(String),
}
