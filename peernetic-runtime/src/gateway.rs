//! Gateway traits: long-lived components that speak shuttle.

use std::sync::Arc;

use thiserror::Error;

use peernetic_core::Shuttle;

/// Errors from gateway shuttle management.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// The gateway (or its bus) has been closed.
    #[error("gateway is closed")]
    Closed,
    /// An outgoing shuttle with this prefix is already registered.
    #[error("outgoing shuttle already registered for prefix {0:?}")]
    DuplicateOutgoingPrefix(String),
    /// No outgoing shuttle with this prefix is registered.
    #[error("no outgoing shuttle registered for prefix {0:?}")]
    UnknownOutgoingPrefix(String),
}

/// A component messages can be sent *to*.
pub trait InputGateway {
    /// The shuttle feeding this component. Its prefix is the component's
    /// address prefix.
    fn incoming_shuttle(&self) -> Arc<dyn Shuttle>;
}

/// A component that sends messages *out* through registered shuttles.
pub trait OutputGateway {
    /// Register a shuttle for outgoing messages under its prefix.
    fn add_outgoing_shuttle(&self, shuttle: Arc<dyn Shuttle>) -> Result<(), GatewayError>;

    /// Deregister the outgoing shuttle for `prefix`.
    fn remove_outgoing_shuttle(&self, prefix: &str) -> Result<(), GatewayError>;
}
