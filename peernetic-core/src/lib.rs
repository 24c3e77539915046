//! # Peernetic core types
//!
//! Addressing, message and shuttle primitives shared by every peernetic
//! component. This crate is deliberately small: it defines the routing
//! fabric's vocabulary — [`Address`], [`Message`], the [`Shuttle`]
//! capability, and the [`Serializer`] boundary — and nothing that runs a
//! thread or a clock.
//!
//! See `peernetic-runtime` for the actor hosts, gateways and the
//! deterministic simulator built on these types.

#![warn(missing_docs)]

mod address;
pub mod message;
mod serializer;
pub mod shuttle;

pub use address::{Address, AddressError};
pub use message::{payload, payload_as, Message, Payload};
pub use serializer::{JsonSerializer, SerializeError, Serializer};
pub use shuttle::{retain_routable, NullShuttle, RecordingShuttle, Shuttle};
