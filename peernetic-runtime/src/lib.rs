//! # Peernetic runtime
//!
//! Actor hosts, gateways, and the deterministic simulator.
//!
//! The same actor code runs in two worlds:
//!
//! - **Production**: an [`ActorRunner`](actor::ActorRunner) drains its
//!   [`Bus`] on a worker thread and a [`TimerGateway`](gateways::TimerGateway)
//!   schedules delayed echoes on a real clock. Hosts and gateways exchange
//!   message batches through [`Shuttle`](peernetic_core::Shuttle)s.
//! - **Simulation**: a [`Simulator`](sim::Simulator) replaces the threads
//!   and the clock with a single event loop over virtual time. Given
//!   identical inputs and seeds, two runs deliver byte-identical traces,
//!   which makes protocol bugs replayable.
//!
//! The [`proxy`] module adds a simulated-UDP hop (loss, jitter,
//! duplication) between actors without either side knowing.

#![warn(missing_docs)]

pub mod actor;
pub mod bus;
pub mod gateway;
pub mod gateways;
pub mod proxy;
pub mod sim;

pub use bus::{Bus, BusError, BusRecord, BusShuttle, OverflowPolicy};
pub use gateway::{GatewayError, InputGateway, OutputGateway};
