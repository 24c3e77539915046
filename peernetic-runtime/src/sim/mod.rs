//! The deterministic simulator and its fake transports.

mod events;
mod line;
mod simulator;

pub use events::{EventQueue, ScheduledEvent};
pub use line::{DepartMessage, Line, PerfectLine, SimpleLine, SimpleLineConfig, TransitMessage};
pub use simulator::{
    ActorDurationCalculator, SimpleActorDurationCalculator, SimulationError, Simulator,
    TraceEntry,
};
