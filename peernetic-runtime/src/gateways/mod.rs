//! Built-in gateways: timer, recorder, replayer.

mod recorder;
mod timer;

pub use recorder::{RecorderError, RecorderGateway, ReplayerGateway};
pub use timer::TimerGateway;
