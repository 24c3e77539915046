//! Timer-backed delay subcoroutine.

use std::time::Duration;

use peernetic_core::{payload, Address};

use crate::actor::{BoxError, Context, Subcoroutine, SubcoroutineState};

enum SleepState {
    NotStarted,
    Waiting,
}

/// A [`Subcoroutine`] that parks a marker on the timer gateway and finishes
/// when it comes back, `duration` later. Used by retry loops and staged
/// protocols to wait without blocking the hosting actor.
pub struct SleepSubcoroutine {
    address: Address,
    timer_prefix: Address,
    duration: Duration,
    state: SleepState,
}

impl SleepSubcoroutine {
    /// Create a sleep under `address` (relative to the owning actor) using
    /// the timer gateway at `timer_prefix`.
    pub fn new(address: Address, timer_prefix: Address, duration: Duration) -> Self {
        SleepSubcoroutine {
            address,
            timer_prefix,
            duration,
            state: SleepState::NotStarted,
        }
    }
}

impl Subcoroutine for SleepSubcoroutine {
    fn relative_address(&self) -> &Address {
        &self.address
    }

    fn step(&mut self, ctx: &mut Context) -> Result<SubcoroutineState, BoxError> {
        match self.state {
            SleepState::NotStarted => {
                let destination = self
                    .timer_prefix
                    .append_element(self.duration.as_millis().to_string());
                ctx.out_from(&self.address, destination, payload(()));
                self.state = SleepState::Waiting;
                Ok(SubcoroutineState::Running)
            }
            SleepState::Waiting => {
                // Anything routed here after the send is the timer echo.
                Ok(SubcoroutineState::Finished(None))
            }
        }
    }
}
