//! The coroutine contract and the pieces that run inside one actor.
//!
//! An actor is a [`Coroutine`]: a state machine whose [`resume`]
//! (`Coroutine::resume`) is called exactly once per incoming message. Local
//! state persists as fields on the implementing type, which is the
//! observable equivalent of a suspended call stack. Returning
//! [`Continuation::Suspend`] parks the actor until the next message;
//! returning [`Continuation::Finish`] (or an error) terminates it.
//!
//! [`resume`]: Coroutine::resume

mod context;
mod router;
mod runner;
mod sleep;

pub use context::Context;
pub use router::{
    AddBehaviour, ForwardResult, RouterError, SubcoroutineRouter, SubcoroutineState,
};
pub use runner::ActorRunner;
pub use sleep::SleepSubcoroutine;

use peernetic_core::Address;

/// Errors escaping an actor step. Treated as actor failure by the host: the
/// actor is terminated, siblings are unaffected.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// What an actor wants after handling one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Continuation {
    /// Park until the next incoming message.
    Suspend,
    /// Done; the host frees the actor's slot.
    Finish,
}

/// A suspendable computation hosted by a runner or the simulator.
pub trait Coroutine: Send {
    /// Handle the current incoming message (available on `ctx`).
    ///
    /// The first call delivers the priming message. Context source,
    /// destination and incoming payload are only valid for the duration of
    /// this call; outgoing messages buffered on `ctx` are flushed when it
    /// returns.
    fn resume(&mut self, ctx: &mut Context) -> Result<Continuation, BoxError>;
}

impl<F> Coroutine for F
where
    F: FnMut(&mut Context) -> Result<Continuation, BoxError> + Send,
{
    fn resume(&mut self, ctx: &mut Context) -> Result<Continuation, BoxError> {
        self(ctx)
    }
}

/// A nested suspendable dialogue living under an actor-relative address,
/// multiplexed by a [`SubcoroutineRouter`].
pub trait Subcoroutine: Send {
    /// This child's address relative to the owning actor's self address.
    /// Must be a direct child of the router it is added to.
    fn relative_address(&self) -> &Address;

    /// Handle the current incoming message, exactly like
    /// [`Coroutine::resume`] but with a completion value.
    fn step(&mut self, ctx: &mut Context) -> Result<SubcoroutineState, BoxError>;
}
