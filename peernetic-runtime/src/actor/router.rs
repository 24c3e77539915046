//! Multiplexing of nested dialogues inside one actor.

use std::collections::HashMap;

use thiserror::Error;
use tracing::debug;

use peernetic_core::{Address, Payload};

use crate::actor::{BoxError, Context, Subcoroutine};

/// Errors from router management.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouterError {
    /// `remove` was called for an address with no registered subcoroutine.
    #[error("no subcoroutine registered at {0}")]
    NoSuchSubcoroutine(String),
    /// `add` was called for an address that already has a subcoroutine.
    #[error("subcoroutine already registered at {0}")]
    DuplicateSubcoroutine(String),
    /// The subcoroutine's address is not a direct child of the router.
    #[error("{child} is not a direct child of router {router}")]
    NotDirectChild {
        /// The offending child address.
        child: String,
        /// The router's relative address.
        router: String,
    },
    /// The subcoroutine finished while priming under
    /// [`AddBehaviour::AddPrimeNoFinish`].
    #[error("subcoroutine at {0} finished during priming")]
    FinishedDuringPrime(String),
}

/// Whether one step of a subcoroutine left it running or done.
#[derive(Debug)]
pub enum SubcoroutineState {
    /// The subcoroutine expects further messages.
    Running,
    /// The subcoroutine completed, optionally with a result.
    Finished(Option<Payload>),
}

/// What to do with the current incoming message when adding a subcoroutine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddBehaviour {
    /// Just register it.
    Add,
    /// Register it and immediately step it with the current incoming
    /// message.
    AddPrime,
    /// Like [`AddBehaviour::AddPrime`], but error if the subcoroutine
    /// finishes while priming.
    AddPrimeNoFinish,
}

/// Outcome of a [`SubcoroutineRouter::forward`] call.
#[derive(Debug)]
pub enum ForwardResult {
    /// No subcoroutine matched the destination; the message was untouched.
    NotForwarded,
    /// The message was stepped into a subcoroutine which is still running.
    Forwarded {
        /// The child key the message routed to.
        key: String,
    },
    /// The message was stepped into a subcoroutine which completed; its
    /// slot has been removed.
    Completed {
        /// The child key the message routed to.
        key: String,
        /// The completed subcoroutine's result.
        result: Option<Payload>,
    },
}

impl ForwardResult {
    /// `true` unless the result is [`ForwardResult::NotForwarded`].
    pub fn is_forwarded(&self) -> bool {
        !matches!(self, ForwardResult::NotForwarded)
    }

    /// `true` if the routed-to subcoroutine completed on this step.
    pub fn is_completed(&self) -> bool {
        matches!(self, ForwardResult::Completed { .. })
    }
}

/// Routes incoming messages to [`Subcoroutine`]s by destination suffix.
///
/// A router lives inside an actor under a relative address (say `router`).
/// When the actor at `host:a` receives a message for
/// `host:a:router:q:...`, [`forward`](Self::forward) strips the self address
/// and the router address and steps the subcoroutine registered under key
/// `q`. Messages that match no child are left alone.
///
/// The router is plain single-owner state; only the hosting actor's thread
/// ever touches it.
pub struct SubcoroutineRouter {
    address: Address,
    children: HashMap<String, Box<dyn Subcoroutine>>,
}

impl SubcoroutineRouter {
    /// Create a router under `address`, relative to the owning actor's self
    /// address. The address must be non-empty.
    pub fn new(address: Address) -> Self {
        assert!(!address.is_empty(), "router address must be non-empty");
        SubcoroutineRouter {
            address,
            children: HashMap::new(),
        }
    }

    /// The router's relative address.
    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Number of registered subcoroutines.
    pub fn len(&self) -> usize {
        self.children.len()
    }

    /// `true` if no subcoroutines are registered.
    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Register a subcoroutine, optionally priming it with the current
    /// incoming message.
    ///
    /// The child's [`relative_address`](Subcoroutine::relative_address) must
    /// be a direct child of this router (router address plus exactly one
    /// element).
    pub fn add(
        &mut self,
        ctx: &mut Context,
        child: Box<dyn Subcoroutine>,
        behaviour: AddBehaviour,
    ) -> Result<(), BoxError> {
        let key = self.child_key(child.relative_address())?;
        if self.children.contains_key(&key) {
            return Err(RouterError::DuplicateSubcoroutine(
                child.relative_address().to_string(),
            )
            .into());
        }
        self.children.insert(key.clone(), child);

        match behaviour {
            AddBehaviour::Add => Ok(()),
            AddBehaviour::AddPrime => {
                self.step_child(ctx, &key)?;
                Ok(())
            }
            AddBehaviour::AddPrimeNoFinish => {
                let address = self.address.append_element(key.clone());
                match self.step_child(ctx, &key)? {
                    ForwardResult::Completed { .. } => {
                        Err(RouterError::FinishedDuringPrime(address.to_string()).into())
                    }
                    _ => Ok(()),
                }
            }
        }
    }

    /// Deregister the subcoroutine at `address` (relative to the actor).
    /// Removing an unknown address fails with
    /// [`RouterError::NoSuchSubcoroutine`].
    pub fn remove(&mut self, address: &Address) -> Result<(), RouterError> {
        let key = self.child_key(address)?;
        if self.children.remove(&key).is_none() {
            return Err(RouterError::NoSuchSubcoroutine(address.to_string()));
        }
        Ok(())
    }

    /// Route the current incoming message to the matching subcoroutine, if
    /// any. A completed subcoroutine's slot is removed and its result
    /// returned.
    pub fn forward(&mut self, ctx: &mut Context) -> Result<ForwardResult, BoxError> {
        let relative = match ctx.destination().remove_prefix(ctx.self_address()) {
            Ok(relative) => relative,
            Err(_) => return Ok(ForwardResult::NotForwarded),
        };
        let suffix = match relative.remove_prefix(&self.address) {
            Ok(suffix) => suffix,
            Err(_) => return Ok(ForwardResult::NotForwarded),
        };
        let Some(key) = suffix.element(0).map(str::to_string) else {
            return Ok(ForwardResult::NotForwarded);
        };
        if !self.children.contains_key(&key) {
            return Ok(ForwardResult::NotForwarded);
        }
        self.step_child(ctx, &key)
    }

    fn step_child(&mut self, ctx: &mut Context, key: &str) -> Result<ForwardResult, BoxError> {
        let child = self
            .children
            .get_mut(key)
            .expect("child presence checked by caller");
        match child.step(ctx) {
            Ok(SubcoroutineState::Running) => Ok(ForwardResult::Forwarded {
                key: key.to_string(),
            }),
            Ok(SubcoroutineState::Finished(result)) => {
                debug!(key, "subcoroutine completed");
                self.children.remove(key);
                Ok(ForwardResult::Completed {
                    key: key.to_string(),
                    result,
                })
            }
            Err(e) => {
                // A failed subcoroutine is removed like a failed actor.
                self.children.remove(key);
                Err(e)
            }
        }
    }

    fn child_key(&self, child_address: &Address) -> Result<String, RouterError> {
        let suffix = child_address.remove_prefix(&self.address).map_err(|_| {
            RouterError::NotDirectChild {
                child: child_address.to_string(),
                router: self.address.to_string(),
            }
        })?;
        if suffix.len() != 1 {
            return Err(RouterError::NotDirectChild {
                child: child_address.to_string(),
                router: self.address.to_string(),
            });
        }
        Ok(suffix
            .element(0)
            .expect("length-1 address has element 0")
            .to_string())
    }
}
