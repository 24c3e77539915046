//! Deterministic single-threaded execution of actors on a virtual clock.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, error, warn};

use peernetic_core::{Address, Message, Payload};

use crate::actor::{Context, Continuation, Coroutine};
use crate::sim::events::{EventQueue, ScheduledEvent};

/// Errors from simulator setup and management.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SimulationError {
    /// An actor or timer was registered with an empty address.
    #[error("empty address")]
    EmptyAddress,
    /// An actor or timer already owns this address prefix.
    #[error("prefix {0:?} already registered")]
    DuplicatePrefix(String),
    /// No actor owns this address prefix.
    #[error("prefix {0:?} not registered")]
    UnknownPrefix(String),
}

/// Computes the virtual transit duration of one message hop.
///
/// Implementations must be deterministic with respect to their own state;
/// the simulator threads every hop through the same calculator instance.
pub trait ActorDurationCalculator: Send {
    /// Transit duration for `message` travelling `source` → `destination`.
    fn delay(&mut self, source: &Address, destination: &Address, message: &Message) -> Duration;
}

/// The default calculator: every hop is instantaneous.
#[derive(Debug, Default)]
pub struct SimpleActorDurationCalculator;

impl ActorDurationCalculator for SimpleActorDurationCalculator {
    fn delay(&mut self, _source: &Address, _destination: &Address, _message: &Message) -> Duration {
        Duration::ZERO
    }
}

/// One delivered hop, as recorded in the simulator's trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceEntry {
    /// Virtual time of the delivery.
    pub time: Duration,
    /// Source address of the delivered message.
    pub source: Address,
    /// Destination address of the delivered message.
    pub destination: Address,
}

struct ActorSlot {
    coroutine: Box<dyn Coroutine>,
    context: Context,
}

/// Deterministic executor of actors and virtual timers.
///
/// The simulator replaces runner threads and the timer gateway with one
/// event loop over a virtual clock. Events are ordered by
/// `(deliver-at, sequence)`; the sequence number is assigned at scheduling
/// time, so two runs fed identical inputs pop identical event sequences.
/// Actor lookup iterates nothing hash-ordered: the actor map is sorted by
/// prefix.
///
/// Virtual time is a [`Duration`] offset from a caller-chosen start.
pub struct Simulator {
    current_time: Duration,
    next_sequence: u64,
    queue: EventQueue,
    actors: BTreeMap<String, ActorSlot>,
    timers: BTreeSet<String>,
    duration_calculator: Box<dyn ActorDurationCalculator>,
    trace: Vec<TraceEntry>,
}

impl Simulator {
    /// A simulator whose clock starts at zero.
    pub fn new() -> Self {
        Simulator::new_at(Duration::ZERO)
    }

    /// A simulator whose clock starts at `start`.
    pub fn new_at(start: Duration) -> Self {
        Simulator {
            current_time: start,
            next_sequence: 0,
            queue: EventQueue::new(),
            actors: BTreeMap::new(),
            timers: BTreeSet::new(),
            duration_calculator: Box::new(SimpleActorDurationCalculator),
            trace: Vec::new(),
        }
    }

    /// Replace the per-hop duration calculator (default: zero).
    pub fn set_duration_calculator(&mut self, calculator: Box<dyn ActorDurationCalculator>) {
        self.duration_calculator = calculator;
    }

    /// Current virtual time.
    pub fn current_time(&self) -> Duration {
        self.current_time
    }

    /// Every delivery performed so far, in order.
    pub fn trace(&self) -> &[TraceEntry] {
        &self.trace
    }

    /// Register an actor owning the first element of `address`, and enqueue
    /// its priming message `start_delay` from now.
    pub fn add_coroutine_actor(
        &mut self,
        address: Address,
        actor: impl Coroutine + 'static,
        start_delay: Duration,
        priming: Payload,
    ) -> Result<(), SimulationError> {
        let prefix = address
            .element(0)
            .ok_or(SimulationError::EmptyAddress)?
            .to_string();
        if self.actors.contains_key(&prefix) || self.timers.contains(&prefix) {
            return Err(SimulationError::DuplicatePrefix(prefix));
        }
        self.actors.insert(
            prefix,
            ActorSlot {
                coroutine: Box::new(actor),
                context: Context::new(address.clone()),
            },
        );
        let priming = Message::new(address.clone(), address, priming);
        self.enqueue(priming, start_delay);
        Ok(())
    }

    /// Register a virtual timer gateway under `prefix`.
    pub fn add_timer(&mut self, prefix: impl Into<String>) -> Result<(), SimulationError> {
        let prefix = prefix.into();
        if prefix.is_empty() {
            return Err(SimulationError::EmptyAddress);
        }
        if self.actors.contains_key(&prefix) || !self.timers.insert(prefix.clone()) {
            return Err(SimulationError::DuplicatePrefix(prefix));
        }
        Ok(())
    }

    /// Drop the actor owning `prefix`. Messages already in flight to it are
    /// discarded when they arrive.
    pub fn remove_actor(&mut self, prefix: &str) -> Result<(), SimulationError> {
        self.actors
            .remove(prefix)
            .map(|_| ())
            .ok_or_else(|| SimulationError::UnknownPrefix(prefix.to_string()))
    }

    /// `true` while deliveries are pending.
    pub fn has_more(&self) -> bool {
        !self.queue.is_empty()
    }

    /// Deliver the next event, advancing the clock to its deliver-at time.
    /// Returns `true` if more events remain afterwards.
    pub fn process(&mut self) -> bool {
        if let Some(event) = self.queue.pop_earliest() {
            self.current_time = event.time();
            self.deliver(event.into_message());
        }
        self.has_more()
    }

    /// Process every pending event.
    pub fn run_until_empty(&mut self) {
        while self.process() {}
    }

    /// Process events with deliver-at ≤ `limit`, then stop. The clock never
    /// runs past the last delivered event.
    pub fn run_until(&mut self, limit: Duration) {
        while let Some(event) = self.queue.peek_earliest() {
            if event.time() > limit {
                break;
            }
            self.process();
        }
    }

    fn enqueue(&mut self, message: Message, delay: Duration) {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.queue.schedule(ScheduledEvent::new(
            self.current_time + delay,
            sequence,
            message,
        ));
    }

    fn deliver(&mut self, message: Message) {
        self.trace.push(TraceEntry {
            time: self.current_time,
            source: message.source().clone(),
            destination: message.destination().clone(),
        });

        let Some(prefix) = message.destination().element(0).map(str::to_string) else {
            warn!("delivery with empty destination, dropping");
            return;
        };

        if self.timers.contains(&prefix) {
            self.deliver_to_timer(message);
            return;
        }

        let Some(slot) = self.actors.get_mut(&prefix) else {
            debug!(prefix = %prefix, destination = %message.destination(), "no actor at destination, dropping");
            return;
        };

        slot.context.begin_step(&message, self.current_time);
        let result = slot.coroutine.resume(&mut slot.context);
        let outgoing = slot.context.end_step();

        match result {
            Ok(Continuation::Suspend) => {}
            Ok(Continuation::Finish) => {
                debug!(prefix = %prefix, "actor finished");
                self.actors.remove(&prefix);
            }
            Err(e) => {
                error!(prefix = %prefix, error = %e, "actor failed, terminating it");
                self.actors.remove(&prefix);
            }
        }

        self.route(outgoing);
    }

    /// Virtual twin of the timer gateway: echo the payload back to the
    /// sender after the delay named in the address.
    fn deliver_to_timer(&mut self, message: Message) {
        let Some(millis) = message
            .destination()
            .element(1)
            .and_then(|raw| raw.parse::<u64>().ok())
        else {
            warn!(destination = %message.destination(), "malformed timer delay, dropping");
            return;
        };
        let reply = message.readdressed(
            message.destination().clone(),
            message.source().clone(),
        );
        self.enqueue(reply, Duration::from_millis(millis));
    }

    fn route(&mut self, outgoing: Vec<Message>) {
        for message in outgoing {
            let Some(prefix) = message.destination().element(0) else {
                warn!("outgoing message with empty destination, dropping");
                continue;
            };
            if self.timers.contains(prefix) {
                // The timer's own delay governs; the hop itself is free.
                self.enqueue(message, Duration::ZERO);
            } else if self.actors.contains_key(prefix) {
                let delay = self.duration_calculator.delay(
                    message.source(),
                    message.destination(),
                    &message,
                );
                self.enqueue(message, delay);
            } else {
                warn!(prefix, "no actor or timer for destination prefix, dropping");
            }
        }
    }
}

impl Default for Simulator {
    fn default() -> Self {
        Simulator::new()
    }
}
