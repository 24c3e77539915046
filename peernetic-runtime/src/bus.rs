//! Multi-producer single-consumer record queue backing hosts and gateways.
//!
//! A [`Bus`] decouples the threads that produce work (shuttle submissions,
//! actor management, shutdown) from the single worker thread that consumes
//! it. Producers [`push`](Bus::push) records without blocking beyond the
//! configured overflow policy; the consumer [`drain`](Bus::drain)s batches
//! with a bounded wait.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use thiserror::Error;
use tracing::warn;

use peernetic_core::{retain_routable, Message, Payload, Shuttle};

use crate::actor::Coroutine;

/// Errors raised by [`Bus::push`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusError {
    /// The bus was closed; the record was not enqueued.
    #[error("bus is closed")]
    Closed,
    /// The bus is full and was constructed with [`OverflowPolicy::Fail`].
    #[error("bus is full (capacity {0})")]
    Full(usize),
}

/// What `push` does when the queue is at capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Block the producer until space frees up.
    Block,
    /// Evict the oldest queued record, then enqueue.
    DropOldest,
    /// Refuse the record with [`BusError::Full`].
    Fail,
}

/// A unit of work queued on a [`Bus`].
pub enum BusRecord {
    /// Register an outgoing shuttle with the consumer.
    AddShuttle(Arc<dyn Shuttle>),
    /// Deregister the outgoing shuttle for a prefix.
    RemoveShuttle(String),
    /// Host a new actor under a local id, priming it with a payload.
    AddActor {
        /// Local id (second address element under the host prefix).
        id: String,
        /// The actor itself.
        actor: Box<dyn Coroutine>,
        /// Payload delivered as the actor's first incoming message.
        priming: Payload,
    },
    /// Terminate and drop the actor under a local id.
    RemoveActor {
        /// Local id of the actor to drop.
        id: String,
    },
    /// An ordered batch of messages to dispatch.
    Deliver(Vec<Message>),
    /// Shut the consumer down. Close is idempotent.
    Close,
}

impl std::fmt::Debug for BusRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BusRecord::AddShuttle(s) => f.debug_tuple("AddShuttle").field(&s.prefix()).finish(),
            BusRecord::RemoveShuttle(p) => f.debug_tuple("RemoveShuttle").field(p).finish(),
            BusRecord::AddActor { id, .. } => f.debug_struct("AddActor").field("id", id).finish(),
            BusRecord::RemoveActor { id } => {
                f.debug_struct("RemoveActor").field("id", id).finish()
            }
            BusRecord::Deliver(msgs) => f.debug_tuple("Deliver").field(&msgs.len()).finish(),
            BusRecord::Close => f.write_str("Close"),
        }
    }
}

struct BusState {
    queue: VecDeque<BusRecord>,
    closed: bool,
}

struct BusInner {
    state: Mutex<BusState>,
    // Signals consumers when records arrive and producers when space frees.
    available: Condvar,
    space: Condvar,
    capacity: usize,
    policy: OverflowPolicy,
}

/// Thread-safe FIFO of [`BusRecord`]s. Cloning a `Bus` clones a handle to
/// the same queue.
#[derive(Clone)]
pub struct Bus {
    inner: Arc<BusInner>,
}

impl Bus {
    /// An effectively unbounded bus (capacity `usize::MAX`, block policy).
    pub fn new() -> Self {
        Bus::bounded(usize::MAX, OverflowPolicy::Block)
    }

    /// A bounded bus with the given overflow policy. Capacity is clamped to
    /// at least one record.
    pub fn bounded(capacity: usize, policy: OverflowPolicy) -> Self {
        Bus {
            inner: Arc::new(BusInner {
                state: Mutex::new(BusState {
                    queue: VecDeque::new(),
                    closed: false,
                }),
                available: Condvar::new(),
                space: Condvar::new(),
                capacity: capacity.max(1),
                policy,
            }),
        }
    }

    /// Append a record.
    ///
    /// Non-blocking except under [`OverflowPolicy::Block`] when at capacity.
    /// [`BusRecord::Close`] is always accepted while the bus is open so a
    /// full bus can still be shut down.
    pub fn push(&self, record: BusRecord) -> Result<(), BusError> {
        let mut state = self.inner.state.lock().expect("bus lock poisoned");
        if state.closed {
            return Err(BusError::Closed);
        }
        if matches!(record, BusRecord::Close) {
            state.closed = true;
            state.queue.push_back(record);
            self.inner.available.notify_all();
            self.inner.space.notify_all();
            return Ok(());
        }
        while state.queue.len() >= self.inner.capacity {
            match self.inner.policy {
                OverflowPolicy::Block => {
                    state = self
                        .inner
                        .space
                        .wait(state)
                        .expect("bus lock poisoned");
                    if state.closed {
                        return Err(BusError::Closed);
                    }
                }
                OverflowPolicy::DropOldest => {
                    let evicted = state.queue.pop_front();
                    warn!(record = ?evicted, "bus full, evicting oldest record");
                }
                OverflowPolicy::Fail => return Err(BusError::Full(self.inner.capacity)),
            }
        }
        state.queue.push_back(record);
        self.inner.available.notify_one();
        Ok(())
    }

    /// Remove and return up to `max` records, waiting up to `timeout` for
    /// the first one. Returns an empty batch on timeout. A pending drain is
    /// woken by [`close`](Bus::close).
    pub fn drain(&self, max: usize, timeout: Duration) -> Vec<BusRecord> {
        let mut state = self.inner.state.lock().expect("bus lock poisoned");
        if state.queue.is_empty() && !state.closed {
            let (next, _timed_out) = self
                .inner
                .available
                .wait_timeout(state, timeout)
                .expect("bus lock poisoned");
            state = next;
        }
        let take = state.queue.len().min(max);
        let batch: Vec<BusRecord> = state.queue.drain(..take).collect();
        if take > 0 {
            self.inner.space.notify_all();
        }
        batch
    }

    /// Close the bus. Idempotent; wakes any pending drain and unblocks
    /// producers.
    pub fn close(&self) {
        let mut state = self.inner.state.lock().expect("bus lock poisoned");
        if state.closed {
            return;
        }
        state.closed = true;
        state.queue.push_back(BusRecord::Close);
        self.inner.available.notify_all();
        self.inner.space.notify_all();
    }

    /// `true` once [`close`](Bus::close) (or a pushed `Close` record) has
    /// been observed.
    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().expect("bus lock poisoned").closed
    }
}

impl Default for Bus {
    fn default() -> Self {
        Bus::new()
    }
}

/// A [`Shuttle`] whose `submit` enqueues a [`BusRecord::Deliver`] on a bus.
///
/// This is the incoming shuttle handed out by hosts and gateways.
pub struct BusShuttle {
    prefix: String,
    bus: Bus,
}

impl BusShuttle {
    /// Create a bus-backed shuttle accepting messages under `prefix`.
    pub fn new(prefix: impl Into<String>, bus: Bus) -> Self {
        BusShuttle { prefix: prefix.into(), bus }
    }
}

impl Shuttle for BusShuttle {
    fn prefix(&self) -> &str {
        &self.prefix
    }

    fn submit(&self, messages: Vec<Message>) {
        let routable = retain_routable(&self.prefix, messages);
        if routable.is_empty() {
            return;
        }
        if let Err(e) = self.bus.push(BusRecord::Deliver(routable)) {
            // Submitting into a closed host is a delivery failure, not a
            // caller error.
            warn!(prefix = %self.prefix, error = %e, "dropping batch");
        }
    }
}
