//! The threaded actor host.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{debug, error, warn};

use peernetic_core::{Address, Message, Payload, Shuttle};

use crate::actor::{Context, Continuation, Coroutine};
use crate::bus::{Bus, BusRecord, BusShuttle};
use crate::gateway::{GatewayError, InputGateway, OutputGateway};

const DRAIN_BATCH: usize = 64;
const DRAIN_TIMEOUT: Duration = Duration::from_millis(100);

/// Hosts actors under one address prefix on a single worker thread.
///
/// Incoming messages arrive through the runner's incoming shuttle
/// ([`InputGateway::incoming_shuttle`]) and are dispatched by local id (the
/// second destination element). Actors run cooperatively: at most one actor
/// in the runner executes at a time, and each processes exactly one message
/// per resume. Outgoing messages are batched by destination prefix and
/// submitted to the matching registered outgoing shuttle.
///
/// # Example
///
/// ```no_run
/// use peernetic_core::payload;
/// use peernetic_runtime::actor::{ActorRunner, Continuation};
/// use peernetic_runtime::gateway::{InputGateway, OutputGateway};
///
/// use peernetic_runtime::actor::{BoxError, Context};
///
/// let mut runner = ActorRunner::new("host");
/// // Route self-addressed traffic back into the runner.
/// runner.add_outgoing_shuttle(runner.incoming_shuttle()).unwrap();
/// runner.add_coroutine_actor(
///     "echoer",
///     |ctx: &mut Context| -> Result<Continuation, BoxError> {
///         let src = ctx.source().clone();
///         let incoming = ctx.incoming().clone();
///         ctx.out(src, incoming);
///         Ok(Continuation::Suspend)
///     },
///     payload(()),
/// ).unwrap();
/// ```
pub struct ActorRunner {
    prefix: String,
    bus: Bus,
    worker: Option<JoinHandle<()>>,
}

impl ActorRunner {
    /// Create a runner and start its worker thread.
    pub fn new(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        let bus = Bus::new();
        let worker_bus = bus.clone();
        let worker_prefix = prefix.clone();
        let worker = std::thread::Builder::new()
            .name(format!("actor-runner-{prefix}"))
            .spawn(move || Worker::new(worker_prefix, worker_bus).run())
            .expect("failed to spawn actor runner thread");
        ActorRunner {
            prefix,
            bus,
            worker: Some(worker),
        }
    }

    /// The address prefix this runner hosts actors under.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Host an actor under `id`. The priming payload is delivered on the
    /// worker thread as the actor's first incoming message, addressed from
    /// and to the actor itself.
    pub fn add_coroutine_actor(
        &self,
        id: impl Into<String>,
        actor: impl Coroutine + 'static,
        priming: Payload,
    ) -> Result<(), GatewayError> {
        self.bus
            .push(BusRecord::AddActor {
                id: id.into(),
                actor: Box::new(actor),
                priming,
            })
            .map_err(|_| GatewayError::Closed)
    }

    /// Terminate the actor under `id` after any in-flight step.
    pub fn remove_actor(&self, id: impl Into<String>) -> Result<(), GatewayError> {
        self.bus
            .push(BusRecord::RemoveActor { id: id.into() })
            .map_err(|_| GatewayError::Closed)
    }

    /// Shut the runner down: stop draining, drop actors, join the worker.
    /// Idempotent. Pending outgoing messages may be dropped.
    pub fn close(&mut self) {
        self.bus.close();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!(prefix = %self.prefix, "actor runner worker panicked");
            }
        }
    }
}

impl InputGateway for ActorRunner {
    fn incoming_shuttle(&self) -> Arc<dyn Shuttle> {
        Arc::new(BusShuttle::new(self.prefix.clone(), self.bus.clone()))
    }
}

impl OutputGateway for ActorRunner {
    fn add_outgoing_shuttle(&self, shuttle: Arc<dyn Shuttle>) -> Result<(), GatewayError> {
        self.bus
            .push(BusRecord::AddShuttle(shuttle))
            .map_err(|_| GatewayError::Closed)
    }

    fn remove_outgoing_shuttle(&self, prefix: &str) -> Result<(), GatewayError> {
        self.bus
            .push(BusRecord::RemoveShuttle(prefix.to_string()))
            .map_err(|_| GatewayError::Closed)
    }
}

impl Drop for ActorRunner {
    fn drop(&mut self) {
        self.close();
    }
}

struct ActorSlot {
    coroutine: Box<dyn Coroutine>,
    context: Context,
}

/// Worker-thread state: everything here is owned by the drain loop.
struct Worker {
    prefix: String,
    bus: Bus,
    started: Instant,
    actors: HashMap<String, ActorSlot>,
    outgoing: HashMap<String, Arc<dyn Shuttle>>,
}

impl Worker {
    fn new(prefix: String, bus: Bus) -> Self {
        Worker {
            prefix,
            bus,
            started: Instant::now(),
            actors: HashMap::new(),
            outgoing: HashMap::new(),
        }
    }

    fn run(mut self) {
        loop {
            for record in self.bus.drain(DRAIN_BATCH, DRAIN_TIMEOUT) {
                match record {
                    BusRecord::AddShuttle(shuttle) => {
                        let prefix = shuttle.prefix().to_string();
                        if self.outgoing.insert(prefix.clone(), shuttle).is_some() {
                            warn!(prefix = %prefix, "replaced existing outgoing shuttle");
                        }
                    }
                    BusRecord::RemoveShuttle(prefix) => {
                        if self.outgoing.remove(&prefix).is_none() {
                            warn!(prefix = %prefix, "removed unknown outgoing shuttle");
                        }
                    }
                    BusRecord::AddActor { id, actor, priming } => self.add_actor(id, actor, priming),
                    BusRecord::RemoveActor { id } => {
                        if self.actors.remove(&id).is_none() {
                            warn!(id = %id, "removed unknown actor");
                        }
                    }
                    BusRecord::Deliver(messages) => {
                        for message in messages {
                            self.dispatch(&message);
                        }
                    }
                    BusRecord::Close => return,
                }
            }
        }
    }

    fn now(&self) -> Duration {
        self.started.elapsed()
    }

    fn add_actor(&mut self, id: String, actor: Box<dyn Coroutine>, priming: Payload) {
        if self.actors.contains_key(&id) {
            warn!(id = %id, "actor id already hosted, dropping new actor");
            return;
        }
        let self_address = Address::of([self.prefix.as_str(), id.as_str()])
            .expect("runner prefix and actor id are validated non-empty");
        let slot = ActorSlot {
            coroutine: actor,
            context: Context::new(self_address.clone()),
        };
        self.actors.insert(id.clone(), slot);

        let priming = Message::new(self_address.clone(), self_address, priming);
        self.dispatch(&priming);
    }

    fn dispatch(&mut self, message: &Message) {
        let Some(id) = message.destination().element(1).map(str::to_string) else {
            warn!(destination = %message.destination(), "message has no local id, dropping");
            return;
        };
        let now = self.now();
        let Some(slot) = self.actors.get_mut(&id) else {
            debug!(id = %id, destination = %message.destination(), "no actor at destination, dropping");
            return;
        };

        slot.context.begin_step(message, now);
        let result = slot.coroutine.resume(&mut slot.context);
        let outgoing = slot.context.end_step();

        match result {
            Ok(Continuation::Suspend) => {}
            Ok(Continuation::Finish) => {
                debug!(id = %id, "actor finished");
                self.actors.remove(&id);
            }
            Err(e) => {
                error!(id = %id, error = %e, "actor failed, terminating it");
                self.actors.remove(&id);
            }
        }

        self.route(outgoing);
    }

    /// Batch outgoing messages by destination prefix and submit each batch
    /// to its registered shuttle. Program order is preserved within a
    /// prefix, which gives per-(source, destination) FIFO.
    fn route(&mut self, outgoing: Vec<Message>) {
        if outgoing.is_empty() {
            return;
        }
        let mut batches: BTreeMap<String, Vec<Message>> = BTreeMap::new();
        for message in outgoing {
            match message.destination().element(0) {
                Some(prefix) => batches
                    .entry(prefix.to_string())
                    .or_default()
                    .push(message),
                None => {
                    warn!("outgoing message with empty destination, dropping");
                }
            }
        }
        for (prefix, batch) in batches {
            match self.outgoing.get(&prefix) {
                Some(shuttle) => shuttle.submit(batch),
                None => warn!(
                    prefix,
                    dropped = batch.len(),
                    "no outgoing shuttle for destination prefix"
                ),
            }
        }
    }
}
