//! Timer gateway: echoes messages back to their sender after a delay.
//!
//! A message sent to `<prefix>:<millis>[:suffix...]` comes back to its
//! source after `millis` milliseconds, with the original payload and with
//! the full timer destination as its source (so suffix elements survive the
//! round trip). Ties on the same deadline fire in arrival order.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{error, warn};

use peernetic_core::{retain_routable, Message, Shuttle};

use crate::gateway::{GatewayError, InputGateway, OutputGateway};

struct TimerEntry {
    fire_at: Duration,
    seq: u64,
    reply: Message,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.fire_at == other.fire_at && self.seq == other.seq
    }
}

impl Eq for TimerEntry {}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.fire_at
            .cmp(&other.fire_at)
            .then(self.seq.cmp(&other.seq))
    }
}

struct TimerState {
    queue: BinaryHeap<Reverse<TimerEntry>>,
    next_seq: u64,
    closed: bool,
}

struct TimerInner {
    start: Instant,
    state: Mutex<TimerState>,
    wakeup: Condvar,
    outgoing: Mutex<HashMap<String, Arc<dyn Shuttle>>>,
}

/// The production timer gateway: one monotonic timer thread per gateway.
pub struct TimerGateway {
    prefix: String,
    inner: Arc<TimerInner>,
    worker: Option<JoinHandle<()>>,
}

impl TimerGateway {
    /// Create a timer gateway accepting messages under `prefix`
    /// (conventionally `"timer"`).
    pub fn new(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        let inner = Arc::new(TimerInner {
            start: Instant::now(),
            state: Mutex::new(TimerState {
                queue: BinaryHeap::new(),
                next_seq: 0,
                closed: false,
            }),
            wakeup: Condvar::new(),
            outgoing: Mutex::new(HashMap::new()),
        });
        let worker_inner = Arc::clone(&inner);
        let worker = std::thread::Builder::new()
            .name(format!("timer-gateway-{prefix}"))
            .spawn(move || timer_loop(worker_inner))
            .expect("failed to spawn timer gateway thread");
        TimerGateway {
            prefix,
            inner,
            worker: Some(worker),
        }
    }

    /// The prefix this gateway listens under.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Stop the timer thread. Idempotent; pending (unfired) replies are
    /// dropped.
    pub fn close(&mut self) {
        {
            let mut state = self.inner.state.lock().expect("timer lock poisoned");
            state.closed = true;
        }
        self.inner.wakeup.notify_all();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!(prefix = %self.prefix, "timer gateway worker panicked");
            }
        }
    }
}

impl InputGateway for TimerGateway {
    fn incoming_shuttle(&self) -> Arc<dyn Shuttle> {
        Arc::new(TimerShuttle {
            prefix: self.prefix.clone(),
            inner: Arc::clone(&self.inner),
        })
    }
}

impl OutputGateway for TimerGateway {
    fn add_outgoing_shuttle(&self, shuttle: Arc<dyn Shuttle>) -> Result<(), GatewayError> {
        let mut outgoing = self.inner.outgoing.lock().expect("timer lock poisoned");
        let prefix = shuttle.prefix().to_string();
        if outgoing.contains_key(&prefix) {
            return Err(GatewayError::DuplicateOutgoingPrefix(prefix));
        }
        outgoing.insert(prefix, shuttle);
        Ok(())
    }

    fn remove_outgoing_shuttle(&self, prefix: &str) -> Result<(), GatewayError> {
        let mut outgoing = self.inner.outgoing.lock().expect("timer lock poisoned");
        if outgoing.remove(prefix).is_none() {
            return Err(GatewayError::UnknownOutgoingPrefix(prefix.to_string()));
        }
        Ok(())
    }
}

impl Drop for TimerGateway {
    fn drop(&mut self) {
        self.close();
    }
}

struct TimerShuttle {
    prefix: String,
    inner: Arc<TimerInner>,
}

impl Shuttle for TimerShuttle {
    fn prefix(&self) -> &str {
        &self.prefix
    }

    fn submit(&self, messages: Vec<Message>) {
        let now = self.inner.start.elapsed();
        let mut state = self.inner.state.lock().expect("timer lock poisoned");
        if state.closed {
            return;
        }
        let mut scheduled = false;
        for message in retain_routable(&self.prefix, messages) {
            let Some(millis) = message
                .destination()
                .element(1)
                .and_then(|raw| raw.parse::<u64>().ok())
            else {
                warn!(destination = %message.destination(), "malformed timer delay, dropping");
                continue;
            };
            let reply = message.readdressed(
                message.destination().clone(),
                message.source().clone(),
            );
            let seq = state.next_seq;
            state.next_seq += 1;
            state.queue.push(Reverse(TimerEntry {
                fire_at: now + Duration::from_millis(millis),
                seq,
                reply,
            }));
            scheduled = true;
        }
        if scheduled {
            self.inner.wakeup.notify_all();
        }
    }
}

fn timer_loop(inner: Arc<TimerInner>) {
    let mut state = inner.state.lock().expect("timer lock poisoned");
    loop {
        if state.closed {
            return;
        }
        let now = inner.start.elapsed();
        let next_fire = state.queue.peek().map(|scheduled| scheduled.0.fire_at);
        match next_fire {
            None => {
                state = inner.wakeup.wait(state).expect("timer lock poisoned");
            }
            Some(fire_at) if fire_at > now => {
                let (next, _) = inner
                    .wakeup
                    .wait_timeout(state, fire_at - now)
                    .expect("timer lock poisoned");
                state = next;
            }
            Some(_) => {
                let Reverse(entry) = state.queue.pop().expect("peeked entry exists");
                // Deliver without holding the schedule lock.
                drop(state);
                deliver(&inner, entry.reply);
                state = inner.state.lock().expect("timer lock poisoned");
            }
        }
    }
}

fn deliver(inner: &TimerInner, reply: Message) {
    let outgoing = inner.outgoing.lock().expect("timer lock poisoned");
    let Some(prefix) = reply.destination().element(0) else {
        warn!("timer reply with empty destination, dropping");
        return;
    };
    match outgoing.get(prefix) {
        Some(shuttle) => shuttle.submit(vec![reply]),
        None => warn!(prefix, "no outgoing shuttle for timer reply, dropping"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use peernetic_core::{payload, RecordingShuttle};

    fn wait_for<F: Fn() -> bool>(cond: F) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(Instant::now() < deadline, "condition not met in time");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn echoes_payload_back_after_delay() {
        let mut gateway = TimerGateway::new("timer");
        let sink = Arc::new(RecordingShuttle::new("a"));
        gateway
            .add_outgoing_shuttle(sink.clone() as Arc<dyn Shuttle>)
            .unwrap();

        gateway.incoming_shuttle().submit(vec![Message::new(
            "a:x".parse().unwrap(),
            "timer:20:extra".parse().unwrap(),
            payload(42u64),
        )]);

        wait_for(|| !sink.is_empty());
        let replies = sink.take();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].source().to_string(), "timer:20:extra");
        assert_eq!(replies[0].destination().to_string(), "a:x");
        assert_eq!(*replies[0].payload_as::<u64>().unwrap(), 42);

        gateway.close();
    }

    #[test]
    fn same_deadline_fires_in_arrival_order() {
        let mut gateway = TimerGateway::new("timer");
        let sink = Arc::new(RecordingShuttle::new("a"));
        gateway
            .add_outgoing_shuttle(sink.clone() as Arc<dyn Shuttle>)
            .unwrap();

        let incoming = gateway.incoming_shuttle();
        incoming.submit(vec![
            Message::new(
                "a:x".parse().unwrap(),
                "timer:30".parse().unwrap(),
                payload(1u8),
            ),
            Message::new(
                "a:x".parse().unwrap(),
                "timer:30".parse().unwrap(),
                payload(2u8),
            ),
        ]);

        wait_for(|| sink.len() == 2);
        let order: Vec<u8> = sink
            .take()
            .iter()
            .map(|m| *m.payload_as::<u8>().unwrap())
            .collect();
        assert_eq!(order, [1, 2]);

        gateway.close();
    }

    #[test]
    fn malformed_millis_is_dropped() {
        let mut gateway = TimerGateway::new("timer");
        let sink = Arc::new(RecordingShuttle::new("a"));
        gateway
            .add_outgoing_shuttle(sink.clone() as Arc<dyn Shuttle>)
            .unwrap();

        let incoming = gateway.incoming_shuttle();
        incoming.submit(vec![
            Message::new(
                "a:x".parse().unwrap(),
                "timer:soon".parse().unwrap(),
                payload(1u8),
            ),
            Message::new(
                "a:x".parse().unwrap(),
                "timer:0".parse().unwrap(),
                payload(2u8),
            ),
        ]);

        wait_for(|| !sink.is_empty());
        let replies = sink.take();
        assert_eq!(replies.len(), 1);
        assert_eq!(*replies[0].payload_as::<u8>().unwrap(), 2);

        gateway.close();
    }

    #[test]
    fn duplicate_outgoing_prefix_is_rejected() {
        let gateway = TimerGateway::new("timer");
        let sink = Arc::new(RecordingShuttle::new("a"));
        gateway
            .add_outgoing_shuttle(sink.clone() as Arc<dyn Shuttle>)
            .unwrap();
        assert!(matches!(
            gateway.add_outgoing_shuttle(sink as Arc<dyn Shuttle>),
            Err(GatewayError::DuplicateOutgoingPrefix(_))
        ));
        assert!(matches!(
            gateway.remove_outgoing_shuttle("nope"),
            Err(GatewayError::UnknownOutgoingPrefix(_))
        ));
    }
}
