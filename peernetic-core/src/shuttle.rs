//! The shuttle capability: a one-way channel into a host or gateway.

use std::sync::{Arc, Mutex};

use tracing::warn;

use crate::Message;

/// A directed, one-way capability for delivering batches of [`Message`]s to
/// whatever owns a given address prefix.
///
/// Implementations must not block the caller indefinitely; any queueing
/// happens behind the shuttle with a backpressure policy the implementation
/// documents. Messages whose destination does not start with
/// [`Shuttle::prefix`] are discarded (with a warning), never delivered.
pub trait Shuttle: Send + Sync {
    /// The single address element this shuttle accepts messages under.
    fn prefix(&self) -> &str;

    /// Deliver an ordered batch of messages.
    fn submit(&self, messages: Vec<Message>);
}

/// Split a batch into the messages this shuttle may accept, warning about and
/// dropping the rest. Shared by shuttle implementations.
pub fn retain_routable(prefix: &str, messages: Vec<Message>) -> Vec<Message> {
    messages
        .into_iter()
        .filter(|msg| {
            let routable = msg.destination().element(0) == Some(prefix);
            if !routable {
                warn!(
                    destination = %msg.destination(),
                    prefix,
                    "discarding message not addressed under shuttle prefix"
                );
            }
            routable
        })
        .collect()
}

/// A shuttle that discards everything submitted to it.
#[derive(Debug)]
pub struct NullShuttle {
    prefix: String,
}

impl NullShuttle {
    /// Create a discarding shuttle for `prefix`.
    pub fn new(prefix: impl Into<String>) -> Self {
        NullShuttle { prefix: prefix.into() }
    }
}

impl Shuttle for NullShuttle {
    fn prefix(&self) -> &str {
        &self.prefix
    }

    fn submit(&self, _messages: Vec<Message>) {}
}

/// A shuttle that appends submitted messages to a shared buffer.
///
/// Used by tests and by the simulator to observe traffic without a live
/// consumer thread.
#[derive(Debug, Clone)]
pub struct RecordingShuttle {
    prefix: String,
    recorded: Arc<Mutex<Vec<Message>>>,
}

impl RecordingShuttle {
    /// Create a recording shuttle for `prefix`.
    pub fn new(prefix: impl Into<String>) -> Self {
        RecordingShuttle {
            prefix: prefix.into(),
            recorded: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Take everything recorded so far, leaving the buffer empty.
    pub fn take(&self) -> Vec<Message> {
        let mut recorded = self.recorded.lock().expect("recording buffer poisoned");
        std::mem::take(&mut *recorded)
    }

    /// Number of messages currently buffered.
    pub fn len(&self) -> usize {
        self.recorded.lock().expect("recording buffer poisoned").len()
    }

    /// `true` if nothing has been recorded since the last [`take`](Self::take).
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Shuttle for RecordingShuttle {
    fn prefix(&self) -> &str {
        &self.prefix
    }

    fn submit(&self, messages: Vec<Message>) {
        let routable = retain_routable(&self.prefix, messages);
        if routable.is_empty() {
            return;
        }
        let mut recorded = self.recorded.lock().expect("recording buffer poisoned");
        recorded.extend(routable);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::payload;

    fn msg(dst: &str) -> Message {
        Message::new("src:a".parse().unwrap(), dst.parse().unwrap(), payload(0u8))
    }

    #[test]
    fn recording_shuttle_keeps_order() {
        let shuttle = RecordingShuttle::new("x");
        shuttle.submit(vec![msg("x:1"), msg("x:2")]);
        shuttle.submit(vec![msg("x:3")]);

        let taken = shuttle.take();
        let dsts: Vec<String> = taken.iter().map(|m| m.destination().to_string()).collect();
        assert_eq!(dsts, ["x:1", "x:2", "x:3"]);
        assert!(shuttle.is_empty());
    }

    #[test]
    fn mismatched_prefix_is_dropped() {
        let shuttle = RecordingShuttle::new("x");
        shuttle.submit(vec![msg("y:1"), msg("x:1")]);
        assert_eq!(shuttle.len(), 1);
        assert_eq!(shuttle.take()[0].destination().to_string(), "x:1");
    }
}
