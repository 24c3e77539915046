//! Scheduled events for the deterministic simulator.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Duration;

use peernetic_core::Message;

/// A message delivery scheduled at a virtual time.
///
/// Ordering is `(time asc, sequence asc)`; the monotonically increasing
/// sequence number makes same-instant deliveries deterministic.
#[derive(Debug, Clone)]
pub struct ScheduledEvent {
    time: Duration,
    sequence: u64,
    message: Message,
}

impl ScheduledEvent {
    /// Create a scheduled delivery.
    pub fn new(time: Duration, sequence: u64, message: Message) -> Self {
        ScheduledEvent { time, sequence, message }
    }

    /// Virtual delivery time.
    pub fn time(&self) -> Duration {
        self.time
    }

    /// Tie-break sequence number.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// The message to deliver.
    pub fn message(&self) -> &Message {
        &self.message
    }

    /// Consume the event, yielding its message.
    pub fn into_message(self) -> Message {
        self.message
    }
}

impl PartialEq for ScheduledEvent {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.sequence == other.sequence
    }
}

impl Eq for ScheduledEvent {}

impl PartialOrd for ScheduledEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; reverse both keys so the earliest time
        // (then lowest sequence) pops first.
        match other.time.cmp(&self.time) {
            Ordering::Equal => other.sequence.cmp(&self.sequence),
            ordering => ordering,
        }
    }
}

/// Priority queue of [`ScheduledEvent`]s in virtual-time order.
#[derive(Debug, Default)]
pub struct EventQueue {
    heap: BinaryHeap<ScheduledEvent>,
}

impl EventQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        EventQueue { heap: BinaryHeap::new() }
    }

    /// Schedule an event.
    pub fn schedule(&mut self, event: ScheduledEvent) {
        self.heap.push(event);
    }

    /// Remove and return the earliest event.
    pub fn pop_earliest(&mut self) -> Option<ScheduledEvent> {
        self.heap.pop()
    }

    /// Look at the earliest event without removing it.
    pub fn peek_earliest(&self) -> Option<&ScheduledEvent> {
        self.heap.peek()
    }

    /// `true` if nothing is scheduled.
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Number of scheduled events.
    pub fn len(&self) -> usize {
        self.heap.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use peernetic_core::payload;

    fn event(millis: u64, sequence: u64) -> ScheduledEvent {
        ScheduledEvent::new(
            Duration::from_millis(millis),
            sequence,
            Message::new(
                "a:s".parse().unwrap(),
                "b:d".parse().unwrap(),
                payload(sequence),
            ),
        )
    }

    #[test]
    fn pops_in_time_order() {
        let mut queue = EventQueue::new();
        queue.schedule(event(300, 2));
        queue.schedule(event(100, 0));
        queue.schedule(event(200, 1));

        let times: Vec<u64> = std::iter::from_fn(|| queue.pop_earliest())
            .map(|e| e.time().as_millis() as u64)
            .collect();
        assert_eq!(times, [100, 200, 300]);
    }

    #[test]
    fn same_time_breaks_ties_by_sequence() {
        let mut queue = EventQueue::new();
        queue.schedule(event(100, 5));
        queue.schedule(event(100, 1));
        queue.schedule(event(100, 3));

        let seqs: Vec<u64> = std::iter::from_fn(|| queue.pop_earliest())
            .map(|e| e.sequence())
            .collect();
        assert_eq!(seqs, [1, 3, 5]);
    }
}
