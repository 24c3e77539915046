//! Per-actor execution context.

use std::any::Any;
use std::time::Duration;

use peernetic_core::{Address, Message, Payload};

/// State handed to an actor on every resume.
///
/// The self address and clock outlive the step; source, destination and the
/// incoming payload are only meaningful while the actor is being resumed.
/// Outgoing messages accumulate in a buffer the host flushes after the step,
/// so everything produced in one resume is emitted before the actor sees its
/// next message.
pub struct Context {
    self_address: Address,
    time: Duration,
    source: Address,
    destination: Address,
    incoming: Option<Payload>,
    outgoing: Vec<Message>,
}

impl Context {
    /// Create a context for an actor at `self_address`.
    ///
    /// Called by hosts (runners, simulators, test harnesses); actors receive
    /// an already-built context.
    pub fn new(self_address: Address) -> Self {
        Context {
            self_address,
            time: Duration::ZERO,
            source: Address::empty(),
            destination: Address::empty(),
            incoming: None,
            outgoing: Vec::new(),
        }
    }

    /// Install the current incoming message before a resume. Host API.
    pub fn begin_step(&mut self, message: &Message, time: Duration) {
        self.source = message.source().clone();
        self.destination = message.destination().clone();
        self.incoming = Some(message.payload().clone());
        self.time = time;
    }

    /// Clear step-scoped state and hand back everything the actor sent.
    /// Host API.
    pub fn end_step(&mut self) -> Vec<Message> {
        self.source = Address::empty();
        self.destination = Address::empty();
        self.incoming = None;
        std::mem::take(&mut self.outgoing)
    }

    /// This actor's own address.
    pub fn self_address(&self) -> &Address {
        &self.self_address
    }

    /// Source address of the current incoming message.
    pub fn source(&self) -> &Address {
        &self.source
    }

    /// Destination address of the current incoming message. May be longer
    /// than the self address when the message targets a subcoroutine.
    pub fn destination(&self) -> &Address {
        &self.destination
    }

    /// Current time: virtual in the simulator, time since host start in
    /// production.
    pub fn time(&self) -> Duration {
        self.time
    }

    /// The current incoming payload.
    ///
    /// # Panics
    ///
    /// Panics if called outside a resume step; the host always installs a
    /// payload before resuming.
    pub fn incoming(&self) -> &Payload {
        self.incoming
            .as_ref()
            .expect("incoming payload accessed outside a resume step")
    }

    /// Incoming payload downcast to a concrete type.
    pub fn incoming_as<T: Any>(&self) -> Option<&T> {
        peernetic_core::payload_as::<T>(self.incoming())
    }

    /// Queue an outgoing message from this actor's self address.
    pub fn out(&mut self, destination: Address, payload: Payload) {
        let source = self.self_address.clone();
        self.outgoing.push(Message::new(source, destination, payload));
    }

    /// Queue an outgoing message from a sub-address of this actor
    /// (`self ++ source_suffix`). Used by subcoroutines so replies route
    /// back to the child that asked.
    pub fn out_from(&mut self, source_suffix: &Address, destination: Address, payload: Payload) {
        let source = self.self_address.append_suffix(source_suffix);
        self.outgoing.push(Message::new(source, destination, payload));
    }

    /// Messages queued so far in this step.
    pub fn outgoing_len(&self) -> usize {
        self.outgoing.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use peernetic_core::payload;

    #[test]
    fn step_scoped_fields_reset_between_resumes() {
        let mut ctx = Context::new("host:a".parse().unwrap());
        let msg = Message::new(
            "host:b".parse().unwrap(),
            "host:a:sub".parse().unwrap(),
            payload(5u32),
        );

        ctx.begin_step(&msg, Duration::from_millis(7));
        assert_eq!(ctx.source().to_string(), "host:b");
        assert_eq!(ctx.destination().to_string(), "host:a:sub");
        assert_eq!(ctx.incoming_as::<u32>(), Some(&5));
        assert_eq!(ctx.time(), Duration::from_millis(7));

        ctx.out("host:b".parse().unwrap(), payload(6u32));
        let outgoing = ctx.end_step();
        assert_eq!(outgoing.len(), 1);
        assert_eq!(outgoing[0].source().to_string(), "host:a");
        assert!(ctx.source().is_empty());
    }

    #[test]
    fn out_from_extends_the_source() {
        let mut ctx = Context::new("host:a".parse().unwrap());
        let suffix: Address = "router:q".parse().unwrap();
        ctx.out_from(&suffix, "timer:100".parse().unwrap(), payload(()));
        let outgoing = ctx.end_step();
        assert_eq!(outgoing[0].source().to_string(), "host:a:router:q");
    }
}
