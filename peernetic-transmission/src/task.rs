//! The transmission coroutine: at-least-once request/response semantics.
//!
//! Sits between a user actor and the network-facing world, as an ordinary
//! actor. Outbound flow: the user addresses a request *through* the
//! transmission actor (`<trans>:<remote...>`); the transmission actor
//! registers it, sends it, re-sends it on the configured schedule, and
//! suppresses duplicates of the eventual response. Inbound flow: fresh
//! requests are forwarded up to the user with the remote source grafted
//! under the transmission address, so the user's reply naturally routes
//! back through the same layer; duplicate requests within the retention
//! window are dropped, never forwarded twice.
//!
//! Resend and discard timing rides on a timer gateway: every scheduled
//! action is a self-addressed payload parked at `<timer>:<millis>`.

use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::Hash;
use std::time::Duration;

use tracing::{debug, warn};

use peernetic_core::{payload, Address, Payload};
use peernetic_runtime::actor::{BoxError, Context, Continuation, Coroutine};

use crate::nonce::{Nonce, SharedNonceAccessor};
use crate::params::{MessageClass, TypeMappings};
use crate::TransmissionError;

/// Notification delivered to the user actor when a request's retention
/// expired without any response having arrived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestTimedOut<N> {
    nonce: Nonce<N>,
}

impl<N> RequestTimedOut<N> {
    /// The nonce of the request that timed out.
    pub fn nonce(&self) -> &Nonce<N> {
        &self.nonce
    }
}

/// Self-addressed timer payloads driving resends and cache eviction.
enum TransmissionEvent<N> {
    ResendRequest(Nonce<N>),
    DiscardOutgoingRequest(Nonce<N>),
    DiscardOutgoingResponse(Nonce<N>),
    DiscardIncomingRequest(Nonce<N>),
    DiscardIncomingResponse(Nonce<N>),
}

struct OutgoingRequestState {
    destination: Address,
    payload: Payload,
    send_count: usize,
    remaining_schedule: VecDeque<Duration>,
    responded: bool,
}

/// The request/response reliability layer, hosted like any other actor.
pub struct TransmissionCoroutine<N> {
    timer_prefix: Address,
    user: Address,
    accessor: SharedNonceAccessor<N>,
    mappings: TypeMappings,
    outgoing_requests: HashMap<Nonce<N>, OutgoingRequestState>,
    // Presence plus a discard timer is everything the dispatch rules read
    // for these three.
    outgoing_responses: HashSet<Nonce<N>>,
    incoming_requests: HashSet<Nonce<N>>,
    incoming_responses: HashSet<Nonce<N>>,
}

impl<N> TransmissionCoroutine<N>
where
    N: Clone + Eq + Hash + Send + Sync + 'static,
{
    /// Create a transmission layer.
    ///
    /// `timer_prefix` names the timer gateway to schedule against; `user`
    /// is the address of the actor whose traffic is being made reliable.
    pub fn new(
        timer_prefix: Address,
        user: Address,
        accessor: SharedNonceAccessor<N>,
        mappings: TypeMappings,
    ) -> Self {
        TransmissionCoroutine {
            timer_prefix,
            user,
            accessor,
            mappings,
            outgoing_requests: HashMap::new(),
            outgoing_responses: HashSet::new(),
            incoming_requests: HashSet::new(),
            incoming_responses: HashSet::new(),
        }
    }

    /// Number of requests awaiting a response or discard.
    pub fn outstanding_requests(&self) -> usize {
        self.outgoing_requests.len()
    }

    fn park(&self, ctx: &mut Context, delay: Duration, event: TransmissionEvent<N>) {
        let destination = self
            .timer_prefix
            .append_element(delay.as_millis().to_string());
        ctx.out(destination, payload(event));
    }

    fn handle_outbound(&mut self, ctx: &mut Context) -> Result<(), BoxError> {
        let message_payload = ctx.incoming().clone();
        let Some(nonce) = self.accessor.get(&message_payload) else {
            return Err(TransmissionError::NonceExtraction.into());
        };
        let Some(class) = self.mappings.class_for(&message_payload).cloned() else {
            return Err(TransmissionError::UnmappedOutgoingType.into());
        };
        let remote = match ctx.destination().remove_prefix(ctx.self_address()) {
            Ok(remote) if !remote.is_empty() => remote,
            _ => {
                warn!(destination = %ctx.destination(), "outbound message without remote suffix, dropping");
                return Ok(());
            }
        };

        match class {
            MessageClass::Request {
                resend_schedule,
                retain_for,
            } => {
                if self.outgoing_requests.contains_key(&nonce) {
                    warn!("request with this nonce already outstanding, dropping");
                    return Ok(());
                }
                let mut remaining: VecDeque<Duration> = resend_schedule.into_iter().collect();
                ctx.out(remote.clone(), message_payload.clone());
                if let Some(first) = remaining.pop_front() {
                    self.park(ctx, first, TransmissionEvent::ResendRequest(nonce.clone()));
                }
                self.park(
                    ctx,
                    retain_for,
                    TransmissionEvent::DiscardOutgoingRequest(nonce.clone()),
                );
                self.outgoing_requests.insert(
                    nonce,
                    OutgoingRequestState {
                        destination: remote,
                        payload: message_payload,
                        send_count: 1,
                        remaining_schedule: remaining,
                        responded: false,
                    },
                );
            }
            MessageClass::Response { retain_for } => {
                if self.outgoing_responses.contains(&nonce) {
                    return Err(TransmissionError::ResponseAlreadySent.into());
                }
                ctx.out(remote, message_payload);
                self.park(
                    ctx,
                    retain_for,
                    TransmissionEvent::DiscardOutgoingResponse(nonce.clone()),
                );
                self.outgoing_responses.insert(nonce);
            }
        }
        Ok(())
    }

    fn handle_inbound(&mut self, ctx: &mut Context) {
        let message_payload = ctx.incoming().clone();
        let Some(nonce) = self.accessor.get(&message_payload) else {
            warn!(source = %ctx.source(), "cannot extract nonce from incoming message, dropping");
            return;
        };
        let Some(class) = self.mappings.class_for(&message_payload).cloned() else {
            warn!(source = %ctx.source(), "no type mapping for incoming message, dropping");
            return;
        };
        let remote_source = ctx.source().clone();

        match class {
            MessageClass::Request { retain_for, .. } => {
                if self.outgoing_requests.contains_key(&nonce) {
                    debug!("request to self received, dropping");
                    return;
                }
                if self.incoming_requests.contains(&nonce) {
                    debug!("duplicate request received, dropping");
                    return;
                }
                self.incoming_requests.insert(nonce.clone());
                self.park(
                    ctx,
                    retain_for,
                    TransmissionEvent::DiscardIncomingRequest(nonce),
                );
                // Graft the remote source under our own address so the
                // user's reply routes back through this layer.
                ctx.out_from(&remote_source, self.user.clone(), message_payload);
            }
            MessageClass::Response { retain_for } => {
                if self.incoming_responses.contains(&nonce) {
                    debug!("duplicate response received, dropping");
                    return;
                }
                let Some(request) = self.outgoing_requests.get_mut(&nonce) else {
                    debug!("response without a matching request, dropping");
                    return;
                };
                request.responded = true;
                self.incoming_responses.insert(nonce.clone());
                self.park(
                    ctx,
                    retain_for,
                    TransmissionEvent::DiscardIncomingResponse(nonce),
                );
                ctx.out_from(&remote_source, self.user.clone(), message_payload);
            }
        }
    }

    fn handle_timer_event(&mut self, ctx: &mut Context) {
        let incoming = ctx.incoming().clone();
        let Some(event) = peernetic_core::payload_as::<TransmissionEvent<N>>(&incoming) else {
            warn!("timer echo without a transmission event payload, dropping");
            return;
        };
        match event {
            TransmissionEvent::ResendRequest(nonce) => {
                let Some(state) = self.outgoing_requests.get_mut(nonce) else {
                    return;
                };
                if state.responded {
                    debug!("response already arrived, skipping resend");
                    return;
                }
                state.send_count += 1;
                let destination = state.destination.clone();
                let resend_payload = state.payload.clone();
                let next = state.remaining_schedule.pop_front();
                ctx.out(destination, resend_payload);
                if let Some(delay) = next {
                    self.park(ctx, delay, TransmissionEvent::ResendRequest(nonce.clone()));
                }
                // Schedule exhausted: hold quietly until the discard fires.
            }
            TransmissionEvent::DiscardOutgoingRequest(nonce) => {
                if let Some(state) = self.outgoing_requests.remove(nonce) {
                    if !state.responded {
                        ctx.out(
                            self.user.clone(),
                            payload(RequestTimedOut { nonce: nonce.clone() }),
                        );
                    }
                }
            }
            TransmissionEvent::DiscardOutgoingResponse(nonce) => {
                self.outgoing_responses.remove(nonce);
            }
            TransmissionEvent::DiscardIncomingRequest(nonce) => {
                self.incoming_requests.remove(nonce);
            }
            TransmissionEvent::DiscardIncomingResponse(nonce) => {
                self.incoming_responses.remove(nonce);
            }
        }
    }
}

impl<N> Coroutine for TransmissionCoroutine<N>
where
    N: Clone + Eq + Hash + Send + Sync + 'static,
{
    fn resume(&mut self, ctx: &mut Context) -> Result<Continuation, BoxError> {
        if ctx.source() == ctx.self_address() {
            // Priming; nothing to set up beyond construction.
            return Ok(Continuation::Suspend);
        }
        if self.timer_prefix.is_prefix_of(ctx.source()) {
            self.handle_timer_event(ctx);
        } else if self.user.is_prefix_of(ctx.source()) {
            self.handle_outbound(ctx)?;
        } else {
            self.handle_inbound(ctx);
        }
        Ok(Continuation::Suspend)
    }
}
