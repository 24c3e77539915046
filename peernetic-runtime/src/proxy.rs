//! UDP-over-timer simulation proxy.
//!
//! [`UdpSimulatorCoroutine`] is an ordinary actor that stands between a
//! proxied actor and the rest of the world, pushing every crossing message
//! through a [`Line`] and parking the surviving copies on a timer gateway
//! for the delay the line assigned. To the proxied actor the far side looks
//! like a flaky datagram network.
//!
//! Addressing works like the real thing: a sender behind a proxy at
//! `sender:proxy` reaches a remote actor `echoer:echoer` by writing to
//! `sender:proxy:echoer:echoer`; replies arrive with that same address as
//! their source, so request/response code never knows the proxy exists.

use std::sync::Mutex;

use tracing::warn;

use peernetic_core::{payload, Address};

use crate::actor::{BoxError, Context, Continuation, Coroutine};
use crate::sim::{DepartMessage, Line, TransitMessage};

/// Priming payload for [`UdpSimulatorCoroutine`].
pub struct StartUdpSimulator {
    timer_prefix: Address,
    actor_prefix: Address,
    line: Mutex<Option<Box<dyn Line>>>,
}

impl StartUdpSimulator {
    /// Configure a UDP simulator: which timer gateway to park transit
    /// messages on, which actor is being proxied, and the line policy.
    pub fn new(timer_prefix: Address, actor_prefix: Address, line: Box<dyn Line>) -> Self {
        StartUdpSimulator {
            timer_prefix,
            actor_prefix,
            line: Mutex::new(Some(line)),
        }
    }
}

enum ProxyState {
    AwaitingStart,
    Running {
        timer_prefix: Address,
        actor_prefix: Address,
        line: Box<dyn Line>,
    },
}

/// Actor that simulates a UDP gateway for one proxied actor.
pub struct UdpSimulatorCoroutine {
    state: ProxyState,
}

impl UdpSimulatorCoroutine {
    /// Create the proxy; prime it with a [`StartUdpSimulator`] payload.
    pub fn new() -> Self {
        UdpSimulatorCoroutine { state: ProxyState::AwaitingStart }
    }
}

impl Default for UdpSimulatorCoroutine {
    fn default() -> Self {
        UdpSimulatorCoroutine::new()
    }
}

impl Coroutine for UdpSimulatorCoroutine {
    fn resume(&mut self, ctx: &mut Context) -> Result<Continuation, BoxError> {
        match &mut self.state {
            ProxyState::AwaitingStart => {
                let start = ctx
                    .incoming_as::<StartUdpSimulator>()
                    .ok_or("udp simulator primed with a non-start payload")?;
                let line = start
                    .line
                    .lock()
                    .map_err(|_| "start payload lock poisoned")?
                    .take()
                    .ok_or("udp simulator start payload reused")?;
                self.state = ProxyState::Running {
                    timer_prefix: start.timer_prefix.clone(),
                    actor_prefix: start.actor_prefix.clone(),
                    line,
                };
                Ok(Continuation::Suspend)
            }
            ProxyState::Running {
                timer_prefix,
                actor_prefix,
                line,
            } => {
                let now = ctx.time();
                if timer_prefix.is_prefix_of(ctx.source()) {
                    // A transit delay elapsed; emit the carried message.
                    let Some(transit) = ctx.incoming_as::<TransitMessage>() else {
                        warn!("timer echo without a transit payload, dropping");
                        return Ok(Continuation::Suspend);
                    };
                    let source_suffix = transit.source_suffix().clone();
                    let destination = transit.destination().clone();
                    let carried = transit.payload().clone();
                    ctx.out_from(&source_suffix, destination, carried);
                } else if actor_prefix.is_prefix_of(ctx.source()) {
                    // Outbound from the proxied actor: strip our own address
                    // off the destination to find the remote one.
                    let Ok(source_suffix) = ctx.source().remove_prefix(actor_prefix) else {
                        warn!(source = %ctx.source(), "outbound source not under proxied actor, dropping");
                        return Ok(Continuation::Suspend);
                    };
                    let Ok(remote) = ctx.destination().remove_prefix(ctx.self_address()) else {
                        warn!(destination = %ctx.destination(), "outbound destination not under proxy, dropping");
                        return Ok(Continuation::Suspend);
                    };
                    let departing =
                        DepartMessage::new(source_suffix, remote, ctx.incoming().clone());
                    let transits = line.process_outgoing(now, departing);
                    park(ctx, timer_prefix, transits);
                } else {
                    // Inbound from a remote: forward to the proxied actor,
                    // grafting the remote source under our own address so
                    // replies route back through us.
                    let Ok(local_suffix) = ctx.destination().remove_prefix(ctx.self_address())
                    else {
                        warn!(destination = %ctx.destination(), "inbound destination not under proxy, dropping");
                        return Ok(Continuation::Suspend);
                    };
                    let arriving = DepartMessage::new(
                        ctx.source().clone(),
                        actor_prefix.append_suffix(&local_suffix),
                        ctx.incoming().clone(),
                    );
                    let transits = line.process_incoming(now, arriving);
                    park(ctx, timer_prefix, transits);
                }
                Ok(Continuation::Suspend)
            }
        }
    }
}

fn park(ctx: &mut Context, timer_prefix: &Address, transits: Vec<TransitMessage>) {
    for transit in transits {
        let destination =
            timer_prefix.append_element(transit.delay().as_millis().to_string());
        ctx.out(destination, payload(transit));
    }
}
