//! Simulator scenarios: subcoroutine routing inside a hosted actor, and
//! trace determinism with lossy proxied links.

use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use peernetic_core::{payload, Address, JsonSerializer};
use peernetic_runtime::actor::{
    AddBehaviour, BoxError, Context, Continuation, Coroutine, Subcoroutine, SubcoroutineRouter,
    SubcoroutineState,
};
use peernetic_runtime::proxy::{StartUdpSimulator, UdpSimulatorCoroutine};
use peernetic_runtime::sim::{SimpleLine, SimpleLineConfig, Simulator, TraceEntry};

/// Reports every step it takes, completing after `limit` of them.
struct ReportingChild {
    address: Address,
    limit: usize,
    seen: usize,
    events: mpsc::Sender<String>,
}

impl Subcoroutine for ReportingChild {
    fn relative_address(&self) -> &Address {
        &self.address
    }

    fn step(&mut self, _ctx: &mut Context) -> Result<SubcoroutineState, BoxError> {
        self.seen += 1;
        self.events
            .send(format!("{} step {}", self.address, self.seen))?;
        if self.seen >= self.limit {
            Ok(SubcoroutineState::Finished(None))
        } else {
            Ok(SubcoroutineState::Running)
        }
    }
}

/// Actor owning a router with two children, `q` and `h`.
struct RouterActor {
    router: Option<SubcoroutineRouter>,
    events: mpsc::Sender<String>,
}

impl Coroutine for RouterActor {
    fn resume(&mut self, ctx: &mut Context) -> Result<Continuation, BoxError> {
        if ctx.source() == ctx.self_address() {
            let mut router = SubcoroutineRouter::new("router".parse()?);
            for key in ["q", "h"] {
                router.add(
                    ctx,
                    Box::new(ReportingChild {
                        address: format!("router:{key}").parse()?,
                        limit: 2,
                        seen: 0,
                        events: self.events.clone(),
                    }),
                    AddBehaviour::Add,
                )?;
            }
            self.router = Some(router);
            return Ok(Continuation::Suspend);
        }

        let router = self.router.as_mut().ok_or("router used before priming")?;
        let result = router.forward(ctx)?;
        self.events.send(format!(
            "forwarded={} completed={} remaining={}",
            result.is_forwarded(),
            result.is_forwarded() && result.is_completed(),
            router.len()
        ))?;
        Ok(Continuation::Suspend)
    }
}

fn init_test_logging() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

#[test]
fn subcoroutine_messages_stay_isolated() {
    init_test_logging();
    let mut sim = Simulator::new();
    let (events_tx, events_rx) = mpsc::channel();

    sim.add_coroutine_actor(
        "host:a".parse().unwrap(),
        RouterActor {
            router: None,
            events: events_tx,
        },
        Duration::ZERO,
        payload(()),
    )
    .unwrap();

    sim.add_coroutine_actor(
        "driver:d".parse().unwrap(),
        |ctx: &mut Context| -> Result<Continuation, BoxError> {
            if ctx.source() == ctx.self_address() {
                ctx.out("host:a:router:q".parse().unwrap(), payload(1u8));
                ctx.out("host:a:router:h".parse().unwrap(), payload(2u8));
                ctx.out("host:a:router:q".parse().unwrap(), payload(3u8));
                // No child lives at `z`; the actor must shrug it off.
                ctx.out("host:a:router:z".parse().unwrap(), payload(4u8));
            }
            Ok(Continuation::Finish)
        },
        Duration::ZERO,
        payload(()),
    )
    .unwrap();

    sim.run_until_empty();

    let events: Vec<String> = events_rx.try_iter().collect();
    assert_eq!(
        events,
        [
            "router:q step 1",
            "forwarded=true completed=false remaining=2",
            "router:h step 1",
            "forwarded=true completed=false remaining=2",
            // q finishes on its second message and only q's slot goes away.
            "router:q step 2",
            "forwarded=true completed=true remaining=1",
            "forwarded=false completed=false remaining=1",
        ]
    );
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Datagram {
    hop: u32,
}

fn lossy_line(seed: u64) -> Box<SimpleLine> {
    Box::new(SimpleLine::new(
        seed,
        SimpleLineConfig {
            min_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(950),
            drop_chance: 0.1,
            duplicate_chance: 0.1,
            max_copies: 3,
            max_packet_bytes: 1500,
        },
        Arc::new(JsonSerializer::<Datagram>::new()),
    ))
}

fn run_proxied_ring(seed: u64) -> Vec<TraceEntry> {
    let mut sim = Simulator::new();
    sim.add_timer("timer").unwrap();

    // An echoer that answers every datagram, and a sender that fires ten.
    sim.add_coroutine_actor(
        "echoer:echoer".parse().unwrap(),
        |ctx: &mut Context| -> Result<Continuation, BoxError> {
            if ctx.source() != ctx.self_address() {
                let src = ctx.source().clone();
                ctx.out(src, ctx.incoming().clone());
            }
            Ok(Continuation::Suspend)
        },
        Duration::ZERO,
        payload(()),
    )
    .unwrap();

    sim.add_coroutine_actor(
        "proxy:x".parse().unwrap(),
        UdpSimulatorCoroutine::new(),
        Duration::ZERO,
        payload(StartUdpSimulator::new(
            "timer".parse().unwrap(),
            "sender:sender".parse().unwrap(),
            lossy_line(seed),
        )),
    )
    .unwrap();

    sim.add_coroutine_actor(
        "sender:sender".parse().unwrap(),
        |ctx: &mut Context| -> Result<Continuation, BoxError> {
            if ctx.source() == ctx.self_address() {
                for hop in 0..10 {
                    ctx.out(
                        "proxy:x:echoer:echoer".parse().unwrap(),
                        payload(Datagram { hop }),
                    );
                }
            }
            Ok(Continuation::Suspend)
        },
        Duration::from_millis(1),
        payload(()),
    )
    .unwrap();

    sim.run_until_empty();
    sim.trace().to_vec()
}

/// The reproducibility contract: identical inputs and seed give an
/// identical ordered delivery trace, jitter, loss and duplication included.
#[test]
fn lossy_run_is_reproducible_for_a_fixed_seed() {
    init_test_logging();
    let first = run_proxied_ring(12345);
    let second = run_proxied_ring(12345);

    // Ten datagrams and their echoes crossed a jittery line; plenty of
    // deliveries happened, and both runs saw exactly the same ones.
    assert!(first.len() > 20, "trace unexpectedly short: {}", first.len());
    assert_eq!(first, second);

    // A different seed reorders the world.
    let other = run_proxied_ring(54321);
    assert_ne!(first, other);
}
