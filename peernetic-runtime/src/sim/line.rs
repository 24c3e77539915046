//! Unreliable-channel simulation.
//!
//! A [`Line`] decides what actually happens to each message crossing a
//! simulated link: how long it takes, whether it is lost, and whether the
//! "network" duplicates it. Lines are consumed by the UDP-simulator proxy
//! actor and can be driven directly by tests.

use std::sync::Arc;
use std::time::Duration;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, warn};

use peernetic_core::{Address, Payload, SerializeError, Serializer};

/// A message about to cross a line, stripped to its transportable parts.
///
/// `source_suffix` is the sender-side suffix the proxy will graft onto its
/// own address when the message is finally emitted; `destination` is the
/// absolute remote address.
#[derive(Debug)]
pub struct DepartMessage {
    source_suffix: Address,
    destination: Address,
    payload: Payload,
}

impl DepartMessage {
    /// Bundle a departing message.
    pub fn new(source_suffix: Address, destination: Address, payload: Payload) -> Self {
        DepartMessage { source_suffix, destination, payload }
    }

    /// Sender-side source suffix.
    pub fn source_suffix(&self) -> &Address {
        &self.source_suffix
    }

    /// Absolute destination address.
    pub fn destination(&self) -> &Address {
        &self.destination
    }

    /// The payload crossing the line.
    pub fn payload(&self) -> &Payload {
        &self.payload
    }
}

/// One copy of a message in transit, with the delay the line assigned it.
#[derive(Debug)]
pub struct TransitMessage {
    source_suffix: Address,
    destination: Address,
    payload: Payload,
    delay: Duration,
}

impl TransitMessage {
    /// Sender-side source suffix.
    pub fn source_suffix(&self) -> &Address {
        &self.source_suffix
    }

    /// Absolute destination address.
    pub fn destination(&self) -> &Address {
        &self.destination
    }

    /// The payload in transit.
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// How long this copy spends in transit.
    pub fn delay(&self) -> Duration {
        self.delay
    }
}

/// Policy for messages crossing a simulated link, in both directions.
pub trait Line: Send {
    /// Process a message leaving the proxied actor. Returns zero or more
    /// in-transit copies.
    fn process_outgoing(&mut self, now: Duration, departing: DepartMessage) -> Vec<TransitMessage>;

    /// Process a message arriving from the far side.
    fn process_incoming(&mut self, now: Duration, arriving: DepartMessage) -> Vec<TransitMessage>;
}

/// A line that delivers every message exactly once with zero delay.
#[derive(Debug, Default)]
pub struct PerfectLine;

impl PerfectLine {
    fn pass(departing: DepartMessage) -> Vec<TransitMessage> {
        vec![TransitMessage {
            source_suffix: departing.source_suffix,
            destination: departing.destination,
            payload: departing.payload,
            delay: Duration::ZERO,
        }]
    }
}

impl Line for PerfectLine {
    fn process_outgoing(&mut self, _now: Duration, departing: DepartMessage) -> Vec<TransitMessage> {
        PerfectLine::pass(departing)
    }

    fn process_incoming(&mut self, _now: Duration, arriving: DepartMessage) -> Vec<TransitMessage> {
        PerfectLine::pass(arriving)
    }
}

/// Knobs for [`SimpleLine`].
#[derive(Debug, Clone)]
pub struct SimpleLineConfig {
    /// Minimum transit delay.
    pub min_delay: Duration,
    /// Maximum transit delay (jitter is uniform between min and max).
    pub max_delay: Duration,
    /// Probability in `[0, 1]` that any single copy is dropped.
    pub drop_chance: f64,
    /// Probability in `[0, 1]` of producing one more copy (rolled
    /// repeatedly up to `max_copies`).
    pub duplicate_chance: f64,
    /// Hard cap on copies of one message, duplicates included.
    pub max_copies: usize,
    /// Serialized payloads larger than this are dropped like oversized
    /// datagrams.
    pub max_packet_bytes: usize,
}

impl Default for SimpleLineConfig {
    fn default() -> Self {
        SimpleLineConfig {
            min_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            drop_chance: 0.0,
            duplicate_chance: 0.0,
            max_copies: 1,
            max_packet_bytes: 1500,
        }
    }
}

/// A lossy, jittery, duplicating line, deterministic for a fixed seed.
pub struct SimpleLine {
    rng: ChaCha8Rng,
    config: SimpleLineConfig,
    serializer: Arc<dyn Serializer>,
}

impl SimpleLine {
    /// Create a line seeded with `seed`. Two lines built with the same seed
    /// and config make identical decisions for identical traffic.
    pub fn new(seed: u64, config: SimpleLineConfig, serializer: Arc<dyn Serializer>) -> Self {
        SimpleLine {
            rng: ChaCha8Rng::seed_from_u64(seed),
            config,
            serializer,
        }
    }

    fn transit(&mut self, departing: DepartMessage) -> Vec<TransitMessage> {
        match self.serializer.serialize(departing.payload()) {
            Ok(bytes) if bytes.len() > self.config.max_packet_bytes => {
                warn!(
                    size = bytes.len(),
                    max = self.config.max_packet_bytes,
                    "payload exceeds max packet size, dropping"
                );
                return Vec::new();
            }
            Ok(_) => {}
            Err(SerializeError::UnsupportedPayload) => {
                // Size unknown; let it through rather than silently eating
                // framework-internal payloads.
                debug!("payload size unknown to line serializer");
            }
            Err(e) => {
                warn!(error = %e, "payload failed to serialize, dropping");
                return Vec::new();
            }
        }

        let mut copies = 1;
        while copies < self.config.max_copies
            && self.rng.gen::<f64>() < self.config.duplicate_chance
        {
            copies += 1;
        }

        let mut transits = Vec::new();
        for _ in 0..copies {
            // Roll delay before the drop decision so the RNG stream is the
            // same shape whether or not the copy survives.
            let delay = self.roll_delay();
            if self.rng.gen::<f64>() < self.config.drop_chance {
                debug!(destination = %departing.destination(), "line dropped a copy");
                continue;
            }
            transits.push(TransitMessage {
                source_suffix: departing.source_suffix().clone(),
                destination: departing.destination().clone(),
                payload: departing.payload().clone(),
                delay,
            });
        }
        transits
    }

    fn roll_delay(&mut self) -> Duration {
        let min = self.config.min_delay.as_nanos() as u64;
        let max = self.config.max_delay.as_nanos() as u64;
        if max <= min {
            return self.config.min_delay;
        }
        Duration::from_nanos(self.rng.gen_range(min..=max))
    }
}

impl Line for SimpleLine {
    fn process_outgoing(&mut self, _now: Duration, departing: DepartMessage) -> Vec<TransitMessage> {
        self.transit(departing)
    }

    fn process_incoming(&mut self, _now: Duration, arriving: DepartMessage) -> Vec<TransitMessage> {
        self.transit(arriving)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use peernetic_core::{payload, JsonSerializer};

    fn depart(n: u64) -> DepartMessage {
        DepartMessage::new(
            Address::empty(),
            "peer:actor".parse().unwrap(),
            payload(n),
        )
    }

    fn line(seed: u64, config: SimpleLineConfig) -> SimpleLine {
        SimpleLine::new(seed, config, Arc::new(JsonSerializer::<u64>::new()))
    }

    #[test]
    fn perfect_line_passes_everything_through() {
        let mut perfect = PerfectLine;
        let out = perfect.process_outgoing(Duration::ZERO, depart(1));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].delay(), Duration::ZERO);
        assert_eq!(out[0].destination().to_string(), "peer:actor");
    }

    #[test]
    fn same_seed_same_decisions() {
        let config = SimpleLineConfig {
            min_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(500),
            drop_chance: 0.3,
            duplicate_chance: 0.3,
            max_copies: 4,
            ..SimpleLineConfig::default()
        };
        let mut a = line(12345, config.clone());
        let mut b = line(12345, config);

        for i in 0..100 {
            let ta = a.process_outgoing(Duration::ZERO, depart(i));
            let tb = b.process_outgoing(Duration::ZERO, depart(i));
            assert_eq!(ta.len(), tb.len());
            for (x, y) in ta.iter().zip(&tb) {
                assert_eq!(x.delay(), y.delay());
            }
        }
    }

    #[test]
    fn drop_chance_one_loses_everything() {
        let mut lossy = line(
            7,
            SimpleLineConfig {
                drop_chance: 1.0,
                ..SimpleLineConfig::default()
            },
        );
        for i in 0..10 {
            assert!(lossy.process_outgoing(Duration::ZERO, depart(i)).is_empty());
        }
    }

    #[test]
    fn duplicate_chance_one_caps_at_max_copies() {
        let mut chatty = line(
            7,
            SimpleLineConfig {
                duplicate_chance: 1.0,
                max_copies: 3,
                ..SimpleLineConfig::default()
            },
        );
        let transits = chatty.process_outgoing(Duration::ZERO, depart(1));
        assert_eq!(transits.len(), 3);
    }

    #[test]
    fn oversized_payloads_are_dropped() {
        let serializer = Arc::new(JsonSerializer::<String>::new());
        let mut tight = SimpleLine::new(
            7,
            SimpleLineConfig {
                max_packet_bytes: 8,
                ..SimpleLineConfig::default()
            },
            serializer,
        );
        let big = DepartMessage::new(
            Address::empty(),
            "peer:actor".parse().unwrap(),
            payload("a very long payload indeed".to_string()),
        );
        assert!(tight.process_outgoing(Duration::ZERO, big).is_empty());
    }

    #[test]
    fn delays_stay_within_bounds() {
        let config = SimpleLineConfig {
            min_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(200),
            ..SimpleLineConfig::default()
        };
        let mut jittery = line(99, config);
        for i in 0..50 {
            for transit in jittery.process_outgoing(Duration::ZERO, depart(i)) {
                assert!(transit.delay() >= Duration::from_millis(100));
                assert!(transit.delay() <= Duration::from_millis(200));
            }
        }
    }
}
