//! Nonces: unique tags pairing requests with their responses.
//!
//! The framework never synthesizes nonces into user payloads; it reads them
//! through a [`NonceAccessor`] the application provides. Generation is a
//! separate concern ([`NonceGenerator`]) used by applications when building
//! request payloads.

use std::fmt;
use std::sync::Arc;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use peernetic_core::Payload;

/// A structurally-compared unique tag carried inside request and response
/// payloads.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Nonce<N>(N);

impl<N> Nonce<N> {
    /// Wrap a raw nonce value.
    pub fn new(value: N) -> Self {
        Nonce(value)
    }

    /// The raw nonce value.
    pub fn value(&self) -> &N {
        &self.0
    }
}

impl<N: fmt::Display> fmt::Display for Nonce<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Reads the nonce out of a payload, if the payload carries one.
pub trait NonceAccessor<N>: Send + Sync {
    /// Extract the nonce from `payload`. `None` means the payload type is
    /// unknown or carries no nonce; the transmission layer drops such
    /// messages.
    fn get(&self, payload: &Payload) -> Option<Nonce<N>>;
}

impl<N, F> NonceAccessor<N> for F
where
    F: Fn(&Payload) -> Option<Nonce<N>> + Send + Sync,
{
    fn get(&self, payload: &Payload) -> Option<Nonce<N>> {
        self(payload)
    }
}

/// Produces fresh nonces for outgoing requests.
pub trait NonceGenerator<N>: Send {
    /// Generate a new nonce.
    fn generate(&mut self) -> Nonce<N>;
}

/// Random fixed-length byte-array nonces.
///
/// Not cryptographically hardened; uniqueness for dedup purposes is all the
/// transmission layer needs.
pub struct ByteArrayNonceGenerator {
    rng: ChaCha8Rng,
    length: usize,
}

impl ByteArrayNonceGenerator {
    /// Generator of `length`-byte nonces seeded from entropy.
    pub fn new(length: usize) -> Self {
        ByteArrayNonceGenerator {
            rng: ChaCha8Rng::from_entropy(),
            length,
        }
    }

    /// Deterministic generator for simulations and tests.
    pub fn with_seed(seed: u64, length: usize) -> Self {
        ByteArrayNonceGenerator {
            rng: ChaCha8Rng::seed_from_u64(seed),
            length,
        }
    }
}

impl NonceGenerator<Vec<u8>> for ByteArrayNonceGenerator {
    fn generate(&mut self) -> Nonce<Vec<u8>> {
        let mut bytes = vec![0u8; self.length];
        self.rng.fill(bytes.as_mut_slice());
        Nonce::new(bytes)
    }
}

/// Convenience alias for the boxed accessor the transmission layer holds.
pub type SharedNonceAccessor<N> = Arc<dyn NonceAccessor<N>>;
