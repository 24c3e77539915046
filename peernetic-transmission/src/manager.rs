//! Time-indexed set of outstanding nonces.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;

use thiserror::Error;

use crate::nonce::Nonce;

/// Errors from [`NonceManager`] operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NonceError {
    /// `add_nonce` was called for a nonce that is already tracked.
    #[error("nonce already tracked")]
    DuplicateNonce,
    /// The nonce is not tracked (expired, removed, or never added).
    #[error("nonce not tracked")]
    UnknownNonce,
}

struct NonceEntry<V> {
    value: Option<V>,
    expire_at: Duration,
}

/// Tracks nonces with per-nonce optional values and TTLs.
///
/// Time is a caller-threaded `Duration` offset from whatever epoch the
/// caller's clock uses; the manager only compares instants it was given.
/// Not thread-safe by design: a `NonceManager` lives inside exactly one
/// actor.
pub struct NonceManager<N, V> {
    entries: HashMap<Nonce<N>, NonceEntry<V>>,
}

impl<N: Eq + Hash + Clone, V> NonceManager<N, V> {
    /// An empty manager.
    pub fn new() -> Self {
        NonceManager { entries: HashMap::new() }
    }

    /// Track `nonce` from `now` for `ttl`, with an optional initial value.
    /// Fails with [`NonceError::DuplicateNonce`] if already tracked.
    pub fn add_nonce(
        &mut self,
        now: Duration,
        ttl: Duration,
        nonce: Nonce<N>,
        value: Option<V>,
    ) -> Result<(), NonceError> {
        if self.entries.contains_key(&nonce) {
            return Err(NonceError::DuplicateNonce);
        }
        self.entries.insert(
            nonce,
            NonceEntry {
                value,
                expire_at: now + ttl,
            },
        );
        Ok(())
    }

    /// Replace the value stored for a tracked nonce.
    pub fn assign_value(&mut self, nonce: &Nonce<N>, value: V) -> Result<(), NonceError> {
        let entry = self.entries.get_mut(nonce).ok_or(NonceError::UnknownNonce)?;
        entry.value = Some(value);
        Ok(())
    }

    /// The value stored for a tracked nonce (which may be `None`).
    pub fn nonce_value(&self, nonce: &Nonce<N>) -> Result<Option<&V>, NonceError> {
        self.entries
            .get(nonce)
            .map(|entry| entry.value.as_ref())
            .ok_or(NonceError::UnknownNonce)
    }

    /// `true` while the nonce is tracked.
    pub fn is_nonce_present(&self, nonce: &Nonce<N>) -> bool {
        self.entries.contains_key(nonce)
    }

    /// Stop tracking a nonce before its TTL elapses.
    pub fn remove_nonce(&mut self, nonce: &Nonce<N>) -> Result<(), NonceError> {
        self.entries
            .remove(nonce)
            .map(|_| ())
            .ok_or(NonceError::UnknownNonce)
    }

    /// Number of tracked nonces.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` if nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Evict every nonce whose expiry is ≤ `now`. Returns the wait until
    /// the next expiry, or `None` if nothing remains.
    pub fn process(&mut self, now: Duration) -> Option<Duration> {
        self.entries.retain(|_, entry| entry.expire_at > now);
        self.entries
            .values()
            .map(|entry| entry.expire_at)
            .min()
            .map(|earliest| earliest - now)
    }
}

impl<N: Eq + Hash + Clone, V> Default for NonceManager<N, V> {
    fn default() -> Self {
        NonceManager::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn values_survive_until_their_ttl() {
        let mut manager: NonceManager<u64, &str> = NonceManager::new();
        let n1 = Nonce::new(1u64);
        let n2 = Nonce::new(2u64);

        assert!(!manager.is_nonce_present(&n1));
        assert!(!manager.is_nonce_present(&n2));

        manager.add_nonce(secs(0), secs(5), n1.clone(), Some("resp1")).unwrap();
        manager.add_nonce(secs(0), secs(10), n2.clone(), None).unwrap();
        assert_eq!(manager.nonce_value(&n1).unwrap(), Some(&"resp1"));
        assert_eq!(manager.nonce_value(&n2).unwrap(), None);

        manager.assign_value(&n2, "resp2").unwrap();
        assert_eq!(manager.nonce_value(&n2).unwrap(), Some(&"resp2"));

        let next = manager.process(secs(1)).unwrap();
        assert_eq!(next, secs(4));
        assert_eq!(manager.nonce_value(&n1).unwrap(), Some(&"resp1"));

        manager.process(secs(2));
        assert!(manager.is_nonce_present(&n1));

        // Expiry boundary is inclusive: at t=5 the 5s nonce is gone.
        let next = manager.process(secs(5)).unwrap();
        assert_eq!(next, secs(5));
        assert!(!manager.is_nonce_present(&n1));
        assert_eq!(manager.nonce_value(&n2).unwrap(), Some(&"resp2"));

        assert_eq!(manager.process(secs(10)), None);
        assert!(manager.is_empty());
    }

    #[test]
    fn duplicate_add_fails() {
        let mut manager: NonceManager<u64, ()> = NonceManager::new();
        let nonce = Nonce::new(9u64);
        manager.add_nonce(secs(0), secs(1), nonce.clone(), None).unwrap();
        assert_eq!(
            manager.add_nonce(secs(0), secs(1), nonce, None),
            Err(NonceError::DuplicateNonce)
        );
    }

    #[test]
    fn operations_on_unknown_nonces_fail() {
        let mut manager: NonceManager<u64, ()> = NonceManager::new();
        let nonce = Nonce::new(9u64);
        assert_eq!(manager.assign_value(&nonce, ()), Err(NonceError::UnknownNonce));
        assert_eq!(manager.nonce_value(&nonce), Err(NonceError::UnknownNonce));
        assert_eq!(manager.remove_nonce(&nonce), Err(NonceError::UnknownNonce));
    }

    #[test]
    fn remove_drops_the_entry_immediately() {
        let mut manager: NonceManager<u64, ()> = NonceManager::new();
        let nonce = Nonce::new(9u64);
        manager.add_nonce(secs(0), secs(100), nonce.clone(), None).unwrap();
        manager.remove_nonce(&nonce).unwrap();
        assert!(!manager.is_nonce_present(&nonce));
    }
}
