//! A map whose entries expire after a fixed time-to-live.
//!
//! Entries live in a `HashMap`; a `BTreeMap` ordered by expiry deadline
//! indexes them so that [`ExpiringCache::sweep`] touches only what has
//! expired. The clock is injected: every call that depends on time takes
//! `now`, which keeps eviction deterministic under test.

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::time::{Duration, Instant};

#[derive(Debug)]
struct Slot<V> {
    value: V,
    deadline: Instant,
    /// Tie-breaker for entries sharing a deadline.
    seq: u64,
}

/// Hash map with per-entry expiry and explicit eviction.
#[derive(Debug)]
pub struct ExpiringCache<K, V> {
    ttl: Duration,
    entries: HashMap<K, Slot<V>>,
    expiry: BTreeMap<(Instant, u64), K>,
    next_seq: u64,
}

impl<K, V> ExpiringCache<K, V>
where
    K: Clone + Eq + Hash,
{
    /// An empty cache whose entries live for `ttl` after insertion.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: HashMap::new(),
            expiry: BTreeMap::new(),
            next_seq: 0,
        }
    }

    /// Configured time-to-live.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Number of entries, expired or not, still held.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert or replace `key`, restarting its expiry clock at `now`.
    /// Returns the previous value.
    pub fn insert(&mut self, key: K, value: V, now: Instant) -> Option<V> {
        let deadline = now + self.ttl;
        let seq = self.next_seq;
        self.next_seq += 1;
        let old = self.entries.insert(
            key.clone(),
            Slot {
                value,
                deadline,
                seq,
            },
        );
        if let Some(old) = &old {
            self.expiry.remove(&(old.deadline, old.seq));
        }
        self.expiry.insert((deadline, seq), key);
        old.map(|s| s.value)
    }

    /// Value for `key` if it has not expired by `now`.
    pub fn get(&self, key: &K, now: Instant) -> Option<&V> {
        self.entries
            .get(key)
            .filter(|s| s.deadline > now)
            .map(|s| &s.value)
    }

    /// Mutable value for `key` if it has not expired by `now`.
    pub fn get_mut(&mut self, key: &K, now: Instant) -> Option<&mut V> {
        self.entries
            .get_mut(key)
            .filter(|s| s.deadline > now)
            .map(|s| &mut s.value)
    }

    /// Remove `key` regardless of expiry.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let slot = self.entries.remove(key)?;
        self.expiry.remove(&(slot.deadline, slot.seq));
        Some(slot.value)
    }

    /// Evict every entry whose deadline is at or before `now`, returning
    /// them in expiry order.
    pub fn sweep(&mut self, now: Instant) -> Vec<(K, V)> {
        let mut evicted = Vec::new();
        while let Some(entry) = self.expiry.first_entry() {
            if entry.key().0 > now {
                break;
            }
            let key = entry.remove();
            if let Some(slot) = self.entries.remove(&key) {
                evicted.push((key, slot.value));
            }
        }
        evicted
    }
}
