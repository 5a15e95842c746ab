//! Bounded per-owner cache with time-to-live expiry.
//!
//! Eviction policy: when a `put` of a new key would exceed capacity, the
//! least-recently-inserted entry is evicted, exactly one per overflowing `put`.
//! Re-putting an existing key replaces its value and moves it to the newest
//! position. Reads do not affect eviction order.

use std::{
    collections::{BTreeMap, HashMap},
    hash::Hash,
    time::{Duration, Instant},
};

use crate::clock::SharedClock;

#[derive(Debug)]
struct Slot<V> {
    value: V,
    inserted_at: Instant,
    seq: u64,
}

pub struct ExpiringCache<K, V> {
    ttl: Duration,
    capacity: usize,
    clock: SharedClock,
    entries: HashMap<K, Slot<V>>,
    /// Insertion sequence -> key, oldest first.
    order: BTreeMap<u64, K>,
    next_seq: u64,
}

impl<K, V> ExpiringCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(ttl: Duration, capacity: usize, clock: SharedClock) -> Self {
        Self {
            ttl,
            capacity,
            clock,
            entries: HashMap::new(),
            order: BTreeMap::new(),
            next_seq: 0,
        }
    }

    /// Value for `key` if present and younger than the TTL.
    ///
    /// An expired entry is removed and reported as a miss.
    pub fn get(&mut self, key: &K) -> Option<V> {
        let now = self.clock.now();
        let expired = {
            let slot = self.entries.get(key)?;
            self.is_expired(slot, now)
        };

        if expired {
            self.invalidate(key);
            return None;
        }

        self.entries.get(key).map(|s| s.value.clone())
    }

    pub fn put(&mut self, key: K, value: V) {
        if self.capacity == 0 {
            return;
        }

        if let Some(old) = self.entries.remove(&key) {
            self.order.remove(&old.seq);
        } else if self.entries.len() >= self.capacity {
            self.evict_oldest();
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.order.insert(seq, key.clone());
        self.entries.insert(
            key,
            Slot {
                value,
                inserted_at: self.clock.now(),
                seq,
            },
        );
    }

    pub fn invalidate(&mut self, key: &K) -> bool {
        match self.entries.remove(key) {
            Some(slot) => {
                self.order.remove(&slot.seq);
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    /// Remove every expired entry. Returns how many were dropped.
    pub fn purge_expired(&mut self) -> usize {
        let now = self.clock.now();
        let mut dropped = 0;

        // Insertion instants are non-decreasing along `order`, so stop at the first live entry.
        while let Some((&seq, key)) = self.order.iter().next() {
            let expired = self
                .entries
                .get(key)
                .map(|slot| self.is_expired(slot, now))
                .unwrap_or(true);
            if !expired {
                break;
            }
            if let Some(key) = self.order.remove(&seq) {
                self.entries.remove(&key);
            }
            dropped += 1;
        }

        dropped
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn evict_oldest(&mut self) {
        if let Some((_, key)) = self.order.pop_first() {
            self.entries.remove(&key);
        }
    }

    fn is_expired(&self, slot: &Slot<V>, now: Instant) -> bool {
        now.saturating_duration_since(slot.inserted_at) >= self.ttl
    }
}
