use std::{
    collections::HashMap,
    hash::Hash,
    sync::{Mutex, MutexGuard},
    time::{Duration, Instant},
};

use crate::clock::SharedClock;

/// Spacing implied by a requests-per-second budget.
///
/// Zero for a non-positive or non-finite rate. `None` when the rate is so small that
/// the interval does not fit in a `Duration`.
pub fn interval_for_rate(requests_per_sec: f64) -> Option<Duration> {
    if requests_per_sec.is_finite() && requests_per_sec > 0.0 {
        Duration::try_from_secs_f64(1.0 / requests_per_sec).ok()
    } else {
        Some(Duration::ZERO)
    }
}

/// Per-key minimum-interval throttle.
///
/// Each key keeps the instant of its last admitted call. A call is admitted only when
/// at least `interval` has elapsed since that instant; rejected calls leave the record
/// untouched. Keys never influence each other, so one noisy user cannot starve the rest.
///
/// The pacer never blocks: callers decide whether to reject or wait and retry.
pub struct TokenPacer<K> {
    interval: Duration,
    clock: SharedClock,
    last_call: Mutex<HashMap<K, Instant>>,
}

impl<K> TokenPacer<K>
where
    K: Eq + Hash + Clone,
{
    pub fn new(interval: Duration, clock: SharedClock) -> Self {
        Self {
            interval,
            clock,
            last_call: Mutex::new(HashMap::new()),
        }
    }

    /// Build a pacer from a requests-per-second budget (`interval = 1 / rate`).
    ///
    /// A non-positive or non-finite rate disables spacing. A rate too small to express
    /// as an interval admits each key once and never again.
    pub fn from_rate(requests_per_sec: f64, clock: SharedClock) -> Self {
        Self::new(
            interval_for_rate(requests_per_sec).unwrap_or(Duration::MAX),
            clock,
        )
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Admit a call for `key` and record it, or reject without touching the record.
    pub fn allow(&self, key: &K) -> bool {
        let now = self.clock.now();
        let mut map = self.records();

        if let Some(last) = map.get(key) {
            if now.saturating_duration_since(*last) < self.interval {
                return false;
            }
        }

        map.insert(key.clone(), now);
        true
    }

    /// Time left until `key` would be admitted again. `None` if it would be admitted now.
    pub fn retry_after(&self, key: &K) -> Option<Duration> {
        let now = self.clock.now();
        let map = self.records();
        let last = map.get(key)?;
        let elapsed = now.saturating_duration_since(*last);
        if elapsed >= self.interval {
            return None;
        }
        Some(self.interval - elapsed)
    }

    /// Drop records whose last call is at least `stale` old. Returns how many were dropped.
    ///
    /// `stale` is clamped up to the pacing interval so a sweep can never re-admit a key early.
    pub fn sweep(&self, stale: Duration) -> usize {
        let stale = stale.max(self.interval);
        let now = self.clock.now();
        let mut map = self.records();
        let before = map.len();
        map.retain(|_, last| now.saturating_duration_since(*last) < stale);
        before - map.len()
    }

    pub fn len(&self) -> usize {
        self.records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn records(&self) -> MutexGuard<'_, HashMap<K, Instant>> {
        self.last_call.lock().unwrap_or_else(|p| p.into_inner())
    }
}
