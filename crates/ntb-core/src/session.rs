use std::{
    sync::{Arc, Mutex, MutexGuard},
    time::{Duration, Instant},
};

use dashmap::DashMap;

use crate::{
    cache::ExpiringCache,
    clock::SharedClock,
    domain::UserId,
    pacer::TokenPacer,
    tasks::{ClientFactory, Fingerprint, TaskRecord, TaskStore},
};

/// Per-session limits, shared by every session a pool creates.
#[derive(Clone, Copy, Debug)]
pub struct SessionSettings {
    /// Minimum spacing between two downstream calls of one session.
    pub pace_interval: Duration,
    pub cache_ttl: Duration,
    pub cache_capacity: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            pace_interval: Duration::from_secs(1),
            cache_ttl: Duration::from_secs(60),
            cache_capacity: 32,
        }
    }
}

type ResultCache = ExpiringCache<Fingerprint, Vec<TaskRecord>>;

/// Everything one user owns: a client handle, a pacer, a result cache.
///
/// Sessions are only reachable through [`SessionPool::get_or_create`].
pub struct Session {
    user_id: UserId,
    client: Arc<dyn TaskStore>,
    pacer: TokenPacer<UserId>,
    cache: Mutex<ResultCache>,
    created_at: Instant,
    last_active: Mutex<Instant>,
}

impl Session {
    fn new(
        user_id: UserId,
        client: Arc<dyn TaskStore>,
        settings: &SessionSettings,
        clock: SharedClock,
    ) -> Self {
        let now = clock.now();
        Self {
            user_id,
            client,
            pacer: TokenPacer::new(settings.pace_interval, clock.clone()),
            cache: Mutex::new(ExpiringCache::new(
                settings.cache_ttl,
                settings.cache_capacity,
                clock,
            )),
            created_at: now,
            last_active: Mutex::new(now),
        }
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn client(&self) -> &Arc<dyn TaskStore> {
        &self.client
    }

    pub fn pacer(&self) -> &TokenPacer<UserId> {
        &self.pacer
    }

    /// Claim this session's next downstream slot.
    pub fn try_acquire_slot(&self) -> bool {
        self.pacer.allow(&self.user_id)
    }

    pub fn retry_after(&self) -> Option<Duration> {
        self.pacer.retry_after(&self.user_id)
    }

    pub fn cached(&self, fingerprint: &Fingerprint) -> Option<Vec<TaskRecord>> {
        self.cache_guard().get(fingerprint)
    }

    pub fn remember(&self, fingerprint: Fingerprint, tasks: Vec<TaskRecord>) {
        self.cache_guard().put(fingerprint, tasks);
    }

    /// Drop every cached result (after a write changed the database).
    pub fn forget_results(&self) {
        self.cache_guard().clear();
    }

    pub fn cached_len(&self) -> usize {
        self.cache_guard().len()
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn last_active(&self) -> Instant {
        *self.last_active_guard()
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_active())
    }

    /// Drop throttle records older than `stale` and expired cache entries.
    pub fn sweep_bookkeeping(&self, stale: Duration) -> (usize, usize) {
        let throttle = self.pacer.sweep(stale);
        let cached = self.cache_guard().purge_expired();
        (throttle, cached)
    }

    fn touch(&self, now: Instant) {
        let mut last = self.last_active_guard();
        if now > *last {
            *last = now;
        }
    }

    fn cache_guard(&self) -> MutexGuard<'_, ResultCache> {
        self.cache.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn last_active_guard(&self) -> MutexGuard<'_, Instant> {
        self.last_active.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub sessions: usize,
    pub throttle_records: usize,
    pub cached_results: usize,
}

/// Owner of all sessions, one per user.
///
/// The map is sharded, so lookups for unrelated users do not wait on each other.
/// Creation and the `last_active` update run under the shard entry guard, which makes
/// them atomic with respect to both concurrent creation and idle eviction.
pub struct SessionPool {
    sessions: DashMap<UserId, Arc<Session>>,
    factory: Arc<dyn ClientFactory>,
    clock: SharedClock,
    settings: SessionSettings,
}

impl SessionPool {
    pub fn new(
        factory: Arc<dyn ClientFactory>,
        clock: SharedClock,
        settings: SessionSettings,
    ) -> Self {
        Self {
            sessions: DashMap::new(),
            factory,
            clock,
            settings,
        }
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    pub fn get_or_create(&self, user_id: UserId) -> Arc<Session> {
        let now = self.clock.now();
        let mut created = false;

        let session = {
            let entry = self.sessions.entry(user_id).or_insert_with(|| {
                created = true;
                Arc::new(Session::new(
                    user_id,
                    self.factory.connect(user_id),
                    &self.settings,
                    self.clock.clone(),
                ))
            });
            entry.touch(now);
            entry.value().clone()
        };

        if created {
            tracing::debug!(user_id = user_id.0, "session created");
        }
        session
    }

    /// Destroy the session of `user_id`, releasing its client handle.
    pub fn remove(&self, user_id: UserId) -> bool {
        let removed = self.sessions.remove(&user_id).is_some();
        if removed {
            tracing::debug!(user_id = user_id.0, "session removed");
        }
        removed
    }

    /// Remove the session only if it has been idle for longer than `threshold` at `now`.
    pub fn remove_if_idle(&self, user_id: UserId, threshold: Duration, now: Instant) -> bool {
        self.sessions
            .remove_if(&user_id, |_, s| s.idle_for(now) > threshold)
            .is_some()
    }

    pub fn contains(&self, user_id: UserId) -> bool {
        self.sessions.contains_key(&user_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn user_ids(&self) -> Vec<UserId> {
        self.sessions.iter().map(|e| *e.key()).collect()
    }

    /// Sessions currently held, without touching them.
    pub(crate) fn snapshot(&self) -> Vec<Arc<Session>> {
        self.sessions.iter().map(|e| e.value().clone()).collect()
    }

    pub fn stats(&self) -> PoolStats {
        self.snapshot()
            .iter()
            .fold(PoolStats::default(), |mut acc, s| {
                acc.sessions += 1;
                acc.throttle_records += s.pacer.len();
                acc.cached_results += s.cached_len();
                acc
            })
    }
}
