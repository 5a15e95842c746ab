//! Periodic reclamation of idle sessions and stale per-session bookkeeping.

use std::{sync::Arc, time::Duration};

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant as TokioInstant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::session::SessionPool;

#[derive(Clone, Copy, Debug)]
pub struct ReclaimConfig {
    /// How often the background loop sweeps.
    pub every: Duration,
    /// Sessions idle for longer than this are evicted.
    pub idle_threshold: Duration,
    /// Throttle records older than this are dropped from surviving sessions.
    pub stale_window: Duration,
}

impl Default for ReclaimConfig {
    fn default() -> Self {
        Self {
            every: Duration::from_secs(60 * 60),
            idle_threshold: Duration::from_secs(60 * 60),
            stale_window: Duration::from_secs(10 * 60),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReclaimReport {
    pub sessions_evicted: usize,
    pub throttle_records_dropped: usize,
    pub cache_entries_dropped: usize,
}

impl ReclaimReport {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

pub struct SessionReclaimer {
    pool: Arc<SessionPool>,
    cfg: ReclaimConfig,
}

impl SessionReclaimer {
    pub fn new(pool: Arc<SessionPool>, cfg: ReclaimConfig) -> Self {
        Self { pool, cfg }
    }

    pub fn config(&self) -> &ReclaimConfig {
        &self.cfg
    }

    /// One reclamation pass. Safe to run while requests are in flight.
    ///
    /// A session that is touched concurrently with its idle check is never evicted:
    /// the check and the removal happen under the pool's entry guard.
    pub fn sweep(&self) -> ReclaimReport {
        let now = self.pool.clock().now();
        let mut report = ReclaimReport::default();

        for session in self.pool.snapshot() {
            let user_id = session.user_id();
            if session.idle_for(now) > self.cfg.idle_threshold
                && self
                    .pool
                    .remove_if_idle(user_id, self.cfg.idle_threshold, now)
            {
                report.sessions_evicted += 1;
                tracing::debug!(user_id = user_id.0, "reclaimed idle session");
                continue;
            }

            let (throttle, cached) = session.sweep_bookkeeping(self.cfg.stale_window);
            report.throttle_records_dropped += throttle;
            report.cache_entries_dropped += cached;
        }

        if report.is_empty() {
            tracing::debug!(sessions = self.pool.len(), "reclaim sweep: nothing to do");
        } else {
            tracing::info!(
                evicted = report.sessions_evicted,
                throttle_records = report.throttle_records_dropped,
                cache_entries = report.cache_entries_dropped,
                remaining = self.pool.len(),
                "reclaim sweep"
            );
        }
        report
    }

    /// Run [`Self::sweep`] every `cfg.every` until `cancel` fires.
    ///
    /// The first sweep happens one period after start. Cancellation is only observed
    /// between sweeps, so a sweep is never interrupted halfway.
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let period = self.cfg.every.max(Duration::from_millis(1));
            let mut tick = interval_at(TokioInstant::now() + period, period);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::info!("session reclaimer stopped");
                        break;
                    }
                    _ = tick.tick() => {
                        self.sweep();
                    }
                }
            }
        })
    }
}
