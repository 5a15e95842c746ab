//! Single entry point for user actions.
//!
//! Every action passes the same pipeline: access check, session lookup, pacing for
//! downstream calls, cache lookup for reads, then the task store. [`render_outcome`]
//! is the only place an [`Outcome`] becomes user-visible text.

use std::{sync::Arc, time::Duration};

use crate::{
    access::AccessGate,
    domain::{TaskId, UserId},
    formatting,
    reply::Reply,
    session::{Session, SessionPool},
    tasks::{NewTask, StoreError, TaskFilter, TaskPatch, TaskQuery, TaskStatus},
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Action {
    Start,
    Help,
    /// Abandon whatever the user was doing.
    Cancel,
    ListTasks(TaskFilter),
    CreateTask(NewTask),
    SetStatus { id: TaskId, status: TaskStatus },
    AllowUser(UserId),
    DenyUser(UserId),
    Stats,
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::Start => "start",
            Action::Help => "help",
            Action::Cancel => "cancel",
            Action::ListTasks(_) => "list_tasks",
            Action::CreateTask(_) => "create_task",
            Action::SetStatus { .. } => "set_status",
            Action::AllowUser(_) => "allow_user",
            Action::DenyUser(_) => "deny_user",
            Action::Stats => "stats",
        }
    }

    pub fn requires_admin(&self) -> bool {
        matches!(
            self,
            Action::AllowUser(_) | Action::DenyUser(_) | Action::Stats
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Failure {
    /// The task store call failed. Details are logged, never shown.
    Downstream { transient: bool },
    AdminOnly,
    /// A local operation (allow-list persistence) failed.
    Internal,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Response(Reply),
    Denied,
    RateLimited { retry_after: Duration },
    Failed(Failure),
}

pub struct Gateway {
    gate: Arc<AccessGate>,
    pool: Arc<SessionPool>,
    page_limit: u32,
}

impl Gateway {
    pub fn new(gate: Arc<AccessGate>, pool: Arc<SessionPool>, page_limit: u32) -> Self {
        Self {
            gate,
            pool,
            page_limit,
        }
    }

    pub fn gate(&self) -> &Arc<AccessGate> {
        &self.gate
    }

    pub fn pool(&self) -> &Arc<SessionPool> {
        &self.pool
    }

    pub async fn handle_action(&self, user_id: UserId, action: Action) -> Outcome {
        if !self.gate.is_allowed(user_id) {
            tracing::info!(user_id = user_id.0, action = action.name(), "access denied");
            return Outcome::Denied;
        }

        if action.requires_admin() {
            if !self.gate.is_admin(user_id) {
                tracing::warn!(user_id = user_id.0, action = action.name(), "admin action refused");
                return Outcome::Failed(Failure::AdminOnly);
            }
            return self.handle_admin(action);
        }

        let session = self.pool.get_or_create(user_id);
        // A deny may have landed between the check above and the session lookup.
        if !self.gate.is_allowed(user_id) {
            self.pool.remove(user_id);
            tracing::info!(user_id = user_id.0, action = action.name(), "access revoked mid-request");
            return Outcome::Denied;
        }

        match action {
            Action::Start => Outcome::Response(formatting::welcome()),
            Action::Help => Outcome::Response(Reply::text(formatting::HELP)),
            Action::Cancel => Outcome::Response(Reply::text(formatting::CANCELLED)),
            Action::CreateTask(task) if task.title.trim().is_empty() => {
                Outcome::Response(Reply::text(formatting::NEW_TASK_USAGE))
            }
            downstream => self.handle_downstream(&session, downstream).await,
        }
    }

    async fn handle_downstream(&self, session: &Session, action: Action) -> Outcome {
        let user_id = session.user_id();

        // A failed call keeps its slot so a failing backend is not hammered with retries.
        if !session.try_acquire_slot() {
            let retry_after = session
                .retry_after()
                .unwrap_or_else(|| session.pacer().interval());
            tracing::debug!(user_id = user_id.0, ?retry_after, "rate limited");
            return Outcome::RateLimited { retry_after };
        }

        let name = action.name();
        let result = match action {
            Action::ListTasks(filter) => {
                let query = TaskQuery::new(filter, self.page_limit);
                let fingerprint = query.fingerprint();
                if let Some(tasks) = session.cached(&fingerprint) {
                    tracing::debug!(user_id = user_id.0, "task list served from cache");
                    return Outcome::Response(formatting::task_list(&tasks));
                }
                session.client().query(&query).await.map(|tasks| {
                    session.remember(fingerprint, tasks.clone());
                    formatting::task_list(&tasks)
                })
            }
            Action::CreateTask(task) => session.client().create(&task).await.map(|created| {
                session.forget_results();
                formatting::task_created(&created)
            }),
            Action::SetStatus { id, status } => {
                let patch = TaskPatch {
                    status: Some(status),
                    ..TaskPatch::default()
                };
                session.client().update(&id, &patch).await.map(|updated| {
                    session.forget_results();
                    formatting::task_updated(&updated)
                })
            }
            other => {
                tracing::error!(action = other.name(), "non-downstream action reached the task store path");
                return Outcome::Failed(Failure::Internal);
            }
        };

        match result {
            Ok(reply) => Outcome::Response(reply),
            Err(e) => {
                log_downstream_failure(user_id, name, &e);
                Outcome::Failed(Failure::Downstream {
                    transient: e.is_transient(),
                })
            }
        }
    }

    fn handle_admin(&self, action: Action) -> Outcome {
        match action {
            Action::AllowUser(target) => match self.gate.add(target) {
                Ok(true) => Outcome::Response(Reply::text(format!(
                    "✅ Пользователь <code>{target}</code> получил доступ"
                ))),
                Ok(false) => Outcome::Response(Reply::text(format!(
                    "ℹ️ Пользователь <code>{target}</code> уже в списке"
                ))),
                Err(e) => {
                    tracing::error!(user_id = target.0, error = %e, "failed to update allow-list");
                    Outcome::Failed(Failure::Internal)
                }
            },
            Action::DenyUser(target) if self.gate.is_admin(target) => Outcome::Response(
                Reply::text("⛔ Нельзя закрыть доступ администратору"),
            ),
            Action::DenyUser(target) => match self.gate.remove(target) {
                Ok(removed) => {
                    // Release whatever the user still holds.
                    self.pool.remove(target);
                    let text = if removed {
                        format!("🚫 Пользователь <code>{target}</code> лишён доступа")
                    } else {
                        format!("ℹ️ Пользователя <code>{target}</code> нет в списке")
                    };
                    Outcome::Response(Reply::text(text))
                }
                Err(e) => {
                    tracing::error!(user_id = target.0, error = %e, "failed to update allow-list");
                    Outcome::Failed(Failure::Internal)
                }
            },
            Action::Stats => {
                let stats = self.pool.stats();
                Outcome::Response(Reply::text(format!(
                    "📊 <b>Состояние</b>\n\n\
Активные сессии: {}\n\
Записи ограничителя: {}\n\
Кэшированные запросы: {}\n\
Пользователи с доступом: {}",
                    stats.sessions,
                    stats.throttle_records,
                    stats.cached_results,
                    self.gate.len()
                )))
            }
            other => {
                tracing::error!(action = other.name(), "non-admin action reached the admin path");
                Outcome::Failed(Failure::Internal)
            }
        }
    }
}

fn log_downstream_failure(user_id: UserId, action: &str, err: &StoreError) {
    if err.is_transient() {
        tracing::warn!(user_id = user_id.0, action, error = %err, "task store call failed (transient)");
    } else {
        tracing::error!(user_id = user_id.0, action, error = %err, "task store call failed");
    }
}

/// Convert any outcome into the reply shown to the user.
pub fn render_outcome(outcome: Outcome) -> Reply {
    match outcome {
        Outcome::Response(reply) => reply,
        Outcome::Denied => Reply::text(formatting::ACCESS_DENIED),
        Outcome::RateLimited { retry_after } => {
            Reply::text(formatting::rate_limited(retry_after.as_secs_f64()))
        }
        Outcome::Failed(Failure::Downstream { transient: true }) => {
            Reply::text(formatting::DOWNSTREAM_UNAVAILABLE)
        }
        Outcome::Failed(Failure::Downstream { transient: false })
        | Outcome::Failed(Failure::Internal) => Reply::text(formatting::GENERIC_FAILURE),
        Outcome::Failed(Failure::AdminOnly) => Reply::text(formatting::ADMIN_ONLY),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::{
        access::AllowListStore,
        clock::ManualClock,
        session::SessionSettings,
        tasks::{ClientFactory, StoreResult, TaskRecord, TaskStore},
        Result,
    };

    const INTERVAL: Duration = Duration::from_secs(1);
    const TTL: Duration = Duration::from_secs(60);
    const ADMIN: UserId = UserId(1);
    const ALICE: UserId = UserId(10);
    const BOB: UserId = UserId(20);
    const MALLORY: UserId = UserId(666);

    #[derive(Default)]
    struct MemoryStore {
        saved: Mutex<HashSet<UserId>>,
    }

    impl AllowListStore for MemoryStore {
        fn load(&self) -> Result<HashSet<UserId>> {
            Ok([ALICE, BOB].into_iter().collect())
        }

        fn save(&self, members: &HashSet<UserId>) -> Result<()> {
            *self.saved.lock().unwrap() = members.clone();
            Ok(())
        }
    }

    /// Shared backend; each session gets its own handle onto it.
    #[derive(Default)]
    struct Backend {
        queries: AtomicUsize,
        writes: AtomicUsize,
        fail: AtomicBool,
        tasks: Mutex<Vec<TaskRecord>>,
    }

    struct Handle {
        backend: Arc<Backend>,
    }

    fn record(id: &str, title: &str, status: TaskStatus) -> TaskRecord {
        TaskRecord {
            id: TaskId(id.to_string()),
            title: title.to_string(),
            status: Some(status),
            priority: None,
            assignees: vec![],
            due: None,
            tags: vec![],
            url: None,
        }
    }

    #[async_trait]
    impl TaskStore for Handle {
        async fn query(&self, _query: &TaskQuery) -> StoreResult<Vec<TaskRecord>> {
            self.backend.queries.fetch_add(1, Ordering::SeqCst);
            if self.backend.fail.load(Ordering::SeqCst) {
                return Err(StoreError::Transient(
                    "502 Bad Gateway from api.notion.com token=secret".to_string(),
                ));
            }
            Ok(self.backend.tasks.lock().unwrap().clone())
        }

        async fn create(&self, task: &NewTask) -> StoreResult<TaskRecord> {
            self.backend.writes.fetch_add(1, Ordering::SeqCst);
            if self.backend.fail.load(Ordering::SeqCst) {
                return Err(StoreError::Permanent("validation_error".to_string()));
            }
            let mut tasks = self.backend.tasks.lock().unwrap();
            let rec = record(&format!("t{}", tasks.len() + 1), &task.title, TaskStatus::Todo);
            tasks.push(rec.clone());
            Ok(rec)
        }

        async fn update(&self, id: &TaskId, patch: &TaskPatch) -> StoreResult<TaskRecord> {
            self.backend.writes.fetch_add(1, Ordering::SeqCst);
            let mut tasks = self.backend.tasks.lock().unwrap();
            let task = tasks
                .iter_mut()
                .find(|t| &t.id == id)
                .ok_or_else(|| StoreError::Permanent("object_not_found".to_string()))?;
            if let Some(status) = &patch.status {
                task.status = Some(status.clone());
            }
            Ok(task.clone())
        }
    }

    struct Factory {
        backend: Arc<Backend>,
    }

    impl ClientFactory for Factory {
        fn connect(&self, _user_id: UserId) -> Arc<dyn TaskStore> {
            Arc::new(Handle {
                backend: self.backend.clone(),
            })
        }
    }

    struct Harness {
        clock: ManualClock,
        backend: Arc<Backend>,
        gateway: Gateway,
    }

    fn harness() -> Harness {
        let clock = ManualClock::new();
        let backend = Arc::new(Backend::default());
        backend
            .tasks
            .lock()
            .unwrap()
            .push(record("t0", "Seed", TaskStatus::InProgress));

        let gate = Arc::new(AccessGate::load(ADMIN, Box::new(MemoryStore::default())).unwrap());
        let pool = Arc::new(SessionPool::new(
            Arc::new(Factory {
                backend: backend.clone(),
            }),
            Arc::new(clock.clone()),
            SessionSettings {
                pace_interval: INTERVAL,
                cache_ttl: TTL,
                cache_capacity: 8,
            },
        ));
        Harness {
            clock,
            backend,
            gateway: Gateway::new(gate, pool, 20),
        }
    }

    fn list() -> Action {
        Action::ListTasks(TaskFilter::all())
    }

    #[tokio::test]
    async fn users_are_paced_independently() {
        let h = harness();

        let a = h.gateway.handle_action(ALICE, list()).await;
        let b = h.gateway.handle_action(BOB, list()).await;
        assert!(matches!(a, Outcome::Response(_)));
        assert!(matches!(b, Outcome::Response(_)));

        let again = h.gateway.handle_action(ALICE, list()).await;
        assert_eq!(
            again,
            Outcome::RateLimited {
                retry_after: INTERVAL
            }
        );
    }

    #[tokio::test]
    async fn denied_user_never_gets_a_session() {
        let h = harness();
        assert_eq!(h.gateway.handle_action(MALLORY, list()).await, Outcome::Denied);
        assert_eq!(
            h.gateway.handle_action(MALLORY, Action::Start).await,
            Outcome::Denied
        );
        assert!(!h.gateway.pool().contains(MALLORY));
        assert_eq!(h.backend.queries.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn repeated_list_is_served_from_cache_until_ttl() {
        let h = harness();
        h.gateway.handle_action(ALICE, list()).await;

        h.clock.advance(INTERVAL);
        let cached = h.gateway.handle_action(ALICE, list()).await;
        assert!(matches!(cached, Outcome::Response(ref r) if r.html.contains("Seed")));
        assert_eq!(h.backend.queries.load(Ordering::SeqCst), 1);

        h.clock.advance(TTL);
        h.gateway.handle_action(ALICE, list()).await;
        assert_eq!(h.backend.queries.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn writes_invalidate_cached_lists() {
        let h = harness();
        h.gateway.handle_action(ALICE, list()).await;

        h.clock.advance(INTERVAL);
        let created = h
            .gateway
            .handle_action(ALICE, Action::CreateTask(NewTask::titled("Buy milk")))
            .await;
        assert!(matches!(created, Outcome::Response(ref r) if r.html.contains(formatting::TASK_CREATED)));

        h.clock.advance(INTERVAL);
        let listed = h.gateway.handle_action(ALICE, list()).await;
        assert!(matches!(listed, Outcome::Response(ref r) if r.html.contains("Buy milk")));
        assert_eq!(h.backend.queries.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn set_status_updates_task() {
        let h = harness();
        let out = h
            .gateway
            .handle_action(
                ALICE,
                Action::SetStatus {
                    id: TaskId("t0".to_string()),
                    status: TaskStatus::Completed,
                },
            )
            .await;
        assert!(matches!(out, Outcome::Response(ref r) if r.html.contains("Выполнена")));
    }

    #[tokio::test]
    async fn downstream_failure_keeps_slot_and_hides_details() {
        let h = harness();
        h.backend.fail.store(true, Ordering::SeqCst);

        let failed = h.gateway.handle_action(ALICE, list()).await;
        assert_eq!(failed, Outcome::Failed(Failure::Downstream { transient: true }));

        let reply = render_outcome(failed);
        assert_eq!(reply.html, formatting::DOWNSTREAM_UNAVAILABLE);
        assert!(!reply.html.contains("secret"));

        // Slot consumed, nothing cached.
        assert!(matches!(
            h.gateway.handle_action(ALICE, list()).await,
            Outcome::RateLimited { .. }
        ));
        let session = h.gateway.pool().get_or_create(ALICE);
        assert_eq!(session.cached_len(), 0);

        h.backend.fail.store(false, Ordering::SeqCst);
        h.clock.advance(INTERVAL);
        assert!(matches!(
            h.gateway.handle_action(ALICE, list()).await,
            Outcome::Response(_)
        ));
    }

    #[tokio::test]
    async fn empty_title_is_answered_without_spending_a_slot() {
        let h = harness();
        let out = h
            .gateway
            .handle_action(ALICE, Action::CreateTask(NewTask::titled("  ")))
            .await;
        assert_eq!(out, Outcome::Response(Reply::text(formatting::NEW_TASK_USAGE)));
        assert_eq!(h.backend.writes.load(Ordering::SeqCst), 0);
        assert!(matches!(
            h.gateway.handle_action(ALICE, list()).await,
            Outcome::Response(_)
        ));
    }

    #[tokio::test]
    async fn cancel_confirms_without_spending_a_slot() {
        let h = harness();
        assert_eq!(
            h.gateway.handle_action(ALICE, Action::Cancel).await,
            Outcome::Response(Reply::text(formatting::CANCELLED))
        );
        assert!(matches!(
            h.gateway.handle_action(ALICE, list()).await,
            Outcome::Response(_)
        ));
    }

    #[tokio::test]
    async fn admin_actions_require_admin() {
        let h = harness();
        assert_eq!(
            h.gateway.handle_action(ALICE, Action::AllowUser(MALLORY)).await,
            Outcome::Failed(Failure::AdminOnly)
        );
        assert!(!h.gateway.gate().is_allowed(MALLORY));

        let out = h.gateway.handle_action(ADMIN, Action::Stats).await;
        assert!(matches!(out, Outcome::Response(ref r) if r.html.contains("Пользователи с доступом: 3")));
    }

    #[tokio::test]
    async fn deny_takes_effect_immediately_and_drops_session() {
        let h = harness();
        h.gateway.handle_action(BOB, list()).await;
        assert!(h.gateway.pool().contains(BOB));

        let out = h.gateway.handle_action(ADMIN, Action::DenyUser(BOB)).await;
        assert!(matches!(out, Outcome::Response(_)));
        assert!(!h.gateway.gate().is_allowed(BOB));
        assert!(!h.gateway.pool().contains(BOB));
        assert_eq!(h.gateway.handle_action(BOB, list()).await, Outcome::Denied);

        h.gateway.handle_action(ADMIN, Action::AllowUser(BOB)).await;
        h.clock.advance(INTERVAL);
        assert!(matches!(
            h.gateway.handle_action(BOB, list()).await,
            Outcome::Response(_)
        ));
    }

    /// Revokes `target` while its session is being built, as a concurrent deny would.
    struct RevokingFactory {
        backend: Arc<Backend>,
        gate: std::sync::OnceLock<Arc<AccessGate>>,
        target: UserId,
    }

    impl ClientFactory for RevokingFactory {
        fn connect(&self, user_id: UserId) -> Arc<dyn TaskStore> {
            if user_id == self.target {
                if let Some(gate) = self.gate.get() {
                    gate.remove(user_id).unwrap();
                }
            }
            Arc::new(Handle {
                backend: self.backend.clone(),
            })
        }
    }

    #[tokio::test]
    async fn deny_racing_session_creation_leaves_no_session() {
        let clock = ManualClock::new();
        let backend = Arc::new(Backend::default());
        let factory = Arc::new(RevokingFactory {
            backend: backend.clone(),
            gate: std::sync::OnceLock::new(),
            target: BOB,
        });
        let gate = Arc::new(AccessGate::load(ADMIN, Box::new(MemoryStore::default())).unwrap());
        let _ = factory.gate.set(gate.clone());
        let pool = Arc::new(SessionPool::new(
            factory,
            Arc::new(clock),
            SessionSettings::default(),
        ));
        let gateway = Gateway::new(gate, pool, 20);

        assert_eq!(gateway.handle_action(BOB, list()).await, Outcome::Denied);
        assert!(!gateway.pool().contains(BOB));
        assert_eq!(backend.queries.load(Ordering::SeqCst), 0);

        assert!(matches!(
            gateway.handle_action(ALICE, list()).await,
            Outcome::Response(_)
        ));
    }

    #[tokio::test]
    async fn admin_cannot_deny_self() {
        let h = harness();
        h.gateway.handle_action(ADMIN, Action::DenyUser(ADMIN)).await;
        assert!(h.gateway.gate().is_allowed(ADMIN));
    }

    #[test]
    fn render_maps_every_outcome() {
        assert_eq!(render_outcome(Outcome::Denied).html, formatting::ACCESS_DENIED);
        assert_eq!(
            render_outcome(Outcome::Failed(Failure::Downstream { transient: false })).html,
            formatting::GENERIC_FAILURE
        );
        assert_eq!(
            render_outcome(Outcome::Failed(Failure::AdminOnly)).html,
            formatting::ADMIN_ONLY
        );
        assert!(render_outcome(Outcome::RateLimited {
            retry_after: Duration::from_millis(1500)
        })
        .html
        .contains("1.5"));
    }
}
