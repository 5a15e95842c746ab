//! Downstream task-database boundary.
//!
//! The core never talks HTTP itself: a [`TaskStore`] is the outbound client handle
//! owned by each session, and a [`ClientFactory`] builds one per session.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::domain::{TaskId, UserId};

/// Workflow status of a task, as named in the Notion database.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    Todo,
    Accepted,
    InRevision,
    InProgress,
    Review,
    Completed,
    Archived,
    Other(String),
}

impl TaskStatus {
    pub const KNOWN: [TaskStatus; 7] = [
        TaskStatus::Todo,
        TaskStatus::Accepted,
        TaskStatus::InRevision,
        TaskStatus::InProgress,
        TaskStatus::Review,
        TaskStatus::Completed,
        TaskStatus::Archived,
    ];

    /// Status option name in the database.
    pub fn notion_name(&self) -> &str {
        match self {
            TaskStatus::Todo => "Сделать",
            TaskStatus::Accepted => "Задача принята",
            TaskStatus::InRevision => "В доработке",
            TaskStatus::InProgress => "В работе",
            TaskStatus::Review => "Проверить",
            TaskStatus::Completed => "Выполнена",
            TaskStatus::Archived => "Archived",
            TaskStatus::Other(name) => name,
        }
    }

    pub fn from_notion_name(name: &str) -> Self {
        Self::KNOWN
            .iter()
            .find(|s| s.notion_name() == name)
            .cloned()
            .unwrap_or_else(|| TaskStatus::Other(name.to_string()))
    }

    /// Short code used in callback payloads.
    pub fn code(&self) -> Option<&'static str> {
        match self {
            TaskStatus::Todo => Some("todo"),
            TaskStatus::Accepted => Some("accepted"),
            TaskStatus::InRevision => Some("revision"),
            TaskStatus::InProgress => Some("progress"),
            TaskStatus::Review => Some("review"),
            TaskStatus::Completed => Some("done"),
            TaskStatus::Archived => Some("archived"),
            TaskStatus::Other(_) => None,
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        Self::KNOWN.iter().find(|s| s.code() == Some(code)).cloned()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,
    pub title: String,
    pub status: Option<TaskStatus>,
    pub priority: Option<String>,
    pub assignees: Vec<String>,
    pub due: Option<NaiveDate>,
    pub tags: Vec<String>,
    pub url: Option<String>,
}

/// Logical filter over the task database.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub assignee_id: Option<String>,
}

impl TaskFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with_status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskQuery {
    pub filter: TaskFilter,
    pub page_limit: u32,
}

impl TaskQuery {
    pub fn new(filter: TaskFilter, page_limit: u32) -> Self {
        Self { filter, page_limit }
    }

    /// Deterministic cache key for this query.
    pub fn fingerprint(&self) -> Fingerprint {
        // Struct fields serialize in declaration order, so the JSON form is canonical.
        let canonical = serde_json::to_vec(self).unwrap_or_default();
        let digest = Sha256::digest(&canonical);
        Fingerprint(digest.iter().map(|b| format!("{b:02x}")).collect())
    }
}

/// Hex SHA-256 of a query's canonical form.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(pub String);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NewTask {
    pub title: String,
    pub assignee_id: Option<String>,
    pub status: Option<TaskStatus>,
    pub priority: Option<String>,
    pub due: Option<NaiveDate>,
    pub tags: Vec<String>,
}

impl NewTask {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }
}

/// Partial update; `None` fields are left untouched.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub status: Option<TaskStatus>,
    pub priority: Option<String>,
    pub due: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Worth retrying later (rate limited upstream, 5xx, timeouts, connection resets).
    #[error("transient task store failure: {0}")]
    Transient(String),

    #[error("task store failure: {0}")]
    Permanent(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Outbound client for the task database.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn query(&self, query: &TaskQuery) -> StoreResult<Vec<TaskRecord>>;
    async fn create(&self, task: &NewTask) -> StoreResult<TaskRecord>;
    async fn update(&self, id: &TaskId, patch: &TaskPatch) -> StoreResult<TaskRecord>;
}

/// Builds the independent client handle a new session owns.
pub trait ClientFactory: Send + Sync {
    fn connect(&self, user_id: UserId) -> Arc<dyn TaskStore>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_deterministic_and_query_sensitive() {
        let a = TaskQuery::new(TaskFilter::all(), 20);
        let b = TaskQuery::new(TaskFilter::all(), 20);
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().0.len(), 64);

        let other_limit = TaskQuery::new(TaskFilter::all(), 10);
        let other_filter = TaskQuery::new(TaskFilter::with_status(TaskStatus::InProgress), 20);
        assert_ne!(a.fingerprint(), other_limit.fingerprint());
        assert_ne!(a.fingerprint(), other_filter.fingerprint());
    }

    #[test]
    fn status_names_round_trip_and_unknown_is_kept() {
        assert_eq!(TaskStatus::from_notion_name("В работе"), TaskStatus::InProgress);
        assert_eq!(
            TaskStatus::from_notion_name("Blocked"),
            TaskStatus::Other("Blocked".to_string())
        );
        assert_eq!(TaskStatus::from_code("done"), Some(TaskStatus::Completed));
        assert_eq!(TaskStatus::from_code("nope"), None);
    }
}
