use std::path::PathBuf;

use crate::{domain::UserId, tasks::StoreError};

/// Core error type for the bot.
///
/// Adapter crates map their specific errors into this type. User-facing text is
/// never derived from it directly; see `gateway::render_outcome`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("allow-list error: {path}: {reason}")]
    AllowList { path: PathBuf, reason: String },

    #[error("user {0} is the administrator and cannot be removed from the allow-list")]
    AdminProtected(UserId),

    #[error("task store error: {0}")]
    Store(#[from] StoreError),

    #[error("external error: {0}")]
    External(String),
}

pub type Result<T> = std::result::Result<T, Error>;
