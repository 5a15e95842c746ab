use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{
    domain::UserId, errors::Error, pacer::interval_for_rate, reclaimer::ReclaimConfig,
    session::SessionSettings, Result,
};

pub const DEFAULT_NOTION_API_URL: &str = "https://api.notion.com/v1";
pub const DEFAULT_NOTION_VERSION: &str = "2022-06-28";

/// Typed configuration, read from the environment (and an optional `.env`).
#[derive(Clone, Debug)]
pub struct Config {
    // Credentials
    pub telegram_token: String,
    pub notion_token: String,
    pub database_id: String,
    pub admin_id: UserId,

    // Access control
    pub allowlist_file: PathBuf,

    // Sessions
    pub rate_limit_rps: f64,
    /// `1 / rate_limit_rps`, zero when pacing is off.
    pub pace_interval: Duration,
    pub cache_ttl: Duration,
    pub cache_capacity: usize,
    pub query_page_limit: u32,

    // Reclaim
    pub session_idle: Duration,
    pub reclaim_interval: Duration,
    pub throttle_stale: Duration,

    // Notion
    pub notion_api_url: String,
    pub notion_version: String,
    pub notion_timeout: Duration,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from any key lookup (the environment in production).
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let required = |key: &str| -> Result<String> {
            get(key)
                .and_then(non_empty)
                .ok_or_else(|| Error::Config(format!("{key} environment variable is required")))
        };

        let telegram_token = required("TELEGRAM_TOKEN")?;
        let notion_token = required("NOTION_TOKEN")?;
        let database_id = required("DATABASE_ID")?;
        let admin_raw = required("ADMIN_ID")?;
        let admin_id = admin_raw
            .trim()
            .parse::<i64>()
            .map(UserId)
            .map_err(|_| Error::Config(format!("ADMIN_ID is not a numeric user id: {admin_raw}")))?;

        let allowlist_file = PathBuf::from(
            get("ALLOWLIST_FILE")
                .and_then(non_empty)
                .unwrap_or_else(|| "allowed_users.txt".to_string()),
        );

        let rate_limit_rps = parse_f64(get("RATE_LIMIT_RPS")).unwrap_or(1.0);
        if !rate_limit_rps.is_finite() || rate_limit_rps < 0.0 {
            return Err(Error::Config(format!(
                "RATE_LIMIT_RPS must be a non-negative number, got {rate_limit_rps}"
            )));
        }
        let pace_interval = interval_for_rate(rate_limit_rps).ok_or_else(|| {
            Error::Config(format!(
                "RATE_LIMIT_RPS is too small to pace requests, got {rate_limit_rps}"
            ))
        })?;

        let cache_ttl = Duration::from_secs(parse_u64(get("CACHE_TTL_SECS")).unwrap_or(60));
        let cache_capacity = parse_u64(get("CACHE_CAPACITY")).unwrap_or(32) as usize;
        let query_page_limit = parse_u64(get("QUERY_PAGE_LIMIT"))
            .unwrap_or(20)
            .clamp(1, 100) as u32;

        let session_idle = Duration::from_secs(parse_u64(get("SESSION_IDLE_SECS")).unwrap_or(3600));
        let reclaim_interval =
            Duration::from_secs(parse_u64(get("RECLAIM_INTERVAL_SECS")).unwrap_or(3600).max(1));
        let throttle_stale =
            Duration::from_secs(parse_u64(get("THROTTLE_STALE_SECS")).unwrap_or(600));

        let notion_api_url = get("NOTION_API_URL")
            .and_then(non_empty)
            .unwrap_or_else(|| DEFAULT_NOTION_API_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        let notion_version = get("NOTION_VERSION")
            .and_then(non_empty)
            .unwrap_or_else(|| DEFAULT_NOTION_VERSION.to_string());
        let notion_timeout =
            Duration::from_secs(parse_u64(get("NOTION_TIMEOUT_SECS")).unwrap_or(10).max(1));

        Ok(Self {
            telegram_token,
            notion_token,
            database_id,
            admin_id,
            allowlist_file,
            rate_limit_rps,
            pace_interval,
            cache_ttl,
            cache_capacity,
            query_page_limit,
            session_idle,
            reclaim_interval,
            throttle_stale,
            notion_api_url,
            notion_version,
            notion_timeout,
        })
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            pace_interval: self.pace_interval,
            cache_ttl: self.cache_ttl,
            cache_capacity: self.cache_capacity,
        }
    }

    pub fn reclaim_config(&self) -> ReclaimConfig {
        ReclaimConfig {
            every: self.reclaim_interval,
            idle_threshold: self.session_idle,
            stale_window: self.throttle_stale,
        }
    }
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        env::set_var(key, val);
    }
}

fn parse_u64(v: Option<String>) -> Option<u64> {
    v.and_then(|s| s.trim().parse::<u64>().ok())
}

fn parse_f64(v: Option<String>) -> Option<f64> {
    v.and_then(|s| s.trim().parse::<f64>().ok())
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
