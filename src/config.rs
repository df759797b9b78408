//! Sync engine configuration.
//!
//! Tunables live in `local_settings` under the `sync` category, the same
//! table the terminal uses for its other persisted settings. Remote service
//! coordinates come from the environment.

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

use crate::db;
use crate::error::StoreResult;
use crate::identifier;
use crate::retry_queue::DEFAULT_BACKOFF_SECS;

const SETTINGS_CATEGORY: &str = "sync";

pub const ENV_BASE_URL: &str = "POS_SYNC_BASE_URL";
pub const ENV_CONSUMER_KEY: &str = "POS_SYNC_CONSUMER_KEY";
pub const ENV_CONSUMER_SECRET: &str = "POS_SYNC_CONSUMER_SECRET";
pub const ENV_DATA_DIR: &str = "POS_SYNC_DATA_DIR";

const APP_DIR_NAME: &str = "com.thesmall.pos";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Background loop tick interval.
    pub interval_secs: u64,
    /// Retry backoff schedule, indexed by retry count and capped at the end.
    pub backoff_secs: Vec<u64>,
    /// Collision budget for frontend id generation.
    pub id_max_attempts: u32,
    /// Timeout for the connectivity probe.
    pub health_timeout_secs: u64,
    /// Timeout for create/update calls to the order service.
    pub request_timeout_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            backoff_secs: DEFAULT_BACKOFF_SECS.to_vec(),
            id_max_attempts: identifier::DEFAULT_MAX_ATTEMPTS,
            health_timeout_secs: 5,
            request_timeout_secs: 30,
        }
    }
}

impl SyncConfig {
    /// Load from `local_settings`, falling back per key to the defaults.
    pub fn load(conn: &Connection) -> Self {
        let defaults = Self::default();
        Self {
            interval_secs: read_parsed(conn, "interval_secs")
                .filter(|v| *v > 0)
                .unwrap_or(defaults.interval_secs),
            backoff_secs: db::get_setting(conn, SETTINGS_CATEGORY, "backoff_secs")
                .and_then(|raw| parse_backoff(&raw))
                .unwrap_or(defaults.backoff_secs),
            id_max_attempts: read_parsed(conn, "id_max_attempts")
                .filter(|v| *v > 0)
                .unwrap_or(defaults.id_max_attempts),
            health_timeout_secs: read_parsed(conn, "health_timeout_secs")
                .unwrap_or(defaults.health_timeout_secs),
            request_timeout_secs: read_parsed(conn, "request_timeout_secs")
                .unwrap_or(defaults.request_timeout_secs),
        }
    }

    pub fn save(&self, conn: &Connection) -> StoreResult<()> {
        let backoff = self
            .backoff_secs
            .iter()
            .map(u64::to_string)
            .collect::<Vec<_>>()
            .join(",");
        db::set_setting(conn, SETTINGS_CATEGORY, "interval_secs", &self.interval_secs.to_string())?;
        db::set_setting(conn, SETTINGS_CATEGORY, "backoff_secs", &backoff)?;
        db::set_setting(
            conn,
            SETTINGS_CATEGORY,
            "id_max_attempts",
            &self.id_max_attempts.to_string(),
        )?;
        db::set_setting(
            conn,
            SETTINGS_CATEGORY,
            "health_timeout_secs",
            &self.health_timeout_secs.to_string(),
        )?;
        db::set_setting(
            conn,
            SETTINGS_CATEGORY,
            "request_timeout_secs",
            &self.request_timeout_secs.to_string(),
        )?;
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

fn read_parsed<T: std::str::FromStr>(conn: &Connection, key: &str) -> Option<T> {
    let raw = db::get_setting(conn, SETTINGS_CATEGORY, key)?;
    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(key, value = %raw, "Ignoring unparseable sync setting");
            None
        }
    }
}

/// Parse a comma separated list of seconds, e.g. `30,60,120`.
fn parse_backoff(raw: &str) -> Option<Vec<u64>> {
    let parsed: Result<Vec<u64>, _> = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::parse::<u64>)
        .collect();
    match parsed {
        Ok(steps) if !steps.is_empty() => Some(steps),
        _ => {
            warn!(value = %raw, "Ignoring invalid backoff schedule");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Remote service
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteConfig {
    pub base_url: String,
    pub consumer_key: String,
    pub consumer_secret: String,
}

impl RemoteConfig {
    pub fn new(base_url: &str, consumer_key: &str, consumer_secret: &str) -> Self {
        Self {
            base_url: normalize_base_url(base_url),
            consumer_key: consumer_key.trim().to_string(),
            consumer_secret: consumer_secret.trim().to_string(),
        }
    }

    /// Read from `POS_SYNC_BASE_URL`, `POS_SYNC_CONSUMER_KEY` and
    /// `POS_SYNC_CONSUMER_SECRET`. Returns `None` if the base URL is unset.
    pub fn from_env() -> Option<Self> {
        let base_url = std::env::var(ENV_BASE_URL)
            .ok()
            .filter(|v| !v.trim().is_empty())?;
        let key = std::env::var(ENV_CONSUMER_KEY).unwrap_or_default();
        let secret = std::env::var(ENV_CONSUMER_SECRET).unwrap_or_default();
        Some(Self::new(&base_url, &key, &secret))
    }
}

/// Normalise the order service URL:
/// - ensure a scheme is present (https, or http for localhost)
/// - strip trailing slashes
pub fn normalize_base_url(url: &str) -> String {
    let mut url = url.trim().to_string();

    if !url.starts_with("http://") && !url.starts_with("https://") {
        if url.starts_with("localhost") || url.starts_with("127.0.0.1") {
            url = format!("http://{url}");
        } else {
            url = format!("https://{url}");
        }
    }

    while url.ends_with('/') {
        url.pop();
    }

    url
}

/// Directory holding `orders.db` and the `logs/` folder.
///
/// `POS_SYNC_DATA_DIR` wins; otherwise the per-user application data
/// directory (`LOCALAPPDATA`, `XDG_DATA_HOME`, or `~/.local/share`).
pub fn data_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os(ENV_DATA_DIR).filter(|v| !v.is_empty()) {
        return PathBuf::from(dir);
    }
    let base = std::env::var("LOCALAPPDATA")
        .or_else(|_| std::env::var("XDG_DATA_HOME"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            #[cfg(target_os = "windows")]
            {
                PathBuf::from(std::env::var("USERPROFILE").unwrap_or_else(|_| ".".into()))
                    .join("AppData")
                    .join("Local")
            }
            #[cfg(not(target_os = "windows"))]
            {
                PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()))
                    .join(".local")
                    .join("share")
            }
        });
    base.join(APP_DIR_NAME)
}
