//! Configuration loading from `.env` files.

use std::{env, path::PathBuf, str::FromStr};

use anyhow::{bail, Context, Result};

/// Runtime settings derived from environment variables.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Which persistence backend to open.
    pub store_backend: StoreBackend,
    /// Root directory of the file store. Required for [`StoreBackend::File`].
    pub store_root: Option<PathBuf>,
    /// HTTP bind address, e.g. `127.0.0.1:7777`.
    pub bind_http: String,
    /// Shared admin secret. `/auth` refuses logins while unset.
    pub admin_password: Option<String>,
    /// Mark the session cookie `Secure`.
    pub secure_cookies: bool,
    /// Seed the memory backend with demo tickets.
    pub seed_demo: bool,
    /// Dashboard refresh interval in seconds.
    pub poll_interval_secs: u64,
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    /// Durable JSON documents under `STORE_ROOT`.
    File,
    /// Volatile, single process only.
    Memory,
}

impl FromStr for StoreBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" => Ok(Self::File),
            "memory" => Ok(Self::Memory),
            other => bail!("unknown STORE_BACKEND `{other}` (expected `file` or `memory`)"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;

impl Settings {
    /// Load settings from the specified `.env` file.
    pub fn from_env(path: &str) -> Result<Self> {
        dotenvy::from_filename(path).context("reading env file")?;
        let store_backend = env::var("STORE_BACKEND")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(|s| s.parse::<StoreBackend>())
            .transpose()?
            .unwrap_or(StoreBackend::File);
        let store_root = non_empty("STORE_ROOT").map(PathBuf::from);
        if store_backend == StoreBackend::File && store_root.is_none() {
            bail!("STORE_ROOT must be set when STORE_BACKEND=file");
        }
        let bind_http = env::var("BIND_HTTP").context("BIND_HTTP is not set")?;
        let admin_password = non_empty("ADMIN_PASSWORD");
        let secure_cookies = flag("SECURE_COOKIES");
        let seed_demo = flag("SEED_DEMO");
        let poll_interval_secs = env::var("POLL_INTERVAL_SECS")
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .filter(|s| *s > 0)
            .unwrap_or(DEFAULT_POLL_INTERVAL_SECS);
        let log_format = match non_empty("LOG_FORMAT").as_deref() {
            Some("json") => LogFormat::Json,
            _ => LogFormat::Text,
        };
        Ok(Self {
            store_backend,
            store_root,
            bind_http,
            admin_password,
            secure_cookies,
            seed_demo,
            poll_interval_secs,
            log_format,
        })
    }
}

fn non_empty(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

fn flag(key: &str) -> bool {
    env::var(key).map_or(false, |v| v == "1")
}

/// Every variable [`Settings::from_env`] reads.
#[cfg(test)]
pub(crate) const ENV_KEYS: [&str; 8] = [
    "STORE_BACKEND",
    "STORE_ROOT",
    "BIND_HTTP",
    "ADMIN_PASSWORD",
    "SECURE_COOKIES",
    "SEED_DEMO",
    "POLL_INTERVAL_SECS",
    "LOG_FORMAT",
];

/// Serializes tests that touch process environment variables.
#[cfg(test)]
pub(crate) static ENV_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());

/// Take the env lock and clear every settings variable.
#[cfg(test)]
pub(crate) fn clean_env() -> std::sync::MutexGuard<'static, ()> {
    let guard = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    for v in ENV_KEYS {
        env::remove_var(v);
    }
    guard
}
