use chrono::{Duration, FixedOffset};
use std::{env, fmt::Display, path::PathBuf, str::FromStr};

use tracing::{info, warn};

use crate::credentials::DEFAULT_TTL_SECS;

/// UTC+05:30, the civil zone every date and slot is computed in unless overridden.
pub const DEFAULT_UTC_OFFSET_MINUTES: i32 = 330;
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_WORKERS: usize = 4;

#[derive(Debug, Clone)]
pub struct Config {
    pub workspace: Option<PathBuf>,
    pub credential_ttl_secs: i64,
    pub utc_offset_minutes: i32,
    pub db_busy_timeout_ms: u64,
    pub workers: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workspace: None,
            credential_ttl_secs: DEFAULT_TTL_SECS,
            utc_offset_minutes: DEFAULT_UTC_OFFSET_MINUTES,
            db_busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            workers: DEFAULT_WORKERS,
        }
    }
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let cfg = Self {
            workspace: var("ROLLCALL_WORKSPACE").map(PathBuf::from),
            credential_ttl_secs: try_load("ROLLCALL_CREDENTIAL_TTL_SECS", DEFAULT_TTL_SECS)?,
            utc_offset_minutes: try_load(
                "ROLLCALL_UTC_OFFSET_MINUTES",
                DEFAULT_UTC_OFFSET_MINUTES,
            )?,
            db_busy_timeout_ms: try_load("ROLLCALL_DB_BUSY_TIMEOUT_MS", DEFAULT_BUSY_TIMEOUT_MS)?,
            workers: try_load("ROLLCALL_WORKERS", DEFAULT_WORKERS)?,
        };
        cfg.check()?;
        Ok(cfg)
    }

    fn check(&self) -> anyhow::Result<()> {
        if self.credential_ttl_secs <= 0 {
            anyhow::bail!("ROLLCALL_CREDENTIAL_TTL_SECS must be positive");
        }
        if self.workers == 0 {
            anyhow::bail!("ROLLCALL_WORKERS must be at least 1");
        }
        self.timezone()?;
        Ok(())
    }

    pub fn timezone(&self) -> anyhow::Result<FixedOffset> {
        FixedOffset::east_opt(self.utc_offset_minutes * 60).ok_or_else(|| {
            anyhow::anyhow!(
                "ROLLCALL_UTC_OFFSET_MINUTES out of range: {}",
                self.utc_offset_minutes
            )
        })
    }

    pub fn credential_ttl(&self) -> Duration {
        Duration::seconds(self.credential_ttl_secs)
    }

    pub fn busy_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.db_busy_timeout_ms)
    }
}

fn var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn try_load<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr + Display,
    T::Err: Display,
{
    let Some(raw) = var(key) else {
        info!("{key} not set, using default: {default}");
        return Ok(default);
    };
    raw.trim().parse().map_err(|e| {
        warn!("Invalid {key} value: {e}");
        anyhow::anyhow!("invalid {key}: {e}")
    })
}
