//! Configuration management for the worker.

use std::env;
use std::time::Duration;
use tidesync_engine::{BackoffPolicy, ResolvePolicy};

/// Worker configuration, loaded from `TIDESYNC_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite URL of the durable change log
    pub database_url: String,
    /// Retry schedule for failed cycles
    pub backoff: BackoffPolicy,
    /// Deadline for each network call
    pub request_timeout: Duration,
    /// Minimum gap between a successful cycle and the next periodic one
    pub min_interval: Duration,
    /// Maximum changes uploaded per push call
    pub push_batch_size: usize,
    /// Conflict policy for edits that cannot be merged
    pub resolve_policy: ResolvePolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "sqlite://tidesync.db".to_string(),
            backoff: BackoffPolicy::default(),
            request_timeout: Duration::from_secs(10),
            min_interval: Duration::from_secs(10),
            push_batch_size: 100,
            resolve_policy: ResolvePolicy::LastWriterWins,
        }
    }
}

impl Config {
    /// Load configuration from the environment, reading `.env` first if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let database_url = lookup("TIDESYNC_DATABASE_URL").unwrap_or(defaults.database_url);

        let base = millis(&lookup, "TIDESYNC_RETRY_BASE_MS")?.unwrap_or(defaults.backoff.base);
        let cap = millis(&lookup, "TIDESYNC_RETRY_CAP_MS")?.unwrap_or(defaults.backoff.cap);
        let max_attempts: u32 =
            number(&lookup, "TIDESYNC_RETRY_MAX_ATTEMPTS")?.unwrap_or(defaults.backoff.max_attempts);
        if max_attempts == 0 {
            return Err(ConfigError::Invalid {
                var: "TIDESYNC_RETRY_MAX_ATTEMPTS",
                value: "0".into(),
            });
        }

        let request_timeout =
            millis(&lookup, "TIDESYNC_REQUEST_TIMEOUT_MS")?.unwrap_or(defaults.request_timeout);
        let min_interval =
            millis(&lookup, "TIDESYNC_MIN_INTERVAL_MS")?.unwrap_or(defaults.min_interval);

        let push_batch_size: usize =
            number(&lookup, "TIDESYNC_PUSH_BATCH_SIZE")?.unwrap_or(defaults.push_batch_size);
        if push_batch_size == 0 {
            return Err(ConfigError::Invalid {
                var: "TIDESYNC_PUSH_BATCH_SIZE",
                value: "0".into(),
            });
        }

        let resolve_policy = match lookup("TIDESYNC_RESOLVE_POLICY") {
            Some(value) => value.parse().map_err(|_| ConfigError::Invalid {
                var: "TIDESYNC_RESOLVE_POLICY",
                value,
            })?,
            None => defaults.resolve_policy,
        };

        Ok(Self {
            database_url,
            backoff: BackoffPolicy::new(base, cap, max_attempts),
            request_timeout,
            min_interval,
            push_batch_size,
            resolve_policy,
        })
    }
}

fn number<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(var) {
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { var, value }),
        None => Ok(None),
    }
}

fn millis(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<Duration>, ConfigError> {
    Ok(number::<u64>(lookup, var)?.map(Duration::from_millis))
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {var}: {value:?}")]
    Invalid { var: &'static str, value: String },
}
