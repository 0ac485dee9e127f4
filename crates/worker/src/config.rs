use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use photochanger_core::backoff::RetryPolicy;
use photochanger_core::deadlines::{DEFAULT_RESULT_RETENTION_HOURS, DEFAULT_SYNC_RESPONSE_SECS};
use photochanger_core::ingest::DEFAULT_MAX_UPLOAD_BYTES;
use photochanger_pipeline::{IngestConfig, StatsCacheConfig, WorkerConfig};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{var}='{value}' is invalid: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Gateway configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub database_url: String,
    pub database_max_connections: u32,
    pub media_root: PathBuf,
    /// `T_sync_response`: seconds a job may take from ingest to result.
    pub sync_timeout_sec: u32,
    pub public_link_ttl_sec: u32,
    pub result_ttl_hours: i64,
    pub max_upload_bytes: usize,
    pub max_in_flight: usize,
    pub worker_count: usize,
    pub poll_interval: Duration,
    pub request_timeout: Duration,
    pub min_poll_budget: Duration,
    pub retry: RetryPolicy,
    pub expiry_sweep_interval: Duration,
    pub cleanup_interval: Duration,
    pub stats_slot_ttl: Duration,
    pub stats_global_ttl: Duration,
    pub stats_write_attempts: u32,
    pub log_format: LogFormat,
}

impl GatewayConfig {
    /// Load configuration from the process environment.
    ///
    /// | Env Var                           | Default                       |
    /// |-----------------------------------|-------------------------------|
    /// | `DATABASE_URL`                    | required                      |
    /// | `DATABASE_MAX_CONNECTIONS`        | `10`                          |
    /// | `MEDIA_ROOT`                      | `./var/media`                 |
    /// | `T_SYNC_RESPONSE_SECONDS`         | `48`                          |
    /// | `PUBLIC_LINK_TTL_SECONDS`         | `T_SYNC_RESPONSE_SECONDS`     |
    /// | `RESULT_TTL_HOURS`                | `72`                          |
    /// | `MAX_UPLOAD_BYTES`                | `15728640`                    |
    /// | `QUEUE_MAX_IN_FLIGHT_JOBS`        | `12`                          |
    /// | `WORKER_COUNT`                    | `min(4, QUEUE_MAX_IN_FLIGHT_JOBS)` |
    /// | `WORKER_POLL_INTERVAL_MS`         | `1000`                        |
    /// | `PROVIDER_REQUEST_TIMEOUT_SECS`   | `5`                           |
    /// | `PROVIDER_MIN_POLL_BUDGET_MS`     | `500`                         |
    /// | `PROVIDER_RETRY_ATTEMPTS`         | `5`                           |
    /// | `PROVIDER_RETRY_INITIAL_DELAY_MS` | `500`                         |
    /// | `PROVIDER_RETRY_MAX_DELAY_MS`     | `5000`                        |
    /// | `EXPIRY_SWEEP_INTERVAL_MS`        | `1000`                        |
    /// | `CLEANUP_INTERVAL_SECS`           | `300`                         |
    /// | `STATS_SLOT_TTL_SECS`             | `300`                         |
    /// | `STATS_GLOBAL_TTL_SECS`           | `60`                          |
    /// | `STATS_WRITE_ATTEMPTS`            | `3`                           |
    /// | `LOG_FORMAT`                      | `text` (`json` accepted)      |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup`; empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env(&lookup);

        let database_url = env
            .get("DATABASE_URL")
            .ok_or(ConfigError::Missing("DATABASE_URL"))?;

        let sync_timeout_sec: u32 = env.parse("T_SYNC_RESPONSE_SECONDS", DEFAULT_SYNC_RESPONSE_SECS)?;
        if sync_timeout_sec == 0 {
            return Err(env.invalid("T_SYNC_RESPONSE_SECONDS", "must be positive"));
        }
        let public_link_ttl_sec: u32 = env.parse("PUBLIC_LINK_TTL_SECONDS", sync_timeout_sec)?;
        if public_link_ttl_sec != sync_timeout_sec {
            return Err(env.invalid(
                "PUBLIC_LINK_TTL_SECONDS",
                "must equal T_SYNC_RESPONSE_SECONDS",
            ));
        }

        let result_ttl_hours: i64 = env.parse("RESULT_TTL_HOURS", DEFAULT_RESULT_RETENTION_HOURS)?;
        if result_ttl_hours <= 0 {
            return Err(env.invalid("RESULT_TTL_HOURS", "must be positive"));
        }

        let max_in_flight: usize = env.parse("QUEUE_MAX_IN_FLIGHT_JOBS", 12)?;
        if max_in_flight == 0 {
            return Err(env.invalid("QUEUE_MAX_IN_FLIGHT_JOBS", "must be at least 1"));
        }
        let worker_count: usize = env.parse("WORKER_COUNT", max_in_flight.min(4))?;
        if worker_count == 0 {
            return Err(env.invalid("WORKER_COUNT", "must be at least 1"));
        }

        let retry_attempts: u32 = env.parse("PROVIDER_RETRY_ATTEMPTS", 5)?;
        if retry_attempts == 0 {
            return Err(env.invalid("PROVIDER_RETRY_ATTEMPTS", "must be at least 1"));
        }
        let retry = RetryPolicy {
            max_attempts: retry_attempts,
            initial_delay: Duration::from_millis(env.parse("PROVIDER_RETRY_INITIAL_DELAY_MS", 500)?),
            max_delay: Duration::from_millis(env.parse("PROVIDER_RETRY_MAX_DELAY_MS", 5000)?),
            ..RetryPolicy::default()
        };
        if retry.max_delay < retry.initial_delay {
            return Err(env.invalid(
                "PROVIDER_RETRY_MAX_DELAY_MS",
                "must not be below PROVIDER_RETRY_INITIAL_DELAY_MS",
            ));
        }

        let log_format = match env.get("LOG_FORMAT").map(|v| v.to_ascii_lowercase()) {
            None => LogFormat::Text,
            Some(v) if v == "text" => LogFormat::Text,
            Some(v) if v == "json" => LogFormat::Json,
            Some(_) => return Err(env.invalid("LOG_FORMAT", "expected 'text' or 'json'")),
        };

        Ok(Self {
            database_url,
            database_max_connections: env.parse("DATABASE_MAX_CONNECTIONS", 10)?,
            media_root: env
                .get("MEDIA_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./var/media")),
            sync_timeout_sec,
            public_link_ttl_sec,
            result_ttl_hours,
            max_upload_bytes: env.parse("MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES)?,
            max_in_flight,
            worker_count,
            poll_interval: env.millis("WORKER_POLL_INTERVAL_MS", 1000)?,
            request_timeout: env.secs("PROVIDER_REQUEST_TIMEOUT_SECS", 5)?,
            min_poll_budget: env.millis("PROVIDER_MIN_POLL_BUDGET_MS", 500)?,
            retry,
            expiry_sweep_interval: env.millis("EXPIRY_SWEEP_INTERVAL_MS", 1000)?,
            cleanup_interval: env.secs("CLEANUP_INTERVAL_SECS", 300)?,
            stats_slot_ttl: Duration::from_secs(env.parse("STATS_SLOT_TTL_SECS", 300)?),
            stats_global_ttl: Duration::from_secs(env.parse("STATS_GLOBAL_TTL_SECS", 60)?),
            stats_write_attempts: env.parse("STATS_WRITE_ATTEMPTS", 3)?,
            log_format,
        })
    }

    pub fn worker(&self) -> WorkerConfig {
        WorkerConfig {
            poll_interval: self.poll_interval,
            request_timeout: self.request_timeout,
            min_poll_budget: self.min_poll_budget,
            retry: self.retry.clone(),
            result_retention_hours: self.result_ttl_hours,
        }
    }

    pub fn ingest(&self) -> IngestConfig {
        IngestConfig {
            sync_timeout_sec: self.sync_timeout_sec,
            public_link_ttl_sec: self.public_link_ttl_sec,
            max_upload_bytes: self.max_upload_bytes,
        }
    }

    pub fn stats(&self) -> StatsCacheConfig {
        StatsCacheConfig {
            slot_ttl: self.stats_slot_ttl,
            global_ttl: self.stats_global_ttl,
            write_attempts: self.stats_write_attempts.max(1),
            ..StatsCacheConfig::default()
        }
    }
}

struct Env<'a, F>(&'a F);

impl<F: Fn(&str) -> Option<String>> Env<'_, F> {
    fn get(&self, var: &str) -> Option<String> {
        (self.0)(var)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T>(&self, var: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(var) {
            None => Ok(default),
            Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
                var,
                value: raw.clone(),
                reason: e.to_string(),
            }),
        }
    }

    /// A non-zero interval in milliseconds.
    fn millis(&self, var: &'static str, default: u64) -> Result<Duration, ConfigError> {
        match self.parse(var, default)? {
            0 => Err(self.invalid(var, "must be positive")),
            ms => Ok(Duration::from_millis(ms)),
        }
    }

    /// A non-zero interval in seconds.
    fn secs(&self, var: &'static str, default: u64) -> Result<Duration, ConfigError> {
        match self.parse(var, default)? {
            0 => Err(self.invalid(var, "must be positive")),
            secs => Ok(Duration::from_secs(secs)),
        }
    }

    fn invalid(&self, var: &'static str, reason: &str) -> ConfigError {
        ConfigError::Invalid {
            var,
            value: self.get(var).unwrap_or_default(),
            reason: reason.to_string(),
        }
    }
}
