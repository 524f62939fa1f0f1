//! Process configuration loaded from environment variables.
//!
//! Every variable is optional. Malformed values are rejected rather than
//! silently replaced by defaults.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use reqwest::Url;
use thiserror::Error;

use bulkpatch_infra::downstream::HttpUpdaterConfig;
use bulkpatch_infra::jobs::{DrainConfig, RetentionPolicy};
use bulkpatch_infra::throttle::RateLimiterConfig;
use bulkpatch_observability::LogFormat;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key}: invalid value '{value}': {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("{0}")]
    Inconsistent(String),
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    /// HS256 secret; `None` falls back to an insecure development secret.
    pub jwt_secret: Option<String>,
    /// Durable store; `None` keeps everything in process memory.
    pub redis_url: Option<String>,
    /// Downstream service; `None` uses the in-memory record target.
    pub downstream: Option<HttpUpdaterConfig>,
    pub drain: DrainConfig,
    /// Period of the background drain loop; `None` disables it.
    pub drain_interval: Option<Duration>,
    pub retention: RetentionPolicy,
    pub rate_limiter: RateLimiterConfig,
    pub status_cache_ttl: Duration,
    pub log_format: LogFormat,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            jwt_secret: None,
            redis_url: None,
            downstream: None,
            drain: DrainConfig::default(),
            drain_interval: None,
            retention: RetentionPolicy::default(),
            rate_limiter: RateLimiterConfig::default(),
            status_cache_ttl: Duration::from_millis(3_000),
            log_format: LogFormat::default(),
        }
    }
}

fn parse<T>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
        key,
        value: raw.to_string(),
        reason: e.to_string(),
    })
}

impl AppConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup (used by tests).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut cfg = Self::default();

        if let Some(raw) = get("BIND_ADDR") {
            cfg.bind_addr = parse("BIND_ADDR", &raw)?;
        }
        cfg.jwt_secret = get("JWT_SECRET");
        cfg.redis_url = get("REDIS_URL");

        if let Some(raw) = get("DOWNSTREAM_URL") {
            let base_url: Url = parse("DOWNSTREAM_URL", &raw)?;
            let timeout = match get("DOWNSTREAM_TIMEOUT_SECS") {
                Some(raw) => Duration::from_secs(parse("DOWNSTREAM_TIMEOUT_SECS", &raw)?),
                None => Duration::from_secs(10),
            };
            cfg.downstream = Some(HttpUpdaterConfig {
                base_url,
                bearer_token: get("DOWNSTREAM_TOKEN"),
                timeout,
            });
        }

        if let Some(raw) = get("DRAIN_BUDGET") {
            cfg.drain.budget = parse("DRAIN_BUDGET", &raw)?;
        }
        if let Some(raw) = get("DRAIN_HOST_CALL_LIMIT") {
            cfg.drain.host_call_limit = parse("DRAIN_HOST_CALL_LIMIT", &raw)?;
        }
        if let Some(raw) = get("DRAIN_MAX_JOBS_PER_RUN") {
            cfg.drain.max_jobs_per_run = parse("DRAIN_MAX_JOBS_PER_RUN", &raw)?;
        }
        if let Some(raw) = get("DRAIN_INTERVAL_SECS") {
            let secs: u64 = parse("DRAIN_INTERVAL_SECS", &raw)?;
            if secs == 0 {
                return Err(ConfigError::Invalid {
                    key: "DRAIN_INTERVAL_SECS",
                    value: raw,
                    reason: "must be positive".to_string(),
                });
            }
            cfg.drain_interval = Some(Duration::from_secs(secs));
        }

        if let Some(raw) = get("JOB_TTL_SECS") {
            cfg.retention.job_ttl = Duration::from_secs(parse("JOB_TTL_SECS", &raw)?);
        }
        if let Some(raw) = get("BATCH_TTL_SECS") {
            cfg.retention.batch_ttl = Duration::from_secs(parse("BATCH_TTL_SECS", &raw)?);
        }
        if let Some(raw) = get("RESULTS_TTL_SECS") {
            cfg.retention.results_ttl = Duration::from_secs(parse("RESULTS_TTL_SECS", &raw)?);
        }

        if let Some(raw) = get("RATE_LIMIT_MIN_DELAY_MS") {
            cfg.rate_limiter.min_delay = Duration::from_millis(parse("RATE_LIMIT_MIN_DELAY_MS", &raw)?);
        }
        if let Some(raw) = get("RATE_LIMIT_MAX_DELAY_MS") {
            cfg.rate_limiter.max_delay = Duration::from_millis(parse("RATE_LIMIT_MAX_DELAY_MS", &raw)?);
        }
        if let Some(raw) = get("STATUS_CACHE_TTL_MS") {
            cfg.status_cache_ttl = Duration::from_millis(parse("STATUS_CACHE_TTL_MS", &raw)?);
        }
        if let Some(raw) = get("LOG_FORMAT") {
            cfg.log_format = parse("LOG_FORMAT", &raw)?;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.drain.validate().map_err(ConfigError::Inconsistent)?;
        self.retention.validate().map_err(ConfigError::Inconsistent)?;
        self.rate_limiter.validate().map_err(ConfigError::Inconsistent)?;
        Ok(())
    }
}
