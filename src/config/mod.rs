//! Typed configuration from environment variables.
//!
//! Loads once at startup and fails fast on missing or malformed values.
//! Secrets are wrapped in `secrecy::SecretString` so they stay out of logs.

pub mod secrets;

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::breaker::BreakerConfig;
use crate::cache::DEFAULT_TTL;
use crate::error::{Error, Result};
use crate::llm::DEFAULT_MAX_TOKENS;
use crate::model::RequestKind;
use crate::validator::DEFAULT_DISTRACTOR_COUNT;
use secrets::SecretString;

pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

/// Process-level settings.
#[derive(Debug)]
pub struct Config {
    pub anthropic_api_key: SecretString,
    pub model: String,
    /// Completion budget per backend call.
    pub max_tokens: u64,
    /// Enables the Postgres cache store when set.
    pub database_url: Option<SecretString>,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
    /// TOML file replacing the built-in taxonomy.
    pub taxonomy_path: Option<PathBuf>,
    pub engine: EngineConfig,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            anthropic_api_key: SecretString::from(required_var("ANTHROPIC_API_KEY")?),
            model: optional_var("INSTRUCT_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            max_tokens: parsed_var("INSTRUCT_MAX_TOKENS")?.unwrap_or(DEFAULT_MAX_TOKENS),
            database_url: optional_var("DATABASE_URL").map(SecretString::from),
            otel_endpoint: optional_var("OTEL_ENDPOINT"),
            log_level: optional_var("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            taxonomy_path: optional_var("INSTRUCT_TAXONOMY_PATH").map(PathBuf::from),
            engine: EngineConfig::from_env()?,
        })
    }
}

/// Tuning for the retry loop, breaker and cache.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub objectives_max_attempts: u32,
    pub quiz_max_attempts: u32,
    /// Per-attempt backend timeout.
    pub attempt_timeout: Duration,
    /// Backoff before attempt n+1 is `min(base * 2^(n-1), max)`.
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
    pub breaker: BreakerConfig,
    pub cache_ttl: Duration,
    pub distractor_count: usize,
    /// Finished requests whose attempt logs stay queryable.
    pub trailing_log_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            objectives_max_attempts: 3,
            quiz_max_attempts: 3,
            attempt_timeout: Duration::from_secs(60),
            retry_base_delay: Duration::from_secs(1),
            retry_max_delay: Duration::from_secs(10),
            breaker: BreakerConfig::default(),
            cache_ttl: DEFAULT_TTL,
            distractor_count: DEFAULT_DISTRACTOR_COUNT,
            trailing_log_capacity: 64,
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by any `INSTRUCT_*` variables that are set.
    ///
    /// | Variable | Unit |
    /// |---|---|
    /// | `INSTRUCT_OBJECTIVES_MAX_ATTEMPTS` | count |
    /// | `INSTRUCT_QUIZ_MAX_ATTEMPTS` | count |
    /// | `INSTRUCT_ATTEMPT_TIMEOUT_SECS` | seconds |
    /// | `INSTRUCT_RETRY_BASE_DELAY_MS` | milliseconds |
    /// | `INSTRUCT_RETRY_MAX_DELAY_MS` | milliseconds |
    /// | `INSTRUCT_BREAKER_FAILURE_THRESHOLD` | count |
    /// | `INSTRUCT_BREAKER_COOLDOWN_SECS` | seconds |
    /// | `INSTRUCT_BREAKER_HALF_OPEN_SUCCESSES` | count |
    /// | `INSTRUCT_CACHE_TTL_SECS` | seconds |
    /// | `INSTRUCT_DISTRACTOR_COUNT` | count |
    /// | `INSTRUCT_TRAILING_LOG_CAPACITY` | count |
    pub fn from_env() -> Result<Self> {
        let d = Self::default();
        let config = Self {
            objectives_max_attempts: parsed_var("INSTRUCT_OBJECTIVES_MAX_ATTEMPTS")?
                .unwrap_or(d.objectives_max_attempts),
            quiz_max_attempts: parsed_var("INSTRUCT_QUIZ_MAX_ATTEMPTS")?.unwrap_or(d.quiz_max_attempts),
            attempt_timeout: parsed_var("INSTRUCT_ATTEMPT_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(d.attempt_timeout),
            retry_base_delay: parsed_var("INSTRUCT_RETRY_BASE_DELAY_MS")?
                .map(Duration::from_millis)
                .unwrap_or(d.retry_base_delay),
            retry_max_delay: parsed_var("INSTRUCT_RETRY_MAX_DELAY_MS")?
                .map(Duration::from_millis)
                .unwrap_or(d.retry_max_delay),
            breaker: BreakerConfig {
                failure_threshold: parsed_var("INSTRUCT_BREAKER_FAILURE_THRESHOLD")?
                    .unwrap_or(d.breaker.failure_threshold),
                cooldown: parsed_var("INSTRUCT_BREAKER_COOLDOWN_SECS")?
                    .map(Duration::from_secs)
                    .unwrap_or(d.breaker.cooldown),
                half_open_success_threshold: parsed_var("INSTRUCT_BREAKER_HALF_OPEN_SUCCESSES")?
                    .unwrap_or(d.breaker.half_open_success_threshold),
            },
            cache_ttl: parsed_var("INSTRUCT_CACHE_TTL_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(d.cache_ttl),
            distractor_count: parsed_var("INSTRUCT_DISTRACTOR_COUNT")?.unwrap_or(d.distractor_count),
            trailing_log_capacity: parsed_var("INSTRUCT_TRAILING_LOG_CAPACITY")?
                .unwrap_or(d.trailing_log_capacity),
        };
        config.check()?;
        Ok(config)
    }

    /// Reject values the engine cannot run with.
    pub fn check(&self) -> Result<()> {
        if self.objectives_max_attempts == 0 || self.quiz_max_attempts == 0 {
            return Err(Error::Config("max attempts must be at least 1".to_string()));
        }
        if self.attempt_timeout.is_zero() {
            return Err(Error::Config("attempt timeout must be positive".to_string()));
        }
        if self.retry_max_delay < self.retry_base_delay {
            return Err(Error::Config(
                "retry max delay must not be below the base delay".to_string(),
            ));
        }
        if self.breaker.failure_threshold == 0 || self.breaker.half_open_success_threshold == 0 {
            return Err(Error::Config("breaker thresholds must be at least 1".to_string()));
        }
        if self.cache_ttl.is_zero() {
            return Err(Error::Config("cache ttl must be positive".to_string()));
        }
        if self.distractor_count == 0 {
            return Err(Error::Config("distractor count must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn max_attempts(&self, kind: RequestKind) -> u32 {
        match kind {
            RequestKind::Objectives => self.objectives_max_attempts,
            RequestKind::Quiz => self.quiz_max_attempts,
        }
    }
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::Config(format!("required environment variable {name} is not set")))
}

/// Set and non-blank, or `None`.
fn optional_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parsed_var<T: FromStr>(name: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    optional_var(name)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|e| Error::Config(format!("{name}={raw:?} is not valid: {e}")))
        })
        .transpose()
}
