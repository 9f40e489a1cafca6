//! Worker process configuration from the environment.

use std::time::Duration;

use thiserror::Error;

use colorforge_queue::QueueConfig;
use colorforge_storage::StorageConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

/// Everything the worker binary needs, validated fail-fast at startup.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub database_url: String,
    pub max_db_connections: u32,
    /// Optional Redis queue mirror; without it the in-memory queue plus the
    /// store sweep carry the load.
    pub redis_url: Option<String>,
    /// Administrative kill switch: when false the worker exits cleanly
    /// instead of idling.
    pub generation_enabled: bool,
    pub daily_target: usize,
    pub openai_api_key: String,
    pub openai_base_url: Option<String>,
    pub storage: StorageConfig,
    pub queue: QueueConfig,
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::Missing(name))
}

fn optional(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn parse<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match optional(name) {
        Some(value) => value
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
        None => Ok(default),
    }
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let generation_enabled =
            optional("GENERATION_ENABLED").is_none_or(|v| v != "false" && v != "0");

        let queue = QueueConfig::default()
            .with_poll_interval(Duration::from_millis(parse("POLL_INTERVAL_MS", 5000u64)?))
            .with_lock_duration(Duration::from_millis(parse("LOCK_DURATION_MS", 30_000u64)?))
            .with_max_concurrent(parse("MAX_CONCURRENT_WORKERS", 5usize)?)
            .with_max_attempts(parse("MAX_JOB_RETRIES", 3u32)?)
            .with_max_stalled_count(parse("MAX_STALLED_COUNT", 2u32)?);

        let storage = StorageConfig::new(
            required("R2_ENDPOINT")?,
            required("R2_BUCKET_NAME")?,
            required("R2_ACCESS_KEY_ID")?,
            required("R2_SECRET_ACCESS_KEY")?,
            required("R2_PUBLIC_URL")?,
        );

        Ok(Self {
            database_url: required("DATABASE_URL")?,
            max_db_connections: parse("MAX_DB_CONNECTIONS", 5u32)?,
            redis_url: optional("REDIS_URL"),
            generation_enabled,
            daily_target: parse("DAILY_TARGET", 20usize)?,
            openai_api_key: required("OPENAI_API_KEY")?,
            openai_base_url: optional("OPENAI_BASE_URL"),
            storage,
            queue,
        })
    }
}
