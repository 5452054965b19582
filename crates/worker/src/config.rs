//! Worker configuration

use anyhow::{Context, Result};
use std::env;
use tempo_core::config::CoreConfig;

#[derive(Debug, Clone)]
pub struct Config {
    pub core: CoreConfig,

    /// Feed refresh scheduler poll interval
    pub poll_interval_secs: u64,

    /// Mirror delivery attempts before a batch is dropped
    pub max_retry_count: u32,

    /// Mirror intents drained per delivery batch
    pub batch_size: usize,

    /// Concurrent feed refreshes
    pub refresh_concurrency: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let core = CoreConfig::from_env()?;

        Ok(Self {
            core,
            poll_interval_secs: env_parse("WORKER_POLL_INTERVAL_SECS", 60)?,
            max_retry_count: env_parse("WORKER_MAX_RETRY_COUNT", 5)?,
            batch_size: env_parse("WORKER_BATCH_SIZE", 32)?,
            refresh_concurrency: env_parse("WORKER_REFRESH_CONCURRENCY", 4)?,
        })
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value.parse().with_context(|| format!("{name} must be a number")),
        Err(_) => Ok(default),
    }
}
