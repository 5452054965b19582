//! Unified server configuration

use anyhow::Result;

#[derive(Debug, Clone)]
pub struct UnifiedConfig {
    pub api: tempo_api::config::Config,
    pub worker: tempo_worker::Config,
}

impl UnifiedConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            api: tempo_api::config::Config::from_env()?,
            worker: tempo_worker::Config::from_env()?,
        })
    }
}
