//! API server configuration

use anyhow::{Context, Result};
use std::env;
use tempo_core::config::CoreConfig;

#[derive(Debug, Clone)]
pub struct Config {
    pub core: CoreConfig,
    pub host: String,
    pub port: u16,
    pub cors_allowed_origin: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let core = CoreConfig::from_env()?;

        Ok(Self {
            core,
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .context("PORT must be a number")?,
            cors_allowed_origin: env::var("CORS_ALLOWED_ORIGIN")
                .unwrap_or_else(|_| "*".to_string()),
        })
    }
}
