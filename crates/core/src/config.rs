//! Shared configuration logic
//!
//! Handles loading of common environment variables.

use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;

/// Common configuration used across services
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Root directory holding per-user partitions and the proof blob store
    pub data_dir: PathBuf,

    /// Secret used to verify bearer tokens
    pub auth_secret: String,
}

impl CoreConfig {
    /// Load common configuration from environment variables
    ///
    /// This will also initialize dotenv if it hasn't been done yet.
    pub fn from_env() -> Result<Self> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        Ok(Self {
            data_dir: env::var("TEMPO_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("data")),
            auth_secret: env::var("TEMPO_AUTH_SECRET")
                .context("TEMPO_AUTH_SECRET must be set")?,
        })
    }
}
