//! Engine configuration
//!
//! All knobs for the upstream client, the rate limiter, and the store live
//! here. A `Config` is built once at process start and handed to
//! [`crate::state::AppState::new`]; nothing reads configuration globally.

use crate::error::{AppError, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Engine configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Upstream API key, sent as a query parameter on every request
    pub api_key: String,

    /// Upstream API base URL
    pub base_url: String,

    /// SQLite database file
    pub database_path: PathBuf,

    /// Directory for flat-file outputs (bulk feature tables)
    pub data_dir: PathBuf,

    /// Maximum requests allowed within the trailing window
    pub max_requests_per_window: usize,

    /// Length of the trailing rate-limit window
    pub window_ms: u64,

    /// How long to stall before re-checking a saturated window
    pub stall_interval_ms: u64,

    /// Total request attempts before giving up (first try included)
    pub max_attempts: u32,

    /// Flat delay between retry attempts
    pub retry_delay_ms: u64,

    /// Per-request HTTP timeout
    pub request_timeout_secs: u64,

    /// Page size for tick endpoints (server-capped at 50,000)
    pub page_size: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.polygon.io".to_string(),
            database_path: PathBuf::from("tickstore.db"),
            data_dir: PathBuf::from("data"),
            max_requests_per_window: 200,
            window_ms: 60_000,
            stall_interval_ms: 3_000,
            max_attempts: 5,
            retry_delay_ms: 5_000,
            request_timeout_secs: 30,
            page_size: 50_000,
        }
    }
}

impl Config {
    /// Build a configuration from environment variables.
    ///
    /// `TICKSTORE_API_KEY` is required; `TICKSTORE_DB` and `TICKSTORE_DATA_DIR`
    /// override the storage locations.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("TICKSTORE_API_KEY")
            .map_err(|_| AppError::Config("TICKSTORE_API_KEY is not set".to_string()))?;

        let mut config = Self {
            api_key,
            ..Self::default()
        };
        if let Ok(path) = std::env::var("TICKSTORE_DB") {
            config.database_path = PathBuf::from(path);
        }
        if let Ok(dir) = std::env::var("TICKSTORE_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }

        Ok(config)
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    pub fn stall_interval(&self) -> Duration {
        Duration::from_millis(self.stall_interval_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
