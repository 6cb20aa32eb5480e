//! Configuration data model.

use crate::config::validation::{ValidationError, validate_config};
use docbridge_types::MonitoringConfig;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Address the companion service listens on by default.
pub const DEFAULT_COMPANION_URL: &str = "http://127.0.0.1:17654";

/// Address of the application server hosting the sync API by default.
pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:3000";

const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;

static DEFAULT_COMPANION: Lazy<Url> =
    Lazy::new(|| Url::parse(DEFAULT_COMPANION_URL).expect("default companion URL should parse"));
static DEFAULT_SERVER: Lazy<Url> = Lazy::new(|| Url::parse(DEFAULT_SERVER_URL).expect("default server URL should parse"));

/// Root of `companion.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompanionConfig {
    /// Base URL of the local companion service.
    pub companion_url: Url,

    /// Base URL of the server exposing `/api/sync`.
    pub server_url: Url,

    /// Timeout for open requests, in milliseconds.
    pub request_timeout_ms: u64,

    /// Health monitor settings.
    pub monitoring: MonitoringConfig,
}

impl Default for CompanionConfig {
    fn default() -> Self {
        Self {
            companion_url: DEFAULT_COMPANION.clone(),
            server_url: DEFAULT_SERVER.clone(),
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            monitoring: MonitoringConfig::default(),
        }
    }
}

impl CompanionConfig {
    /// Parse and validate a configuration document.
    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let config: CompanionConfig = serde_json::from_str(content)?;
        validate_config(&config)?;
        Ok(config)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}
