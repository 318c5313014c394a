//! Client configuration
//!
//! Read from `<config_dir>/studyset/config.toml`; every field has a default
//! so a missing file or a partial file is fine.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Web backend root, e.g. "https://quizlet.example.com"
    pub base_url: String,
    /// next-auth session cookie value; unset means signed out
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,
    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    /// Upper bound on waiting for outstanding saves before completing
    pub save_settle_timeout_ms: u64,
    /// Match clock publish interval
    pub match_tick_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            session_token: None,
            request_timeout_secs: 30,
            connect_timeout_secs: 10,
            save_settle_timeout_ms: 10_000,
            match_tick_ms: 100,
        }
    }
}

impl ClientConfig {
    /// Default config file location
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("studyset").join("config.toml"))
    }

    /// Load configuration from file, falling back to defaults when absent
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            log::debug!("config: {} not found, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: ClientConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(ConfigError::InvalidUrl(self.base_url.clone()));
        }
        Ok(())
    }

    pub fn save_settle_timeout(&self) -> Duration {
        Duration::from_millis(self.save_settle_timeout_ms)
    }

    pub fn match_tick(&self) -> Duration {
        Duration::from_millis(self.match_tick_ms.max(1))
    }
}
