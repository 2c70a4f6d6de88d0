//! Configuration management for Doctalk.
//!
//! Configuration is loaded in order of precedence:
//! 1. Defaults
//! 2. Config file (~/.doctalk/config.toml)
//! 3. Environment variables
//! 4. Host-application overrides (handled at the embedding layer)

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Answer service endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Base URL of the answer-generation service
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Connect timeout in seconds for opening the turn exchange.
    /// Applies to connection establishment only; an open stream is
    /// never timed out by the client.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_base_url() -> String {
    "https://api.doctalk.dev".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    10
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl ServiceConfig {
    /// Full URL of the streaming turn endpoint
    pub fn turn_url(&self) -> String {
        format!("{}/v1/chat/turns", self.base_url.trim_end_matches('/'))
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Main configuration struct
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub service: ServiceConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Returns the default Doctalk configuration directory (~/.doctalk)
    pub fn doctalk_dir() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".doctalk"))
    }

    /// Returns the default config file path
    pub fn default_config_path() -> Option<PathBuf> {
        Self::doctalk_dir().map(|d| d.join("config.toml"))
    }

    /// Load configuration from the default path with environment overrides
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = if let Some(path) = Self::default_config_path() {
            if path.exists() {
                Self::load_from_file(&path)?
            } else {
                Config::default()
            }
        } else {
            Config::default()
        };

        config.apply_env_overrides();

        Ok(config)
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: &PathBuf) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        // DOCTALK_ENDPOINT overrides the service base URL
        if let Ok(endpoint) = std::env::var("DOCTALK_ENDPOINT") {
            self.service.base_url = endpoint;
        }

        // DOCTALK_TIMEOUT_SECS overrides the connect timeout
        if let Ok(timeout) = std::env::var("DOCTALK_TIMEOUT_SECS") {
            if let Ok(timeout) = timeout.parse() {
                self.service.connect_timeout_secs = timeout;
            }
        }

        // DOCTALK_LOG_LEVEL overrides the log level
        if let Ok(level) = std::env::var("DOCTALK_LOG_LEVEL") {
            self.logging.level = level;
        }
    }

    /// Save configuration to the default path
    pub fn save(&self) -> Result<(), ConfigError> {
        if let Some(path) = Self::default_config_path() {
            self.save_to_file(&path)
        } else {
            Err(ConfigError::ValidationError(
                "Could not determine config path".to_string(),
            ))
        }
    }

    /// Save configuration to a specific file
    pub fn save_to_file(&self, path: &PathBuf) -> Result<(), ConfigError> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.service.base_url, "https://api.doctalk.dev");
        assert_eq!(config.service.connect_timeout_secs, 10);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_turn_url_strips_trailing_slash() {
        let service = ServiceConfig {
            base_url: "http://127.0.0.1:9000/".to_string(),
            ..ServiceConfig::default()
        };
        assert_eq!(service.turn_url(), "http://127.0.0.1:9000/v1/chat/turns");
    }

    #[test]
    fn test_partial_config() {
        let toml_str = r#"
[service]
base_url = "http://localhost:8787"
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        // Custom value
        assert_eq!(config.service.base_url, "http://localhost:8787");
        // Defaults still applied
        assert_eq!(config.service.connect_timeout_secs, 10);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_config_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.service.base_url = "http://localhost:4000".to_string();
        config.save_to_file(&path).unwrap();

        let loaded = Config::load_from_file(&path).unwrap();
        assert_eq!(loaded.service.base_url, "http://localhost:4000");
    }
}
