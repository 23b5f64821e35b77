//! Configuration management for the Atrium world server.
//!
//! This module handles loading, validation, and merging of server configuration
//! from TOML files and command-line arguments.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::info;
use world_server::{ServerConfig, WorldsConfig};

/// Application configuration loaded from TOML file.
///
/// This is the main configuration structure. It wraps the runtime settings
/// handed to the world manager, the worlds to ensure at startup and the
/// logging setup.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// World runtime settings
    #[serde(default)]
    pub runtime: ServerConfig,
    /// Worlds to ensure at startup, keyed by world name
    #[serde(default)]
    pub worlds: WorldsConfig,
    /// Logging configuration settings
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Logging system configuration.
///
/// Controls log output format and level.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Whether to output logs in JSON format
    #[serde(default)]
    pub json_format: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_format: false,
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file.
    ///
    /// When the file does not exist yet, a default configuration is written
    /// to the given path and returned, so a first run leaves a file the
    /// operator can edit.
    pub async fn load_from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path).await?;
            let config: AppConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            // Create default config file
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content).await?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// Validates the merged configuration, returning a description of the
    /// first problem found.
    pub fn validate(&self) -> Result<(), String> {
        self.runtime.validate()?;

        // Validate log level
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {valid_levels:?}",
                &self.logging.level
            ));
        }

        Ok(())
    }
}
