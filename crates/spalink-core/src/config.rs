/*!
 * Configuration management for spalink.
 *
 * This module provides functionality to load, validate, and access
 * configuration settings for the spalink client.
 */
use std::path::Path;
use std::sync::Arc;

use config::{Config as ConfigLib, Environment, File};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Core configuration for spalink
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// General configuration
    #[serde(default)]
    pub general: GeneralConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Protocol timing configuration
    #[serde(default)]
    pub protocol: ProtocolConfig,
}

/// General configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Application name
    #[serde(default = "default_app_name")]
    pub app_name: String,

    /// Application version
    #[serde(default = "default_app_version")]
    pub app_version: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to log to stdout
    #[serde(default = "default_log_stdout")]
    pub stdout: bool,
}

/// Protocol timing configuration
///
/// These are the tunable constants of the in.touch2 exchange protocol:
/// how often the device is pinged, when it is declared unresponsive, how
/// long a connection attempt may take, and the retry budget for a single
/// request/response exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolConfig {
    /// Interval between keepalive pings, in seconds
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,

    /// Gap since the last ping response after which the device is
    /// reported as not responding, in seconds
    #[serde(default = "default_not_responding_secs")]
    pub not_responding_secs: u64,

    /// Maximum time a connection handshake may take, in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Number of send attempts for a retry-governed request
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// Delay between send attempts, in milliseconds
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            logging: LoggingConfig::default(),
            protocol: ProtocolConfig::default(),
        }
    }
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            app_name: default_app_name(),
            app_version: default_app_version(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            stdout: default_log_stdout(),
        }
    }
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            ping_interval_secs: default_ping_interval_secs(),
            not_responding_secs: default_not_responding_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            retry_attempts: default_retry_attempts(),
            retry_interval_ms: default_retry_interval_ms(),
        }
    }
}

fn default_app_name() -> String {
    "spalink".to_string()
}

fn default_app_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_stdout() -> bool {
    true
}

fn default_ping_interval_secs() -> u64 {
    2
}

fn default_not_responding_secs() -> u64 {
    10
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_retry_attempts() -> u32 {
    5
}

fn default_retry_interval_ms() -> u64 {
    1000
}

/// A builder for creating a configuration
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config_file: Option<String>,
    environment_prefix: Option<String>,
}

impl ConfigBuilder {
    /// Create a new ConfigBuilder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the config file path
    pub fn with_config_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_file = Some(path.as_ref().to_string_lossy().to_string());
        self
    }

    /// Set the environment variable prefix for configuration
    pub fn with_environment_prefix<S: AsRef<str>>(mut self, prefix: S) -> Self {
        self.environment_prefix = Some(prefix.as_ref().to_string());
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<Config> {
        let mut config_builder = ConfigLib::builder();

        // Start with default values
        let default_config = Config::default();
        config_builder = config_builder.add_source(
            config::Config::try_from(&default_config)
                .map_err(|e| Error::config(format!("Failed to create default config: {}", e)))?,
        );

        // Add configuration from file if specified
        if let Some(config_file) = self.config_file {
            let path = Path::new(&config_file);
            if path.exists() {
                debug!("Loading configuration from {}", config_file);
                config_builder = config_builder.add_source(File::with_name(&config_file));
            } else {
                debug!(
                    "Configuration file {} does not exist, using defaults",
                    config_file
                );
            }
        }

        // Add configuration from environment variables if prefix is specified
        if let Some(prefix) = self.environment_prefix {
            debug!(
                "Loading configuration from environment variables with prefix {}",
                prefix
            );
            config_builder = config_builder.add_source(
                Environment::with_prefix(&prefix)
                    .separator("__")
                    .try_parsing(true),
            );
        }

        // Build the config
        let config_lib = config_builder
            .build()
            .map_err(|e| Error::config(format!("Failed to build configuration: {}", e)))?;

        // Convert to our config type
        let config: Config = config_lib
            .try_deserialize()
            .map_err(|e| Error::config(format!("Failed to deserialize configuration: {}", e)))?;

        info!("Configuration loaded successfully");
        Ok(config)
    }
}

/// A thread-safe reference to a configuration
#[derive(Debug, Clone)]
pub struct SharedConfig(Arc<Config>);

impl SharedConfig {
    /// Create a new SharedConfig
    pub fn new(config: Config) -> Self {
        Self(Arc::new(config))
    }

    /// Get a reference to the config
    pub fn get(&self) -> &Config {
        &self.0
    }
}

impl From<Config> for SharedConfig {
    fn from(config: Config) -> Self {
        Self::new(config)
    }
}

impl AsRef<Config> for SharedConfig {
    fn as_ref(&self) -> &Config {
        self.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.general.app_name, "spalink");
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.protocol.ping_interval_secs, 2);
        assert_eq!(config.protocol.retry_attempts, 5);
    }

    #[test]
    fn test_config_builder_defaults() {
        let config = ConfigBuilder::new().build().unwrap();
        assert_eq!(config.general.app_name, "spalink");
        assert_eq!(config.protocol.connect_timeout_secs, 30);
    }

    #[test]
    fn test_config_builder_with_env() -> Result<()> {
        env::set_var("SPALINK__PROTOCOL__RETRY_ATTEMPTS", "9");
        env::set_var("SPALINK__LOGGING__LEVEL", "trace");

        let config = ConfigBuilder::new()
            .with_environment_prefix("spalink")
            .build()?;

        assert_eq!(config.protocol.retry_attempts, 9);
        assert_eq!(config.logging.level, "trace");

        // Clean up
        env::remove_var("SPALINK__PROTOCOL__RETRY_ATTEMPTS");
        env::remove_var("SPALINK__LOGGING__LEVEL");

        Ok(())
    }

    #[test]
    fn test_shared_config() {
        let shared = SharedConfig::new(Config::default());
        assert_eq!(shared.get().general.app_name, "spalink");

        let shared2 = shared.clone();
        assert_eq!(shared2.get().protocol.not_responding_secs, 10);
    }
}
