//! Application configuration.
//!
//! Settings come from the first readable `datacollector.conf` (YAML) found
//! in the current directory, the home directory, or the user config
//! directory. A missing file is not an error; every field has a default so
//! the collector runs unconfigured.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::lock::DEFAULT_LOCK_TIMEOUT;

/// Configuration file name searched in every location.
pub const CONFIG_FILE_NAME: &str = "datacollector.conf";

/// Default MQTT broker port.
pub const DEFAULT_MQTT_PORT: u16 = 1883;

/// Default Zabbix trapper port.
pub const DEFAULT_ZABBIX_PORT: u16 = 10051;

fn default_localhost() -> String {
    "localhost".to_string()
}

fn default_lock_timeout() -> Duration {
    DEFAULT_LOCK_TIMEOUT
}

/// The machine's hostname, used as the default client id and host label.
fn local_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(default_localhost)
}

/// Configuration error types.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read a configuration file that exists.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse YAML configuration.
    #[error("failed to parse YAML config: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// Configuration validation failed.
    #[error("config validation error: {0}")]
    Validation(String),
}

/// MQTT broker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    /// Broker host (default: "localhost").
    pub broker: String,

    /// Broker port (default: 1883).
    pub port: u16,

    /// Client identifier and topic prefix (default: local hostname).
    pub client_id: String,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker: default_localhost(),
            port: DEFAULT_MQTT_PORT,
            client_id: local_hostname(),
        }
    }
}

/// Zabbix server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ZabbixConfig {
    /// Trapper host (default: "localhost").
    pub server: String,

    /// Trapper port (default: 10051).
    pub port: u16,

    /// Host label metrics are tagged with (default: local hostname).
    pub host: String,
}

impl Default for ZabbixConfig {
    fn default() -> Self {
        Self {
            server: default_localhost(),
            port: DEFAULT_ZABBIX_PORT,
            host: local_hostname(),
        }
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// MQTT broker settings.
    #[serde(default)]
    pub mqtt: MqttConfig,

    /// Zabbix server settings.
    #[serde(default)]
    pub zabbix: ZabbixConfig,

    /// Per-sensor polling interval overrides, sensor name -> seconds.
    #[serde(default)]
    pub cycles: HashMap<String, u64>,

    /// Bounded wait for lock acquisition (default: 10s).
    #[serde(default = "default_lock_timeout", with = "humantime_serde")]
    pub lock_timeout: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            mqtt: MqttConfig::default(),
            zabbix: ZabbixConfig::default(),
            cycles: HashMap::new(),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }
}

impl AppConfig {
    /// Load configuration from a YAML file.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read, parsed, or
    /// validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from the first readable search location, or
    /// defaults if none exists.
    ///
    /// # Errors
    /// A missing file is never an error; a file that exists but fails to
    /// parse or validate is.
    pub fn discover() -> Result<Self, ConfigError> {
        for dir in Self::search_dirs() {
            let candidate = dir.join(CONFIG_FILE_NAME);
            if candidate.is_file() {
                tracing::debug!(path = %candidate.display(), "Loading configuration");
                return Self::load(candidate);
            }
        }
        tracing::debug!("No configuration file found. Using defaults.");
        Ok(Self::default())
    }

    fn search_dirs() -> Vec<PathBuf> {
        let mut dirs = vec![PathBuf::from(".")];
        if let Some(home) = dirs::home_dir() {
            dirs.push(home);
        }
        if let Some(config) = dirs::config_dir() {
            dirs.push(config.join("datacollector"));
        }
        dirs
    }

    /// Validate configuration values.
    ///
    /// # Errors
    /// Returns `ConfigError::Validation` if any field is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mqtt.broker.is_empty() {
            return Err(ConfigError::Validation(
                "mqtt broker must not be empty".to_string(),
            ));
        }
        if self.mqtt.client_id.is_empty() {
            return Err(ConfigError::Validation(
                "mqtt client_id must not be empty".to_string(),
            ));
        }
        if self.zabbix.server.is_empty() {
            return Err(ConfigError::Validation(
                "zabbix server must not be empty".to_string(),
            ));
        }
        if self.zabbix.host.is_empty() {
            return Err(ConfigError::Validation(
                "zabbix host must not be empty".to_string(),
            ));
        }
        for (sensor, secs) in &self.cycles {
            if *secs == 0 {
                return Err(ConfigError::Validation(format!(
                    "cycle interval for sensor '{}' must be greater than zero",
                    sensor
                )));
            }
        }
        if self.lock_timeout.is_zero() {
            return Err(ConfigError::Validation(
                "lock_timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
