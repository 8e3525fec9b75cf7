//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files, with a small
//! set of environment overrides applied on top.

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::{IngestError, Result};

/// Environment variable overriding `serial.port`
pub const ENV_SERIAL_PORT: &str = "SERIAL_PORT";

/// Environment variable overriding `serial.baud_rate`
pub const ENV_BAUD_RATE: &str = "BAUD_RATE";

/// Environment variable overriding `storage.database_url`
pub const ENV_DATABASE_URL: &str = "DATABASE_URL";

/// Environment variable overriding `api.bind_addr`
pub const ENV_BIND_ADDR: &str = "BIND_ADDR";

/// Standard baud rates accepted for the serial receiver
const VALID_BAUD_RATES: &[u32] = &[1200, 2400, 4800, 9600, 19200, 38400, 57600, 115200, 230400, 460800, 921600];

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub serial: SerialConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Serial port configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SerialConfig {
    /// Device address; `None` or empty disables ingestion
    #[serde(default)]
    pub port: Option<String>,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_max_frame_len")]
    pub max_frame_len: usize,
}

/// Record store configuration
#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_database_url")]
    pub database_url: String,
}

/// Query API configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    #[serde(default = "default_limit")]
    pub default_limit: u32,

    #[serde(default = "default_max_limit")]
    pub max_limit: u32,
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for daily rolling log files; empty logs to stdout only
    #[serde(default)]
    pub log_dir: String,
}

// Default value functions
fn default_baud_rate() -> u32 { 9600 }
fn default_timeout_ms() -> u64 { 1000 }
fn default_reconnect_interval_ms() -> u64 { 5000 }
fn default_poll_interval_ms() -> u64 { 50 }
fn default_max_frame_len() -> usize { 4096 }

fn default_database_url() -> String { "sqlite:///./lora_data.db".to_string() }

fn default_bind_addr() -> String { "0.0.0.0:8000".to_string() }
fn default_limit() -> u32 { 100 }
fn default_max_limit() -> u32 { 1000 }

fn default_log_level() -> String { "info".to_string() }

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: default_baud_rate(),
            timeout_ms: default_timeout_ms(),
            reconnect_interval_ms: default_reconnect_interval_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            max_frame_len: default_max_frame_len(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { database_url: default_database_url() }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            default_limit: default_limit(),
            max_limit: default_max_limit(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            log_dir: String::new(),
        }
    }
}

impl SerialConfig {
    /// Configured device address, if ingestion is enabled
    pub fn device_address(&self) -> Option<&str> {
        self.port.as_deref().map(str::trim).filter(|p| !p.is_empty())
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use aqua_ingest::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Self::parse_file(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` if it exists, otherwise start from defaults, then
    /// apply environment overrides and validate the result
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::load_with_overrides(path, |key| std::env::var(key).ok())
    }

    /// Like [`Config::load_or_default`] with an explicit override lookup.
    /// Validation runs once, after overrides.
    pub fn load_with_overrides<P, F>(path: P, lookup: F) -> Result<Self>
    where
        P: AsRef<Path>,
        F: Fn(&str) -> Option<String>,
    {
        let mut config = if path.as_ref().exists() {
            Self::parse_file(path)?
        } else {
            Self::default()
        };
        config.apply_overrides(lookup)?;
        config.validate()?;
        Ok(config)
    }

    fn parse_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Apply overrides from a key lookup (the process environment in production)
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup(ENV_SERIAL_PORT) {
            self.serial.port = Some(port);
        }

        if let Some(baud) = lookup(ENV_BAUD_RATE) {
            self.serial.baud_rate = baud.trim().parse().map_err(|_| {
                IngestError::Config(toml::de::Error::custom(format!(
                    "{} must be an integer, got '{}'",
                    ENV_BAUD_RATE, baud
                )))
            })?;
        }

        if let Some(url) = lookup(ENV_DATABASE_URL) {
            self.storage.database_url = url;
        }

        if let Some(addr) = lookup(ENV_BIND_ADDR) {
            self.api.bind_addr = addr;
        }

        Ok(())
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    pub fn validate(&self) -> Result<()> {
        // An absent port is fine (ingestion disabled); validate the rest regardless
        if !VALID_BAUD_RATES.contains(&self.serial.baud_rate) {
            return Err(IngestError::Config(toml::de::Error::custom(format!(
                "baud_rate must be one of: {:?}",
                VALID_BAUD_RATES
            ))));
        }

        if self.serial.timeout_ms == 0 || self.serial.timeout_ms > 10000 {
            return Err(IngestError::Config(
                toml::de::Error::custom("timeout_ms must be between 1 and 10000")
            ));
        }

        if self.serial.reconnect_interval_ms == 0 || self.serial.reconnect_interval_ms > 60000 {
            return Err(IngestError::Config(
                toml::de::Error::custom("reconnect_interval_ms must be between 1 and 60000")
            ));
        }

        if self.serial.poll_interval_ms == 0 || self.serial.poll_interval_ms > 1000 {
            return Err(IngestError::Config(
                toml::de::Error::custom("poll_interval_ms must be between 1 and 1000")
            ));
        }

        if self.serial.max_frame_len < 16 || self.serial.max_frame_len > 1_048_576 {
            return Err(IngestError::Config(
                toml::de::Error::custom("max_frame_len must be between 16 and 1048576")
            ));
        }

        if self.storage.database_url.trim().is_empty() {
            return Err(IngestError::Config(
                toml::de::Error::custom("database_url cannot be empty")
            ));
        }

        if self.api.bind_addr.parse::<std::net::SocketAddr>().is_err() {
            return Err(IngestError::Config(toml::de::Error::custom(format!(
                "bind_addr '{}' is not a valid socket address",
                self.api.bind_addr
            ))));
        }

        if self.api.max_limit == 0 {
            return Err(IngestError::Config(
                toml::de::Error::custom("max_limit must be greater than 0")
            ));
        }

        if self.api.default_limit == 0 || self.api.default_limit > self.api.max_limit {
            return Err(IngestError::Config(
                toml::de::Error::custom("default_limit must be between 1 and max_limit")
            ));
        }

        if tracing_subscriber::EnvFilter::try_new(&self.logging.level).is_err() {
            return Err(IngestError::Config(toml::de::Error::custom(format!(
                "invalid log level '{}'",
                self.logging.level
            ))));
        }

        Ok(())
    }
}
