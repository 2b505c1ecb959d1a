//! Configuration management for the chat engine
//!
//! Environment-based configuration with defaults and validation.
//! Variables follow the pattern CHATTER_<SECTION>_<KEY>, e.g.
//! CHATTER_STORE_DATA_DIR=/var/lib/chatter.

use crate::core_sync::{ReconcilerConfig, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

mod error;

pub use error::ConfigError;

/// Main engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Store configuration
    pub store: StoreConfig,

    /// Send/reconciliation configuration
    pub sync: SyncConfig,

    /// Realtime channel configuration
    pub channel: ChannelConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Metrics configuration
    pub metrics: MetricsConfig,
}

/// Store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Directory holding the SQLite database
    pub data_dir: PathBuf,
}

impl StoreConfig {
    /// Full path of the database file
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("chatter.db")
    }
}

/// Send/reconciliation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Mirror upsert retry attempts per send
    pub retry_max_attempts: u32,

    /// Delay before the first retry
    #[serde(with = "humantime_serde")]
    pub retry_base_delay: Duration,

    /// Upper bound on any single retry delay
    #[serde(with = "humantime_serde")]
    pub retry_max_delay: Duration,

    /// Reconciliation round interval
    #[serde(with = "humantime_serde")]
    pub reconcile_interval: Duration,
}

impl SyncConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_max_attempts,
            base_delay: self.retry_base_delay,
            max_delay: self.retry_max_delay,
        }
    }

    pub fn reconciler_config(&self) -> ReconcilerConfig {
        ReconcilerConfig { interval: self.reconcile_interval }
    }
}

/// Realtime channel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Bounded buffer capacity per subscription; a subscriber that falls
    /// further behind is disconnected
    pub buffer_capacity: usize,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Enable JSON formatting
    pub json_format: bool,

    /// Include target module
    pub with_target: bool,
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metric descriptions registration at startup
    pub enabled: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            sync: SyncConfig::default(),
            channel: ChannelConfig::default(),
            logging: LoggingConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { data_dir: PathBuf::from("./data") }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            retry_max_attempts: 5,
            retry_base_delay: Duration::from_millis(50),
            retry_max_delay: Duration::from_secs(2),
            reconcile_interval: Duration::from_secs(30),
        }
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self { buffer_capacity: 256 }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            with_target: true,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        // Store config
        if let Ok(data_dir) = env::var("CHATTER_STORE_DATA_DIR") {
            config.store.data_dir = PathBuf::from(data_dir);
        }

        // Sync config
        if let Ok(attempts) = env::var("CHATTER_SYNC_RETRY_MAX_ATTEMPTS") {
            config.sync.retry_max_attempts = attempts
                .parse()
                .map_err(|e| ConfigError::InvalidValue(format!("Invalid retry attempts: {}", e)))?;
        }
        if let Ok(millis) = env::var("CHATTER_SYNC_RETRY_BASE_DELAY_MS") {
            let millis: u64 = millis
                .parse()
                .map_err(|e| ConfigError::InvalidValue(format!("Invalid base delay: {}", e)))?;
            config.sync.retry_base_delay = Duration::from_millis(millis);
        }
        if let Ok(secs) = env::var("CHATTER_SYNC_RECONCILE_INTERVAL_S") {
            let secs: u64 = secs
                .parse()
                .map_err(|e| ConfigError::InvalidValue(format!("Invalid reconcile interval: {}", e)))?;
            config.sync.reconcile_interval = Duration::from_secs(secs);
        }

        // Channel config
        if let Ok(capacity) = env::var("CHATTER_CHANNEL_BUFFER_CAPACITY") {
            config.channel.buffer_capacity = capacity
                .parse()
                .map_err(|e| ConfigError::InvalidValue(format!("Invalid buffer capacity: {}", e)))?;
        }

        // Logging config
        if let Ok(level) = env::var("CHATTER_LOG_LEVEL") {
            config.logging.level = level;
        }
        if let Ok(json) = env::var("CHATTER_LOG_JSON") {
            config.logging.json_format = json
                .parse()
                .map_err(|e| ConfigError::InvalidValue(format!("Invalid JSON flag: {}", e)))?;
        }

        // Metrics config
        if let Ok(enabled) = env::var("CHATTER_METRICS_ENABLED") {
            config.metrics.enabled = enabled
                .parse()
                .map_err(|e| ConfigError::InvalidValue(format!("Invalid metrics flag: {}", e)))?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sync.retry_max_attempts == 0 {
            return Err(ConfigError::ValidationFailed(
                "retry_max_attempts must be greater than 0".to_string(),
            ));
        }

        if self.sync.retry_base_delay > self.sync.retry_max_delay {
            return Err(ConfigError::ValidationFailed(
                "retry_base_delay must not exceed retry_max_delay".to_string(),
            ));
        }

        if self.sync.reconcile_interval.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "reconcile_interval must be greater than 0".to_string(),
            ));
        }

        if self.channel.buffer_capacity == 0 {
            return Err(ConfigError::ValidationFailed(
                "buffer_capacity must be greater than 0".to_string(),
            ));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::ValidationFailed(format!(
                "Invalid log level: {}",
                self.logging.level
            )));
        }

        Ok(())
    }
}
