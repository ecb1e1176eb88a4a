//! # Broker Configuration
//!
//! Defaults for everything, overridden from the environment.
//!
//! | Variable | Field |
//! |----------|-------|
//! | `MQ_DATA_DIR` | `data_dir` |
//! | `MQ_GLOBAL_MAX_SIZE` | `paging.global_max_size_bytes` |
//! | `MQ_RECLAIM_INTERVAL_MS` | `paging.reclaim_interval` |
//! | `MQ_STOP_GRACE_MS` | `paging.stop_grace` |
//! | `MQ_MIN_LARGE_MESSAGE_SIZE` | `large_messages.min_large_message_size` |
//! | `MQ_CONFIRMATION_WINDOW` | `large_messages.confirmation_window_size` |
//! | `MQ_ADDRESS_SETTINGS` | `address_settings` (path to a JSON file) |

use mq_01_paging::{AddressSettingsRepository, PagingConfig, PagingError};
use mq_02_large_message::{LargeMessageConfig, LargeMessageError};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Complete broker configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    /// Root of the paging directory.
    pub data_dir: PathBuf,
    pub paging: PagingConfig,
    pub large_messages: LargeMessageConfig,
    /// Address settings file; built-in defaults when absent.
    pub address_settings: Option<PathBuf>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/paging"),
            paging: PagingConfig::default(),
            large_messages: LargeMessageConfig::default(),
            address_settings: None,
        }
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{variable}={value} is not a valid {expected}")]
    InvalidValue {
        variable: &'static str,
        value: String,
        expected: &'static str,
    },

    #[error("Cannot read address settings {path}: {source}")]
    SettingsFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Paging(#[from] PagingError),

    #[error(transparent)]
    LargeMessage(#[from] LargeMessageError),
}

impl BrokerConfig {
    /// Apply overrides found through `lookup`, then validate.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(dir) = lookup("MQ_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(max) = parse::<i64, _>(&lookup, "MQ_GLOBAL_MAX_SIZE", "byte count")? {
            config.paging.global_max_size_bytes = max;
        }
        if let Some(ms) = parse::<u64, _>(&lookup, "MQ_RECLAIM_INTERVAL_MS", "millisecond count")? {
            config.paging.reclaim_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = parse::<u64, _>(&lookup, "MQ_STOP_GRACE_MS", "millisecond count")? {
            config.paging.stop_grace = Duration::from_millis(ms);
        }
        if let Some(bytes) = parse::<usize, _>(&lookup, "MQ_MIN_LARGE_MESSAGE_SIZE", "byte count")? {
            config.large_messages.min_large_message_size = bytes;
            config.large_messages.chunk_size = bytes;
        }
        if let Some(bytes) = parse::<usize, _>(&lookup, "MQ_CONFIRMATION_WINDOW", "byte count")? {
            config.large_messages.confirmation_window_size = bytes;
        }
        if let Some(path) = lookup("MQ_ADDRESS_SETTINGS") {
            config.address_settings = Some(PathBuf::from(path));
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.paging.validate()?;
        self.large_messages.validate()?;
        Ok(())
    }

    /// Address settings from the configured file, or the defaults.
    pub fn load_address_settings(&self) -> Result<AddressSettingsRepository, ConfigError> {
        let Some(path) = &self.address_settings else {
            return Ok(AddressSettingsRepository::default());
        };
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::SettingsFile {
            path: path.clone(),
            source,
        })?;
        Ok(AddressSettingsRepository::from_json(&json)?)
    }
}

fn parse<T: FromStr, F: Fn(&str) -> Option<String>>(
    lookup: &F,
    variable: &'static str,
    expected: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(variable) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                variable,
                value,
                expected,
            }),
    }
}

/// Load configuration from the process environment.
pub fn load_config() -> Result<BrokerConfig, ConfigError> {
    BrokerConfig::from_lookup(|key| std::env::var(key).ok())
}
