//! Application configuration.

use crate::error::{AppError, AppResult};
use sentinel_defense::DefenseConfig;
use sentinel_facade::FacadeConfig;
use sentinel_gates::GateConfig;
use sentinel_manager::{DefensiveManagerConfig, ProfitProtectionConfig, TrailingConfig, WatchdogConfig};
use sentinel_queue::QueueConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperatingMode {
    /// Exit modifications are logged, never sent to the broker.
    #[default]
    Observation,
    /// Exit modifications are sent to the broker bridge.
    Live,
}

/// Storage locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding the registry store and operation journal.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

impl StorageConfig {
    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join("trades.jsonl")
    }

    pub fn journal_path(&self) -> PathBuf {
        self.data_dir.join("operations.jsonl")
    }
}

/// Write queue settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSettings {
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_secs")]
    pub retry_base_secs: u64,
    #[serde(default = "default_wait_secs")]
    pub default_wait_secs: u64,
}

fn default_capacity() -> usize {
    1000
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_secs() -> u64 {
    1
}

fn default_wait_secs() -> u64 {
    30
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            max_retries: default_max_retries(),
            retry_base_secs: default_retry_base_secs(),
            default_wait_secs: default_wait_secs(),
        }
    }
}

impl From<&QueueSettings> for QueueConfig {
    fn from(s: &QueueSettings) -> Self {
        QueueConfig {
            capacity: s.capacity,
            max_retries: s.max_retries,
            retry_base: Duration::from_secs(s.retry_base_secs),
            default_wait: Duration::from_secs(s.default_wait_secs),
        }
    }
}

/// Broker bridge endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Base URL of the broker bridge. Empty disables broker access;
    /// managers then skip every ticket (positions cannot be confirmed).
    #[serde(default)]
    pub base_url: String,
}

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub mode: OperatingMode,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub queue: QueueSettings,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub gates: GateConfig,
    #[serde(default)]
    pub defense: DefenseConfig,
    #[serde(default)]
    pub trailing: TrailingConfig,
    #[serde(default)]
    pub profit_protection: ProfitProtectionConfig,
    #[serde(default)]
    pub defensive_manager: DefensiveManagerConfig,
    #[serde(default)]
    pub watchdog: WatchdogConfig,
    #[serde(default)]
    pub facade: FacadeConfig,
}

impl AppConfig {
    /// Load configuration: `SENTINEL_CONFIG` env var or
    /// `config/default.toml`, falling back to defaults when missing.
    pub fn load() -> AppResult<Self> {
        let config_path = std::env::var("SENTINEL_CONFIG")
            .unwrap_or_else(|_| "config/default.toml".to_string());

        if Path::new(&config_path).exists() {
            Self::from_file(&config_path)
        } else {
            tracing::warn!(path = %config_path, "Config file not found, using defaults");
            Ok(Self::default())
        }
    }

    /// Load from a specific file.
    pub fn from_file(path: &str) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Failed to read config: {e}")))?;
        toml::from_str(&content)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))
    }

    /// Whether exit modifications reach the broker.
    #[must_use]
    pub fn is_observation_mode(&self) -> bool {
        self.mode == OperatingMode::Observation
    }
}
