//! Configuration types for SLUICE

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::SluiceError;
use crate::traits::SluiceResult;

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SluiceConfig {
    /// Instance name for logging
    pub name: String,

    /// Data directory
    pub data_dir: PathBuf,

    /// Storage configuration
    pub storage: StorageConfig,

    /// Channel rules
    pub channel: ChannelConfig,

    /// Settlement configuration
    pub settlement: SettlementConfig,

    /// Logging level
    pub log_level: String,
}

impl Default for SluiceConfig {
    fn default() -> Self {
        Self {
            name: "sluice".to_string(),
            data_dir: PathBuf::from("./data"),
            storage: StorageConfig::default(),
            channel: ChannelConfig::default(),
            settlement: SettlementConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

impl SluiceConfig {
    /// Parse from JSON
    pub fn from_json(json: &str) -> SluiceResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| SluiceError::ConfigError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> SluiceResult<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            SluiceError::ConfigError(format!("{}: {}", path.as_ref().display(), e))
        })?;
        Self::from_json(&content)
    }

    /// Serialize to pretty JSON
    pub fn to_json(&self) -> SluiceResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> SluiceResult<()> {
        if self.channel.max_participants == 0 {
            return Err(SluiceError::ConfigError(
                "channel.max_participants must be at least 1".into(),
            ));
        }
        if self.settlement.max_attempts == 0 {
            return Err(SluiceError::ConfigError(
                "settlement.max_attempts must be at least 1".into(),
            ));
        }
        if self.settlement.initial_backoff_ms > self.settlement.max_backoff_ms {
            return Err(SluiceError::ConfigError(
                "settlement.initial_backoff_ms exceeds max_backoff_ms".into(),
            ));
        }
        Ok(())
    }

    /// Resolved storage path (relative paths live under `data_dir`)
    pub fn storage_path(&self) -> PathBuf {
        if self.storage.path.is_absolute() {
            self.storage.path.clone()
        } else {
            self.data_dir.join(&self.storage.path)
        }
    }
}

/// Storage backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Sled,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,

    /// Database path, relative to the data directory unless absolute
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Sled,
            path: PathBuf::from("channels.db"),
        }
    }
}

/// Channel rules
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Maximum participants per channel
    pub max_participants: usize,

    /// Maximum amount moved by a single transaction
    pub max_amount: u128,

    /// Enforce merkle proofs for op codes that declare them
    pub require_proofs: bool,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            max_participants: 8,
            // largest value the coins encoding carries (15 bytes)
            max_amount: (1u128 << 120) - 1,
            require_proofs: true,
        }
    }
}

/// Settlement configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SettlementConfig {
    /// Ledger destination for settlement messages
    pub destination: String,

    /// Submission attempts before giving up
    pub max_attempts: u32,

    /// First retry delay
    pub initial_backoff_ms: u64,

    /// Retry delay ceiling
    pub max_backoff_ms: u64,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            destination: "channel-contract".to_string(),
            max_attempts: 5,
            initial_backoff_ms: 200,
            max_backoff_ms: 10_000,
        }
    }
}
