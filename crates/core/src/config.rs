//! Configuration management for the cold-chain agent.

use crate::error::{CoreError, Result};
use crate::merkle::HashAlgorithm;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub device: DeviceConfig,
    pub batching: BatchingConfig,
    pub storage: StorageConfig,
    pub proof: ProofConfig,
    pub sync: SyncConfig,
    pub logging: LoggingConfig,
}

/// Identifies the telemetry source the session connects to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Advertised name of the sensor to connect to
    pub target_name: String,
    pub service_uuid: String,
    pub characteristic_uuid: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            target_name: "LogisticsSim".to_string(),
            service_uuid: "A07498CA-AD5B-474E-940D-16F1FBE7E8CD".to_string(),
            characteristic_uuid: "51FF12BB-3ED8-46E5-B4F9-D64E2FEC021B".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchingConfig {
    /// Number of buffered readings that triggers a flush
    pub threshold: usize,
    /// Persist a short final batch when a trip stops with readings buffered
    pub flush_partial_on_stop: bool,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            threshold: 10,
            flush_partial_on_stop: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("coldchain.db"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProofConfig {
    pub hash: HashAlgorithm,
    /// Also report min/max/mean humidity over the trip's batches
    pub include_humidity_stats: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Connectivity assumed before the first platform report arrives
    pub assume_online: bool,
    /// Round-trip delay of the simulated remote authority
    pub simulated_latency_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            assume_online: true,
            simulated_latency_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub filter: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            json: false,
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engines cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.batching.threshold == 0 {
            return Err(CoreError::Config(
                "batching.threshold must be at least 1".to_string(),
            ));
        }
        if self.device.target_name.trim().is_empty() {
            return Err(CoreError::Config(
                "device.target_name cannot be empty".to_string(),
            ));
        }
        if self.device.service_uuid.trim().is_empty()
            || self.device.characteristic_uuid.trim().is_empty()
        {
            return Err(CoreError::Config(
                "device service and characteristic identifiers are required".to_string(),
            ));
        }
        Ok(())
    }
}
