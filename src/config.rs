//! Configuration for territory-engine

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::TerritoryError;

/// Default storage directory
pub fn default_storage_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("territory-engine")
}

/// Configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding the SQLite database
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    /// How long a writer waits on SQLite's write lock before giving up
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    #[serde(default)]
    pub eviction: EvictionConfig,

    #[serde(default)]
    pub registration: RegistrationConfig,
}

/// Inactivity eviction settings
///
/// `threshold_days` drives both the sweep and the warning window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvictionConfig {
    /// Days without liveness before an agent is voided
    #[serde(default = "default_threshold_days")]
    pub threshold_days: u32,

    /// Days before the threshold at which agents are warned
    #[serde(default = "default_warning_days")]
    pub warning_days: u32,

    /// Seconds between periodic sweeps
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Run a sweep immediately when the daemon starts
    #[serde(default = "default_true")]
    pub sweep_on_start: bool,
}

/// Bounds for the registration claim-retry loop
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationConfig {
    #[serde(default = "default_max_claim_attempts")]
    pub max_claim_attempts: u32,

    #[serde(default = "default_max_claim_elapsed_ms")]
    pub max_claim_elapsed_ms: u64,
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

fn default_threshold_days() -> u32 {
    7
}

fn default_warning_days() -> u32 {
    2
}

fn default_sweep_interval() -> u64 {
    86_400
}

fn default_true() -> bool {
    true
}

fn default_max_claim_attempts() -> u32 {
    5
}

fn default_max_claim_elapsed_ms() -> u64 {
    2000
}

impl Default for EvictionConfig {
    fn default() -> Self {
        Self {
            threshold_days: default_threshold_days(),
            warning_days: default_warning_days(),
            sweep_interval_secs: default_sweep_interval(),
            sweep_on_start: true,
        }
    }
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            max_claim_attempts: default_max_claim_attempts(),
            max_claim_elapsed_ms: default_max_claim_elapsed_ms(),
        }
    }
}

impl EvictionConfig {
    /// Threshold for a one-off sweep. An override must still leave room for
    /// the warning window, or agents could be voided without being warned.
    pub fn sweep_threshold(&self, override_days: Option<u32>) -> Result<u32, TerritoryError> {
        match override_days {
            None => Ok(self.threshold_days),
            Some(days) if days > self.warning_days => Ok(days),
            Some(days) => Err(TerritoryError::InvalidInput(format!(
                "threshold_days ({}) must be above warning_days ({})",
                days, self.warning_days
            ))),
        }
    }
}

impl RegistrationConfig {
    pub fn max_claim_elapsed(&self) -> Duration {
        Duration::from_millis(self.max_claim_elapsed_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_dir: default_storage_dir(),
            busy_timeout_ms: default_busy_timeout_ms(),
            eviction: EvictionConfig::default(),
            registration: RegistrationConfig::default(),
        }
    }
}

impl Config {
    /// Load config from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, TerritoryError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| TerritoryError::Config(format!("Invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), TerritoryError> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| TerritoryError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject settings the engine cannot honour
    pub fn validate(&self) -> Result<(), TerritoryError> {
        if self.eviction.threshold_days == 0 {
            return Err(TerritoryError::Config("eviction.threshold_days must be at least 1".into()));
        }
        if self.eviction.warning_days >= self.eviction.threshold_days {
            return Err(TerritoryError::Config(format!(
                "eviction.warning_days ({}) must be below threshold_days ({})",
                self.eviction.warning_days, self.eviction.threshold_days
            )));
        }
        if self.eviction.sweep_interval_secs == 0 {
            return Err(TerritoryError::Config("eviction.sweep_interval_secs must be positive".into()));
        }
        if self.registration.max_claim_attempts == 0 {
            return Err(TerritoryError::Config("registration.max_claim_attempts must be at least 1".into()));
        }
        Ok(())
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    /// Get config file path
    pub fn config_path(&self) -> PathBuf {
        self.storage_dir.join("config.toml")
    }
}
