//! Configuration for quota-ledger

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::FixedOffset;
use serde::{Deserialize, Serialize};

use crate::error::QuotaError;

fn default_db_path() -> PathBuf {
    PathBuf::from("quota-ledger.db")
}

fn default_sweep_interval_secs() -> u64 {
    300
}

fn default_log_cooldown_secs() -> u64 {
    600
}

fn default_reference_offset() -> String {
    "+09:00".to_string()
}

/// Configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path to the SQLite ledger database
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Refresh sweeper tick interval in seconds
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Cooldown between repeated sweeper error logs of the same kind, in seconds
    #[serde(default = "default_log_cooldown_secs")]
    pub log_cooldown_secs: u64,

    /// Reference timezone for all civil-calendar refresh math,
    /// as a UTC offset like "+09:00" or "-05:30"
    #[serde(default = "default_reference_offset")]
    pub reference_offset: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            sweep_interval_secs: default_sweep_interval_secs(),
            log_cooldown_secs: default_log_cooldown_secs(),
            reference_offset: default_reference_offset(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self, QuotaError> {
        let raw = std::fs::read_to_string(path)?;
        toml::from_str(&raw).map_err(|e| QuotaError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn log_cooldown(&self) -> Duration {
        Duration::from_secs(self.log_cooldown_secs)
    }

    /// Parse the configured reference offset ("+09:00", "-05:30") into a
    /// `FixedOffset`
    pub fn reference_offset(&self) -> Result<FixedOffset, QuotaError> {
        self.reference_offset
            .parse()
            .map_err(|e| QuotaError::Config(format!("bad reference_offset {:?}: {}", self.reference_offset, e)))
    }
}
