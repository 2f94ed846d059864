use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Tunables for the points economy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PointsConfig {
    /// Seconds between accrual buffer flushes.
    pub flush_interval_secs: u64,
    /// Inclusive bounds of the reward granted per activity event.
    pub accrual_min: u64,
    pub accrual_max: u64,
    /// Seconds after creation before an unlocked market locks itself.
    pub lock_timeout_secs: u64,
    /// RGB colour of prediction embeds.
    pub embed_colour: [u8; 3],
}

impl Default for PointsConfig {
    fn default() -> Self {
        Self {
            flush_interval_secs: 60,
            accrual_min: 7,
            accrual_max: 25,
            lock_timeout_secs: 1200,
            embed_colour: [78, 42, 132],
        }
    }
}

impl PointsConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: PointsConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.accrual_min > self.accrual_max {
            return Err(ConfigError::Invalid(format!(
                "accrual_min ({}) exceeds accrual_max ({})",
                self.accrual_min, self.accrual_max
            )));
        }
        if self.flush_interval_secs == 0 {
            return Err(ConfigError::Invalid("flush_interval_secs must be positive".into()));
        }
        if self.lock_timeout_secs == 0 {
            return Err(ConfigError::Invalid("lock_timeout_secs must be positive".into()));
        }
        Ok(())
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }
}
