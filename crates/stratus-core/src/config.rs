//! Orchestrator configuration
//!
//! One configuration surface for every wait the engine performs. Values come
//! from defaults, optionally overridden by `STRATUS_*` environment variables.

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use tracing::warn;

use crate::error::CoreError;

/// Orchestrator configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Bound on every forward-and-wait exchange, in seconds
    #[serde(default = "default_operate_timeout_secs")]
    pub operate_timeout_secs: u64,

    /// Batch aggregation gives up after this long without any reply, in seconds
    #[serde(default = "default_batch_stall_window_secs")]
    pub batch_stall_window_secs: u64,

    /// How often the batch loop checks for a stall, in milliseconds
    #[serde(default = "default_batch_check_interval_ms")]
    pub batch_check_interval_ms: u64,

    /// Capacity of each session inbox
    #[serde(default = "default_inbox_capacity")]
    pub inbox_capacity: usize,
}

fn default_operate_timeout_secs() -> u64 {
    10
}

fn default_batch_stall_window_secs() -> u64 {
    30
}

fn default_batch_check_interval_ms() -> u64 {
    1000
}

fn default_inbox_capacity() -> usize {
    64
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            operate_timeout_secs: default_operate_timeout_secs(),
            batch_stall_window_secs: default_batch_stall_window_secs(),
            batch_check_interval_ms: default_batch_check_interval_ms(),
            inbox_capacity: default_inbox_capacity(),
        }
    }
}

impl OrchestratorConfig {
    /// Load configuration from the process environment
    pub fn load() -> Result<Self, CoreError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, CoreError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(value) = lookup("STRATUS_OPERATE_TIMEOUT_SECS") {
            match value.parse::<u64>() {
                Ok(secs) => config.operate_timeout_secs = secs,
                Err(_) => warn!("Invalid STRATUS_OPERATE_TIMEOUT_SECS value: {}", value),
            }
        }

        if let Some(value) = lookup("STRATUS_BATCH_STALL_WINDOW_SECS") {
            match value.parse::<u64>() {
                Ok(secs) => config.batch_stall_window_secs = secs,
                Err(_) => warn!("Invalid STRATUS_BATCH_STALL_WINDOW_SECS value: {}", value),
            }
        }

        if let Some(value) = lookup("STRATUS_BATCH_CHECK_INTERVAL_MS") {
            match value.parse::<u64>() {
                Ok(ms) => config.batch_check_interval_ms = ms,
                Err(_) => warn!("Invalid STRATUS_BATCH_CHECK_INTERVAL_MS value: {}", value),
            }
        }

        if let Some(value) = lookup("STRATUS_INBOX_CAPACITY") {
            match value.parse::<usize>() {
                Ok(capacity) => config.inbox_capacity = capacity,
                Err(_) => warn!("Invalid STRATUS_INBOX_CAPACITY value: {}", value),
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.operate_timeout_secs == 0 {
            return Err(CoreError::ConfigurationError(
                "operate timeout must be greater than zero".to_string(),
            ));
        }
        if self.batch_stall_window_secs == 0 {
            return Err(CoreError::ConfigurationError(
                "batch stall window must be greater than zero".to_string(),
            ));
        }
        if self.batch_check_interval_ms == 0 {
            return Err(CoreError::ConfigurationError(
                "batch check interval must be greater than zero".to_string(),
            ));
        }
        if self.inbox_capacity == 0 {
            return Err(CoreError::ConfigurationError(
                "inbox capacity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Bound on every forward-and-wait exchange
    pub fn operate_timeout(&self) -> Duration {
        Duration::from_secs(self.operate_timeout_secs)
    }

    /// Idle time after which batch aggregation is abandoned
    pub fn batch_stall_window(&self) -> Duration {
        Duration::from_secs(self.batch_stall_window_secs)
    }

    /// Period of the batch stall check
    pub fn batch_check_interval(&self) -> Duration {
        Duration::from_millis(self.batch_check_interval_ms)
    }
}
