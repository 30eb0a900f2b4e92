//! Logging setup for the Stratus control plane.

use serde::{Deserialize, Serialize};
use std::env;
use tracing::warn;

pub mod logging;

pub use logging::{init_logging, init_test_tracing, LogExt};

/// Output format of the log layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable multi-line output
    Pretty,
    /// One JSON object per event, for log aggregation
    Json,
}

/// Configuration for initializing logging
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitoringConfig {
    /// Service name attached to the startup event
    #[serde(default = "default_service_name")]
    pub service_name: String,
    /// Log level filter (e.g., "info,stratus_core=debug"), overridden by `RUST_LOG`
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
    /// Output format
    #[serde(default = "default_log_format")]
    pub log_format: LogFormat,
    /// Environment (dev, staging, prod)
    #[serde(default = "default_environment")]
    pub environment: String,
}

fn default_service_name() -> String {
    "stratus".to_string()
}

fn default_log_filter() -> String {
    "info".to_string()
}

fn default_log_format() -> LogFormat {
    LogFormat::Pretty
}

fn default_environment() -> String {
    "dev".to_string()
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            log_filter: default_log_filter(),
            log_format: default_log_format(),
            environment: default_environment(),
        }
    }
}

impl MonitoringConfig {
    /// Load from `STRATUS_*` environment variables on top of the defaults
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(name) = lookup("STRATUS_SERVICE_NAME") {
            config.service_name = name;
        }
        if let Some(filter) = lookup("STRATUS_LOG_FILTER") {
            config.log_filter = filter;
        }
        if let Some(environment) = lookup("STRATUS_ENVIRONMENT") {
            config.environment = environment;
        }
        if let Some(format) = lookup("STRATUS_LOG_FORMAT") {
            match format.to_ascii_lowercase().as_str() {
                "json" => config.log_format = LogFormat::Json,
                "pretty" => config.log_format = LogFormat::Pretty,
                other => warn!("Invalid STRATUS_LOG_FORMAT value: {}, using default", other),
            }
        }

        config
    }
}
