//! Logging and observability for Cascade step executions.

use serde::{Deserialize, Serialize};
use std::env;
use tracing::warn;

/// Tracing hooks for pools and listeners
pub mod instrumentation;

/// Subscriber set-up
pub mod logging;

pub use instrumentation::{TracingAugmentor, TracingListener};
pub use logging::{init_logging, LogExt};

/// Configuration for the logging subscriber
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Service name attached to the first log line
    pub service_name: String,
    /// Log level filter (e.g., "info,cascade_steps_core=debug")
    pub log_filter: String,
    /// Emit JSON lines instead of pretty output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            service_name: "cascade-steps".to_string(),
            log_filter: "info".to_string(),
            json: false,
        }
    }
}

impl LoggingConfig {
    /// Load configuration from `LOG_FILTER` and `LOG_JSON` on top of the defaults
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(filter) = env::var("LOG_FILTER") {
            config.log_filter = filter;
        }

        if let Ok(json) = env::var("LOG_JSON") {
            match json.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => config.json = true,
                "0" | "false" | "no" => config.json = false,
                _ => warn!("Invalid LOG_JSON value: {}", json),
            }
        }

        config
    }
}
