//! Configuration for the step worker pool
//!
//! Values come from defaults, optionally overridden by environment variables.

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use tracing::warn;

use crate::error::StepError;

/// Worker pool configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Prefix of worker thread names; threads are named `<prefix> [#n]`
    #[serde(default = "default_thread_name_prefix")]
    pub thread_name_prefix: String,

    /// Upper bound on concurrently running background tasks.
    ///
    /// The default places no practical cap: threads are created on demand
    /// and retired when idle. With a lower bound, work beyond it waits in the
    /// queue and its step reports "not yet scheduled" until a thread frees up.
    #[serde(default = "default_max_threads")]
    pub max_threads: usize,

    /// Idle worker threads are retired after this many seconds
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,

    /// Default time budget for bounded status checks, in milliseconds
    #[serde(default = "default_status_timeout_ms")]
    pub status_timeout_ms: u64,
}

fn default_thread_name_prefix() -> String {
    "cascade-step-worker".to_string()
}

fn default_max_threads() -> usize {
    usize::MAX
}

fn default_keep_alive_secs() -> u64 {
    60
}

fn default_status_timeout_ms() -> u64 {
    1000
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            thread_name_prefix: default_thread_name_prefix(),
            max_threads: default_max_threads(),
            keep_alive_secs: default_keep_alive_secs(),
            status_timeout_ms: default_status_timeout_ms(),
        }
    }
}

impl PoolConfig {
    /// Load configuration from environment variables on top of the defaults
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(prefix) = env::var("STEP_POOL_THREAD_PREFIX") {
            if prefix.trim().is_empty() {
                warn!("Ignoring empty STEP_POOL_THREAD_PREFIX");
            } else {
                config.thread_name_prefix = prefix;
            }
        }

        if let Ok(max_threads) = env::var("STEP_POOL_MAX_THREADS") {
            match max_threads.parse::<usize>() {
                Ok(value) if value > 0 => config.max_threads = value,
                _ => warn!("Invalid STEP_POOL_MAX_THREADS value: {}", max_threads),
            }
        }

        if let Ok(keep_alive) = env::var("STEP_POOL_KEEP_ALIVE_SECS") {
            if let Ok(value) = keep_alive.parse::<u64>() {
                config.keep_alive_secs = value;
            } else {
                warn!("Invalid STEP_POOL_KEEP_ALIVE_SECS value: {}", keep_alive);
            }
        }

        if let Ok(timeout) = env::var("STEP_POOL_STATUS_TIMEOUT_MS") {
            if let Ok(value) = timeout.parse::<u64>() {
                config.status_timeout_ms = value;
            } else {
                warn!("Invalid STEP_POOL_STATUS_TIMEOUT_MS value: {}", timeout);
            }
        }

        config
    }

    /// Reject values the worker runtime cannot be built with
    pub fn validate(&self) -> Result<(), StepError> {
        if self.max_threads == 0 {
            return Err(StepError::PoolInitialization(
                "max_threads must be at least 1".to_string(),
            ));
        }
        if self.thread_name_prefix.trim().is_empty() {
            return Err(StepError::PoolInitialization(
                "thread_name_prefix must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Keep-alive as a duration
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    /// Status timeout as a duration
    pub fn status_timeout(&self) -> Duration {
        Duration::from_millis(self.status_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PoolConfig::default();
        assert_eq!(config.thread_name_prefix, "cascade-step-worker");
        assert_eq!(config.max_threads, usize::MAX);
        assert!(config.validate().is_ok());
        assert_eq!(config.keep_alive(), Duration::from_secs(60));
        assert_eq!(config.status_timeout(), Duration::from_millis(1000));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: PoolConfig =
            serde_json::from_value(serde_json::json!({ "max_threads": 4 })).unwrap();
        assert_eq!(config.max_threads, 4);
        assert_eq!(config.thread_name_prefix, "cascade-step-worker");
        assert_eq!(config.keep_alive_secs, 60);
    }

    #[test]
    fn test_validate_rejects_zero_threads() {
        let config: PoolConfig =
            serde_json::from_value(serde_json::json!({ "max_threads": 0 })).unwrap();

        let err = config.validate().unwrap_err();
        assert_eq!(
            err.to_string(),
            "Worker pool initialization failed: max_threads must be at least 1"
        );
    }

    // Single test for all variables: the environment is process-wide.
    #[test]
    fn test_from_env_overrides_and_invalid_values() {
        let vars = [
            "STEP_POOL_THREAD_PREFIX",
            "STEP_POOL_MAX_THREADS",
            "STEP_POOL_KEEP_ALIVE_SECS",
            "STEP_POOL_STATUS_TIMEOUT_MS",
        ];

        env::set_var("STEP_POOL_THREAD_PREFIX", "build-worker");
        env::set_var("STEP_POOL_MAX_THREADS", "16");
        env::set_var("STEP_POOL_KEEP_ALIVE_SECS", "5");
        env::set_var("STEP_POOL_STATUS_TIMEOUT_MS", "250");
        let config = PoolConfig::from_env();
        assert_eq!(
            config,
            PoolConfig {
                thread_name_prefix: "build-worker".to_string(),
                max_threads: 16,
                keep_alive_secs: 5,
                status_timeout_ms: 250,
            }
        );

        env::set_var("STEP_POOL_THREAD_PREFIX", "   ");
        env::set_var("STEP_POOL_MAX_THREADS", "0");
        env::set_var("STEP_POOL_KEEP_ALIVE_SECS", "soon");
        env::set_var("STEP_POOL_STATUS_TIMEOUT_MS", "-1");
        let config = PoolConfig::from_env();
        for var in vars {
            env::remove_var(var);
        }

        assert_eq!(config, PoolConfig::default());
    }
}
