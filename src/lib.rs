//! Cascade steps: the non-blocking step execution core together with its
//! logging and instrumentation.
//!
//! Hosts usually call [`bootstrap`] once at process start and then build
//! executions with the constructors re-exported from the core crate.

pub use cascade_steps_core::*;

/// Logging set-up and tracing hooks
pub mod monitoring {
    pub use cascade_steps_monitoring::*;
}

use anyhow::anyhow;
use cascade_steps_monitoring::{init_logging, LoggingConfig, TracingAugmentor};
use std::sync::Arc;
use tracing::info;

/// Build a pool from `config` whose jobs each run inside a tracing span
pub fn traced_pool(config: PoolConfig) -> WorkerPool {
    WorkerPool::builder()
        .config(config)
        .augmentor(Arc::new(TracingAugmentor))
        .build()
}

/// Initialize logging and install the process-wide worker pool, both
/// configured from the environment.
///
/// Fails if a global subscriber or a global pool already exists.
pub fn bootstrap() -> anyhow::Result<WorkerPool> {
    init_logging(&LoggingConfig::from_env())?;

    let config = PoolConfig::from_env();
    info!(
        prefix = %config.thread_name_prefix,
        max_threads = config.max_threads,
        "Installing step worker pool"
    );
    let pool = traced_pool(config);
    WorkerPool::install_global(pool.clone())
        .map_err(|_| anyhow!("A process-wide step worker pool is already installed"))?;
    Ok(pool)
}
