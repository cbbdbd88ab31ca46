//! Testing utilities for Cascade step executions.
//!
//! Fakes for the controlling runtime (recording contexts, scripted bodies,
//! in-memory runs), augmentors that record their use, mocks of the
//! collaborator traits, and logging set-up for tests.

pub mod implementations;
pub mod mocks;
pub mod util;

/// Re-export commonly used types for convenience
pub use mockall;

pub use implementations::*;
pub use util::{init_test_logging, wait_until};

use cascade_steps_core::{PoolConfig, WorkerPool};

/// Small private pool for one test, with threads named after `prefix`
pub fn test_pool(prefix: &str) -> WorkerPool {
    WorkerPool::new(PoolConfig {
        thread_name_prefix: prefix.to_string(),
        max_threads: 8,
        keep_alive_secs: 5,
        ..PoolConfig::default()
    })
}
