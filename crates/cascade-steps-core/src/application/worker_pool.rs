//! Shared worker pool for background step work.
//!
//! The pool is built lazily on first use: a tokio runtime provides named
//! blocking threads, then every registered [`ExecutorAugmentor`] wraps the
//! executor in registration order. Construction happens exactly once per
//! pool, even under concurrent first access.

use once_cell::sync::OnceCell;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::runtime::{Builder, Handle, Runtime};
use tracing::{debug, error, info};

use crate::config::PoolConfig;
use crate::domain::identity;
use crate::error::StepError;

/// A unit of work handed to an executor
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Runs jobs on background threads
pub trait TaskExecutor: Send + Sync {
    /// Queue a job. Never blocks on the job itself.
    fn submit(&self, job: Job) -> Result<(), StepError>;

    /// Short description for diagnostics
    fn describe(&self) -> String;
}

/// Extension point that may decorate the pool's executor
pub trait ExecutorAugmentor: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Return the executor to use in place of `executor`
    fn augment(&self, executor: Arc<dyn TaskExecutor>) -> Result<Arc<dyn TaskExecutor>, StepError>;
}

/// Executor backed by a dedicated tokio runtime's blocking pool
pub struct RuntimeExecutor {
    runtime: Option<Runtime>,
    handle: Handle,
    name: String,
}

impl RuntimeExecutor {
    /// Build the runtime described by `config`
    pub fn new(config: &PoolConfig) -> Result<Self, StepError> {
        config.validate()?;
        let prefix = config.thread_name_prefix.clone();
        let counter = Arc::new(AtomicUsize::new(0));
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(config.max_threads)
            .thread_keep_alive(config.keep_alive())
            .thread_name_fn(move || {
                let n = counter.fetch_add(1, Ordering::Relaxed) + 1;
                format!("{} [#{}]", prefix, n)
            })
            .on_thread_start(identity::reset_thread_identity)
            .enable_all()
            .build()
            .map_err(|e| StepError::PoolInitialization(e.to_string()))?;
        let handle = runtime.handle().clone();
        Ok(Self {
            runtime: Some(runtime),
            handle,
            name: config.thread_name_prefix.clone(),
        })
    }
}

impl TaskExecutor for RuntimeExecutor {
    fn submit(&self, job: Job) -> Result<(), StepError> {
        drop(self.handle.spawn_blocking(job));
        Ok(())
    }

    fn describe(&self) -> String {
        format!("runtime executor `{}`", self.name)
    }
}

impl Drop for RuntimeExecutor {
    fn drop(&mut self) {
        // Workers are detached; nothing waits for in-flight jobs.
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

struct PoolInner {
    config: PoolConfig,
    augmentors: Vec<Arc<dyn ExecutorAugmentor>>,
    executor: OnceCell<Result<Arc<dyn TaskExecutor>, StepError>>,
}

/// Handle to a lazily constructed, shared executor.
///
/// Cloning is cheap; clones share the same executor.
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

static GLOBAL: OnceCell<WorkerPool> = OnceCell::new();

impl WorkerPool {
    /// Pool with the given configuration and no augmentors
    pub fn new(config: PoolConfig) -> Self {
        Self::builder().config(config).build()
    }

    /// Start building a pool
    pub fn builder() -> WorkerPoolBuilder {
        WorkerPoolBuilder::default()
    }

    /// The process-wide pool, created from the environment on first use
    pub fn global() -> &'static WorkerPool {
        GLOBAL.get_or_init(|| {
            info!("Creating process-wide step worker pool");
            WorkerPool::new(PoolConfig::from_env())
        })
    }

    /// Install the process-wide pool. Fails with the given pool if one is
    /// already installed or was already created on demand.
    pub fn install_global(pool: WorkerPool) -> Result<(), WorkerPool> {
        GLOBAL.set(pool)
    }

    /// Configuration of this pool
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// True once the executor has been built (or failed to build)
    pub fn is_initialized(&self) -> bool {
        self.inner.executor.get().is_some()
    }

    /// The executor, built on first call.
    ///
    /// A construction failure is cached: every later call returns the same
    /// error without running any augmentor again.
    pub fn get(&self) -> Result<Arc<dyn TaskExecutor>, StepError> {
        self.inner
            .executor
            .get_or_init(|| self.construct())
            .clone()
    }

    /// Queue a job on the executor
    pub fn submit(&self, job: Job) -> Result<(), StepError> {
        self.get()?.submit(job)
    }

    fn construct(&self) -> Result<Arc<dyn TaskExecutor>, StepError> {
        let base: Arc<dyn TaskExecutor> = Arc::new(RuntimeExecutor::new(&self.inner.config).map_err(|e| {
            error!(error = %e, "Failed to build step worker pool");
            e
        })?);

        let executor = self
            .inner
            .augmentors
            .iter()
            .try_fold(base, |executor, augmentor| {
                debug!(augmentor = augmentor.name(), "Augmenting step worker pool");
                augmentor.augment(executor).map_err(|e| {
                    error!(augmentor = augmentor.name(), error = %e, "Worker pool augmentation failed");
                    StepError::PoolInitialization(format!("augmentor `{}` failed: {}", augmentor.name(), e))
                })
            })?;

        info!(executor = %executor.describe(), "Step worker pool ready");
        Ok(executor)
    }
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("config", &self.inner.config)
            .field("augmentors", &self.inner.augmentors.len())
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

/// Builder for [`WorkerPool`]
#[derive(Default)]
pub struct WorkerPoolBuilder {
    config: PoolConfig,
    augmentors: Vec<Arc<dyn ExecutorAugmentor>>,
}

impl WorkerPoolBuilder {
    /// Use this configuration
    pub fn config(mut self, config: PoolConfig) -> Self {
        self.config = config;
        self
    }

    /// Register an augmentor; augmentors run in registration order
    pub fn augmentor(mut self, augmentor: Arc<dyn ExecutorAugmentor>) -> Self {
        self.augmentors.push(augmentor);
        self
    }

    /// Build the pool. Nothing is constructed until first use.
    pub fn build(self) -> WorkerPool {
        WorkerPool {
            inner: Arc::new(PoolInner {
                config: self.config,
                augmentors: self.augmentors,
                executor: OnceCell::new(),
            }),
        }
    }
}
