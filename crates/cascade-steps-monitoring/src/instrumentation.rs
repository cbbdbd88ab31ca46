//! Tracing hooks for step executions.

use cascade_steps_core::{ExecutorAugmentor, Job, StepError, TaskExecutor, TaskListener};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, info_span};
use uuid::Uuid;

use crate::logging::LogExt;

/// Task listener that writes every line as a tracing event
#[derive(Debug, Clone)]
pub struct TracingListener {
    run: String,
}

impl TracingListener {
    /// Listener for the named run
    pub fn new(run: impl Into<String>) -> Self {
        Self { run: run.into() }
    }
}

impl TaskListener for TracingListener {
    fn println(&self, line: &str) {
        info!(run = %self.run, "{}", line);
    }
}

/// Augmentor that runs every pool job inside its own span
#[derive(Debug, Default)]
pub struct TracingAugmentor;

impl ExecutorAugmentor for TracingAugmentor {
    fn name(&self) -> &str {
        "tracing"
    }

    fn augment(&self, executor: Arc<dyn TaskExecutor>) -> Result<Arc<dyn TaskExecutor>, StepError> {
        Ok(Arc::new(TracedExecutor { inner: executor }))
    }
}

struct TracedExecutor {
    inner: Arc<dyn TaskExecutor>,
}

impl TaskExecutor for TracedExecutor {
    fn submit(&self, job: Job) -> Result<(), StepError> {
        let job_id = Uuid::new_v4();
        let span = info_span!("step_job", job = %job_id);
        self.inner
            .submit(Box::new(move || {
                let _entered = span.enter();
                let started = Instant::now();
                debug!("Step job started");
                job();
                debug!(elapsed_ms = started.elapsed().as_millis() as u64, "Step job finished");
            }))
            .log_err("Failed to submit step job")
    }

    fn describe(&self) -> String {
        format!("traced {}", self.inner.describe())
    }
}
