//! Worker pool augmentors that record how they were used.

use cascade_steps_core::{ExecutorAugmentor, StepError, TaskExecutor};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Counts `augment` calls; optionally slow, to widen construction races
#[derive(Debug, Default)]
pub struct CountingAugmentor {
    calls: AtomicUsize,
    delay: Option<Duration>,
}

impl CountingAugmentor {
    /// Augmentor that returns the executor unchanged
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Augmentor that sleeps in `augment`
    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            delay: Some(delay),
        })
    }

    /// Number of `augment` calls so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ExecutorAugmentor for CountingAugmentor {
    fn name(&self) -> &str {
        "counting"
    }

    fn augment(&self, executor: Arc<dyn TaskExecutor>) -> Result<Arc<dyn TaskExecutor>, StepError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        Ok(executor)
    }
}

/// Appends its name to a shared log when it runs
pub struct OrderRecordingAugmentor {
    name: String,
    log: Arc<Mutex<Vec<String>>>,
}

impl OrderRecordingAugmentor {
    /// Augmentor writing `name` to `log`
    pub fn new(name: impl Into<String>, log: Arc<Mutex<Vec<String>>>) -> Arc<Self> {
        Arc::new(Self { name: name.into(), log })
    }
}

impl ExecutorAugmentor for OrderRecordingAugmentor {
    fn name(&self) -> &str {
        &self.name
    }

    fn augment(&self, executor: Arc<dyn TaskExecutor>) -> Result<Arc<dyn TaskExecutor>, StepError> {
        self.log.lock().push(self.name.clone());
        Ok(executor)
    }
}

/// Always fails, counting its calls
#[derive(Debug, Default)]
pub struct FailingAugmentor {
    calls: AtomicUsize,
}

impl FailingAugmentor {
    /// New failing augmentor
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of `augment` calls so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ExecutorAugmentor for FailingAugmentor {
    fn name(&self) -> &str {
        "failing"
    }

    fn augment(&self, _executor: Arc<dyn TaskExecutor>) -> Result<Arc<dyn TaskExecutor>, StepError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(StepError::Failed("augmentor refused the pool".to_string()))
    }
}
