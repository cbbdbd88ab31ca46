//! Step execution that alternates between background work and nested bodies.
//!
//! A general step starts from the controlling thread, schedules background
//! work with [`GeneralHandle::run`], may launch its nested body from there,
//! and finishes with a background finalizer through a [`TailCall`]. At most
//! one background task is in flight per execution.

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::application::task::{run_task, BackgroundTask, TaskContext};
use crate::application::worker_pool::WorkerPool;
use crate::domain::body::BodyExecutionCallback;
use crate::domain::channel::ResultChannel;
use crate::domain::context::{step_function_name, StepContext};
use crate::domain::execution::StepExecution;
use crate::domain::identity::Principal;
use crate::error::{StepError, StepFailure, StepResult};

/// Where a general execution is in its life
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneralPhase {
    /// Nothing in flight, waiting for the controlling thread
    Idle,
    /// A background task is queued or running
    BackgroundRunning,
    /// The nested body is running
    BodyRunning,
    /// The result channel was resolved
    Terminal,
}

/// State of a general execution that survives a restart
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneralSnapshot {
    /// Worker thread that was running background work when the snapshot was taken
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_name: Option<String>,
}

/// Behaviour of a general non-blocking step.
///
/// `start` runs on the controlling thread and must not block; it typically
/// calls [`GeneralHandle::run`].
pub trait GeneralStep: Send + Sync + 'static {
    /// Kick off the step
    fn start(&self, handle: &GeneralHandle) -> StepResult<()>;
}

impl<F> GeneralStep for F
where
    F: Fn(&GeneralHandle) -> StepResult<()> + Send + Sync + 'static,
{
    fn start(&self, handle: &GeneralHandle) -> StepResult<()> {
        self(handle)
    }
}

struct GeneralInner {
    channel: Arc<ResultChannel>,
    pool: WorkerPool,
    active: Mutex<Option<Arc<BackgroundTask>>>,
    stop_cause: OnceCell<StepFailure>,
    restored_thread_name: Mutex<Option<String>>,
    bodies_running: AtomicUsize,
}

impl GeneralInner {
    fn report_failure(&self, failure: StepFailure) {
        if let Some(cause) = self.stop_cause.get() {
            debug!(error = %failure, stop_cause = %cause, "Suppressing failure into stop cause");
            cause.add_suppressed(failure);
        } else if !self.channel.fail(failure.clone()) {
            match self.stop_cause.get() {
                Some(cause) => cause.add_suppressed(failure),
                None => warn!(error = %failure, "Step failure lost, result channel already resolved"),
            }
        }
    }

    /// Clear the active slot, but only if `task` still owns it
    fn release(&self, task: &Arc<BackgroundTask>) {
        let mut active = self.active.lock();
        if active.as_ref().map_or(false, |current| Arc::ptr_eq(current, task)) {
            *active = None;
        }
    }

    fn in_flight(&self) -> Option<Arc<BackgroundTask>> {
        self.active
            .lock()
            .as_ref()
            .filter(|task| !task.is_finished())
            .cloned()
    }
}

/// Handle a general step uses to schedule work and report results.
///
/// Cheap to clone; background blocks and body callbacks keep their own copy.
#[derive(Clone)]
pub struct GeneralHandle {
    inner: Arc<GeneralInner>,
}

impl GeneralHandle {
    fn new(context: Arc<dyn StepContext>, pool: WorkerPool) -> Self {
        Self {
            inner: Arc::new(GeneralInner {
                channel: Arc::new(ResultChannel::new(context)),
                pool,
                active: Mutex::new(None),
                stop_cause: OnceCell::new(),
                restored_thread_name: Mutex::new(None),
                bodies_running: AtomicUsize::new(0),
            }),
        }
    }

    /// The step's result channel
    pub fn channel(&self) -> &Arc<ResultChannel> {
        &self.inner.channel
    }

    /// The step's runtime context
    pub fn context(&self) -> &Arc<dyn StepContext> {
        self.inner.channel.context()
    }

    /// Report success of the whole step
    pub fn succeed(&self, value: Value) -> bool {
        self.inner.channel.succeed(value)
    }

    /// Report failure of the whole step, honouring an in-progress stop
    pub fn fail(&self, failure: StepFailure) {
        self.inner.report_failure(failure);
    }

    /// True once the step was asked to stop
    pub fn is_stopping(&self) -> bool {
        self.inner.stop_cause.get().is_some()
    }

    /// Schedule `block` on the worker pool.
    ///
    /// Call from the controlling thread (or a body callback), never from
    /// inside another block that has not returned yet. Does nothing once the
    /// step was asked to stop. A failure of the block fails the step, or is
    /// suppressed into the stop cause if a stop is in progress.
    pub fn run<F>(&self, block: F) -> StepResult<()>
    where
        F: FnOnce(&TaskContext) -> StepResult<()> + Send + 'static,
    {
        if self.is_stopping() {
            debug!("Execution is stopping, not scheduling background work");
            return Ok(());
        }

        let principal = Principal::current();
        let task = BackgroundTask::new();
        {
            let mut active = self.inner.active.lock();
            if let Some(previous) = active.as_ref().filter(|t| !t.is_finished()) {
                warn!(previous = %previous.id(), "Scheduling background work while earlier work is still in flight");
            }
            *active = Some(task.clone());
        }
        // stop() may have run between the check above and publishing the task
        if self.is_stopping() {
            task.cancel();
        }

        let inner = self.inner.clone();
        let job_task = task.clone();
        debug!(task = %task.id(), principal = %principal, "Submitting background step work");

        let submitted = self.inner.pool.submit(Box::new(move || {
            if let Some(Err(failure)) = run_task(&job_task, &inner.channel, principal, block) {
                inner.report_failure(failure);
            }
            job_task.finish();
            inner.release(&job_task);
        }));

        if let Err(e) = submitted {
            self.inner.release(&task);
            return Err(e.into());
        }
        Ok(())
    }

    /// Callback for the nested body that runs `finished` in the background
    /// once the body completes
    pub fn tail_call<F>(&self, finished: F) -> TailCall
    where
        F: Fn(&TaskContext) -> StepResult<()> + Send + Sync + 'static,
    {
        TailCall {
            handle: self.clone(),
            finished: Arc::new(finished),
        }
    }

    /// Launch the nested body with `callback`, usually a [`TailCall`].
    ///
    /// May be called from a background block.
    pub fn start_body(&self, callback: TailCall) -> StepResult<()> {
        let invoker = self.context().new_body_invoker()?;
        self.inner.bodies_running.fetch_add(1, Ordering::AcqRel);
        let callback: Arc<dyn BodyExecutionCallback> = Arc::new(callback);
        invoker.start(callback).map_err(|e| {
            self.inner.bodies_running.fetch_sub(1, Ordering::AcqRel);
            e
        })
    }

    /// Current phase
    pub fn phase(&self) -> GeneralPhase {
        if !self.inner.channel.is_open() {
            GeneralPhase::Terminal
        } else if self.inner.in_flight().is_some() {
            GeneralPhase::BackgroundRunning
        } else if self.inner.bodies_running.load(Ordering::Acquire) > 0 {
            GeneralPhase::BodyRunning
        } else {
            GeneralPhase::Idle
        }
    }

    fn running_thread(&self) -> Option<String> {
        self.inner.in_flight().and_then(|task| task.thread_name())
    }
}

impl fmt::Debug for GeneralHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeneralHandle")
            .field("phase", &self.phase())
            .field("stopping", &self.is_stopping())
            .finish()
    }
}

/// Body callback that wraps a finalizer in [`GeneralHandle::run`].
///
/// On body success the success is forwarded only if the finalizer succeeds.
/// On body failure the original failure is forwarded, with any finalizer
/// failure suppressed onto it.
pub struct TailCall {
    handle: GeneralHandle,
    finished: Arc<dyn Fn(&TaskContext) -> StepResult<()> + Send + Sync>,
}

impl TailCall {
    fn body_done(&self) {
        let _ = self
            .handle
            .inner
            .bodies_running
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    fn schedule(&self, block: impl FnOnce(&TaskContext) -> StepResult<()> + Send + 'static) {
        if let Err(failure) = self.handle.run(block) {
            warn!(error = %failure, "Could not schedule body finalizer");
            self.handle.fail(failure);
        }
    }
}

impl BodyExecutionCallback for TailCall {
    fn on_success(&self, value: Value) {
        self.body_done();
        let finished = self.finished.clone();
        let handle = self.handle.clone();
        self.schedule(move |ctx| {
            finished(ctx)?;
            handle.succeed(value);
            Ok(())
        });
    }

    fn on_failure(&self, failure: StepFailure) {
        self.body_done();
        let finished = self.finished.clone();
        let handle = self.handle.clone();
        self.schedule(move |ctx| {
            if let Err(secondary) = finished(ctx) {
                failure.add_suppressed(secondary);
            }
            handle.fail(failure);
            Ok(())
        });
    }
}

/// Execution driving a [`GeneralStep`]
pub struct GeneralNonBlockingExecution<S: GeneralStep> {
    step: S,
    handle: GeneralHandle,
}

impl<S: GeneralStep> GeneralNonBlockingExecution<S> {
    /// Execution of `step` for the step owning `context`
    pub fn new(context: Arc<dyn StepContext>, pool: WorkerPool, step: S) -> Self {
        Self {
            step,
            handle: GeneralHandle::new(context, pool),
        }
    }

    /// Bring back an execution persisted with [`Self::snapshot`]
    pub fn restore(context: Arc<dyn StepContext>, pool: WorkerPool, step: S, snapshot: GeneralSnapshot) -> Self {
        let execution = Self::new(context, pool, step);
        *execution.handle.inner.restored_thread_name.lock() = snapshot.thread_name;
        execution
    }

    /// State to persist alongside the step
    pub fn snapshot(&self) -> GeneralSnapshot {
        GeneralSnapshot {
            thread_name: self
                .handle
                .running_thread()
                .or_else(|| self.handle.inner.restored_thread_name.lock().clone()),
        }
    }

    /// Handle shared with the step's blocks and callbacks
    pub fn handle(&self) -> &GeneralHandle {
        &self.handle
    }

    /// The step being executed
    pub fn step(&self) -> &S {
        &self.step
    }

    /// Current phase
    pub fn phase(&self) -> GeneralPhase {
        self.handle.phase()
    }
}

impl<S: GeneralStep> StepExecution for GeneralNonBlockingExecution<S> {
    fn channel(&self) -> &Arc<ResultChannel> {
        self.handle.channel()
    }

    fn start(&self) -> Result<bool, StepFailure> {
        self.step.start(&self.handle)?;
        Ok(false)
    }

    /// Cancel background work if any, then fail with the first stop cause
    fn stop(&self, cause: StepFailure) -> Result<(), StepFailure> {
        let inner = &self.handle.inner;
        let authoritative = inner.stop_cause.get_or_init(|| cause.clone()).clone();
        if let Some(task) = inner.active.lock().clone() {
            debug!(task = %task.id(), "Cancelling background step work");
            task.cancel();
        }
        inner.channel.fail(authoritative);
        Ok(())
    }

    fn on_resume(&self) {
        let restored = self.handle.inner.restored_thread_name.lock().take();
        // queued work that no thread picked up yet does not count
        if restored.is_some() || self.handle.running_thread().is_some() {
            let step = step_function_name(self.context().as_ref());
            warn!(step = %step, thread = ?restored, "Background work was in flight before restart");
            self.handle.fail(StepError::resume_not_supported(step).into());
        }
    }

    fn status(&self) -> Option<String> {
        let status = match self.handle.running_thread() {
            Some(thread) => format!("running in thread: {}", thread),
            None => "not yet scheduled".to_string(),
        };
        Some(status)
    }

    fn blocks_restart(&self) -> bool {
        self.handle.running_thread().is_some()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl<S: GeneralStep> fmt::Debug for GeneralNonBlockingExecution<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeneralNonBlockingExecution")
            .field("handle", &self.handle)
            .finish()
    }
}
