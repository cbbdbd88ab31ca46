//! Step execution that runs one unit of work on the worker pool.
//!
//! `start` never blocks the controlling thread: the caller's principal is
//! captured, the work is queued, and the result arrives later through the
//! step's [`ResultChannel`].

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use serde_json::Value;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::application::task::{run_task, BackgroundTask, TaskContext};
use crate::application::worker_pool::WorkerPool;
use crate::domain::channel::ResultChannel;
use crate::domain::context::{step_function_name, StepContext};
use crate::domain::execution::StepExecution;
use crate::domain::identity::Principal;
use crate::error::{StepError, StepFailure, StepResult};

type Work = Box<dyn FnOnce(&TaskContext) -> StepResult<Value> + Send + 'static>;

/// Where a non-blocking synchronous execution is in its life
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    /// Not picked up by a worker yet
    NotScheduled,
    /// A worker is running the work
    Running,
    /// Success was delivered
    Succeeded,
    /// The work's failure was delivered
    Failed,
    /// A stop cause was delivered
    Cancelled,
}

impl SyncPhase {
    /// True for the three final phases
    pub fn is_terminal(self) -> bool {
        matches!(self, SyncPhase::Succeeded | SyncPhase::Failed | SyncPhase::Cancelled)
    }
}

struct Shared {
    channel: Arc<ResultChannel>,
    phase: Mutex<SyncPhase>,
    stop_cause: OnceCell<StepFailure>,
}

impl Shared {
    /// Move to `next` unless a final phase was already reached
    fn transition(&self, next: SyncPhase) {
        let mut phase = self.phase.lock();
        if !phase.is_terminal() {
            *phase = next;
        }
    }

    fn report_success(&self, value: Value) {
        if self.channel.succeed(value) {
            self.transition(SyncPhase::Succeeded);
        } else {
            debug!("Step result discarded, execution was already stopped");
            self.transition(SyncPhase::Cancelled);
        }
    }

    fn report_failure(&self, failure: StepFailure) {
        if let Some(cause) = self.stop_cause.get() {
            debug!(error = %failure, stop_cause = %cause, "Suppressing failure into stop cause");
            cause.add_suppressed(failure);
            self.transition(SyncPhase::Cancelled);
            return;
        }

        if self.channel.fail(failure.clone()) {
            self.transition(SyncPhase::Failed);
        } else if let Some(cause) = self.stop_cause.get() {
            // stop() resolved the channel between the check and the report
            cause.add_suppressed(failure);
            self.transition(SyncPhase::Cancelled);
        } else {
            warn!(error = %failure, "Step failure lost, result channel already resolved");
        }
    }
}

/// Runs a single callable on the [`WorkerPool`], exactly once.
///
/// The execution cannot survive a restart: `on_resume` always fails with
/// [`StepError::ResumeNotSupported`].
pub struct SynchronousNonBlockingExecution {
    shared: Arc<Shared>,
    pool: WorkerPool,
    work: Mutex<Option<Work>>,
    task: Mutex<Option<Arc<BackgroundTask>>>,
}

impl SynchronousNonBlockingExecution {
    /// Execution of `work` for the step owning `context`
    pub fn new<F>(context: Arc<dyn StepContext>, pool: WorkerPool, work: F) -> Self
    where
        F: FnOnce(&TaskContext) -> StepResult<Value> + Send + 'static,
    {
        Self {
            shared: Arc::new(Shared {
                channel: Arc::new(ResultChannel::new(context)),
                phase: Mutex::new(SyncPhase::NotScheduled),
                stop_cause: OnceCell::new(),
            }),
            pool,
            work: Mutex::new(Some(Box::new(work))),
            task: Mutex::new(None),
        }
    }

    /// Current phase
    pub fn phase(&self) -> SyncPhase {
        *self.shared.phase.lock()
    }

    /// The cause passed to the first `stop` call, if any
    pub fn stop_cause(&self) -> Option<StepFailure> {
        self.shared.stop_cause.get().cloned()
    }

    fn current_task(&self) -> Option<Arc<BackgroundTask>> {
        self.task.lock().clone()
    }
}

impl StepExecution for SynchronousNonBlockingExecution {
    fn channel(&self) -> &Arc<ResultChannel> {
        &self.shared.channel
    }

    fn start(&self) -> Result<bool, StepFailure> {
        let work = self
            .work
            .lock()
            .take()
            .ok_or_else(|| StepError::ExecutionError("execution was already started".to_string()))?;

        let principal = Principal::current();
        let task = BackgroundTask::new();
        *self.task.lock() = Some(task.clone());

        // stop() publishes its cause before looking for the task
        if let Some(cause) = self.shared.stop_cause.get() {
            debug!(stop_cause = %cause, "Execution was stopped before it started, not submitting work");
            task.cancel();
            task.finish();
            self.shared.transition(SyncPhase::Cancelled);
            return Ok(false);
        }

        let shared = self.shared.clone();
        let job_task = task.clone();
        debug!(task = %task.id(), principal = %principal, "Submitting non-blocking step work");

        self.pool.submit(Box::new(move || {
            let outcome = run_task(&job_task, &shared.channel, principal, |ctx| {
                shared.transition(SyncPhase::Running);
                work(ctx)
            });
            match outcome {
                None => shared.transition(SyncPhase::Cancelled),
                Some(Ok(value)) => shared.report_success(value),
                Some(Err(failure)) => shared.report_failure(failure),
            }
            job_task.finish();
        }))?;

        Ok(false)
    }

    fn stop(&self, cause: StepFailure) -> Result<(), StepFailure> {
        let authoritative = self.shared.stop_cause.get_or_init(|| cause.clone()).clone();
        if !authoritative.same_as(&cause) {
            debug!(cause = %cause, "Execution already stopping, keeping the first stop cause");
        }

        if let Some(task) = self.current_task() {
            task.cancel();
        }

        if self.shared.channel.fail(authoritative) {
            self.shared.transition(SyncPhase::Cancelled);
        }
        Ok(())
    }

    fn on_resume(&self) {
        let step = step_function_name(self.context().as_ref());
        warn!(step = %step, "Non-blocking synchronous step cannot be resumed");
        if self.shared.channel.fail(StepError::resume_not_supported(step).into()) {
            self.shared.transition(SyncPhase::Failed);
        }
    }

    fn status(&self) -> Option<String> {
        let status = match self.current_task().and_then(|task| task.thread_name()) {
            Some(thread) => format!("running in thread: {}", thread),
            None => "not yet scheduled".to_string(),
        };
        Some(status)
    }

    fn blocks_restart(&self) -> bool {
        self.current_task().map_or(false, |task| task.is_running())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl fmt::Debug for SynchronousNonBlockingExecution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SynchronousNonBlockingExecution")
            .field("phase", &self.phase())
            .field("task", &self.current_task())
            .finish()
    }
}
