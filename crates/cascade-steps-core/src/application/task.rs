//! Background task handles and the worker-side context.

use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::domain::channel::ResultChannel;
use crate::domain::context::StepContext;
use crate::domain::failure_handler::panic_message;
use crate::domain::identity::{self, Principal};
use crate::error::{StepError, StepFailure};

/// Cancelable handle for one submitted unit of work
pub struct BackgroundTask {
    id: Uuid,
    token: CancellationToken,
    interrupted: Mutex<bool>,
    wakeup: Condvar,
    thread_name: Mutex<Option<String>>,
    finished: AtomicBool,
}

impl BackgroundTask {
    /// A task that has not been picked up by a worker yet
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::new_v4(),
            token: CancellationToken::new(),
            interrupted: Mutex::new(false),
            wakeup: Condvar::new(),
            thread_name: Mutex::new(None),
            finished: AtomicBool::new(false),
        })
    }

    /// Identifier for logs
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Cancel the task, interrupting it if it is running
    pub fn cancel(&self) {
        *self.interrupted.lock() = true;
        self.wakeup.notify_all();
        self.token.cancel();
    }

    /// True once `cancel` was called
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Name of the worker thread that picked the task up
    pub fn thread_name(&self) -> Option<String> {
        self.thread_name.lock().clone()
    }

    /// True while a worker is executing the task
    pub fn is_running(&self) -> bool {
        self.thread_name.lock().is_some() && !self.is_finished()
    }

    /// True once the task body returned
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    fn enter(&self) -> String {
        let name = std::thread::current()
            .name()
            .unwrap_or("unnamed worker")
            .to_string();
        *self.thread_name.lock() = Some(name.clone());
        name
    }

    pub(crate) fn finish(&self) {
        self.finished.store(true, Ordering::Release);
    }

    fn sleep(&self, duration: Duration) -> Result<(), StepFailure> {
        let deadline = Instant::now() + duration;
        let mut interrupted = self.interrupted.lock();
        while !*interrupted {
            if self.wakeup.wait_until(&mut interrupted, deadline).timed_out() {
                return if *interrupted {
                    Err(StepError::Interrupted.into())
                } else {
                    Ok(())
                };
            }
        }
        Err(StepError::Interrupted.into())
    }
}

impl fmt::Debug for BackgroundTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackgroundTask")
            .field("id", &self.id)
            .field("thread_name", &self.thread_name())
            .field("cancelled", &self.is_cancelled())
            .field("finished", &self.is_finished())
            .finish()
    }
}

/// What a unit of work sees while running on a worker
pub struct TaskContext {
    task: Arc<BackgroundTask>,
    channel: Arc<ResultChannel>,
    principal: Principal,
    thread_name: String,
}

impl TaskContext {
    /// The step's runtime context, for lookups
    pub fn step_context(&self) -> &Arc<dyn StepContext> {
        self.channel.context()
    }

    /// True once the step was asked to stop
    pub fn is_cancelled(&self) -> bool {
        self.task.is_cancelled()
    }

    /// Fail with `StepError::Interrupted` if the step was asked to stop
    pub fn check_cancelled(&self) -> Result<(), StepFailure> {
        if self.is_cancelled() {
            Err(StepError::Interrupted.into())
        } else {
            Ok(())
        }
    }

    /// Sleep, waking up early with `StepError::Interrupted` on cancellation
    pub fn sleep(&self, duration: Duration) -> Result<(), StepFailure> {
        self.task.sleep(duration)
    }

    /// Token cancelled together with the task, for async code
    pub fn cancellation_token(&self) -> CancellationToken {
        self.task.token.clone()
    }

    /// Principal the work runs as
    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    /// Name of the worker thread
    pub fn thread_name(&self) -> &str {
        &self.thread_name
    }
}

/// Run `work` for `task` on the current thread.
///
/// Records the thread name, runs as `principal` for the duration of the call
/// and converts panics into failures. Returns `None` without running anything
/// if the task was cancelled before a worker picked it up.
pub(crate) fn run_task<R, F>(
    task: &Arc<BackgroundTask>,
    channel: &Arc<ResultChannel>,
    principal: Principal,
    work: F,
) -> Option<Result<R, StepFailure>>
where
    F: FnOnce(&TaskContext) -> Result<R, StepFailure>,
{
    if task.is_cancelled() {
        tracing::debug!(task = %task.id(), "Task cancelled before it was scheduled");
        task.finish();
        return None;
    }

    let thread_name = task.enter();
    let context = TaskContext {
        task: task.clone(),
        channel: channel.clone(),
        principal: principal.clone(),
        thread_name,
    };

    let outcome = {
        let _guard = identity::impersonate(principal);
        catch_unwind(AssertUnwindSafe(|| work(&context)))
    };

    Some(match outcome {
        Ok(result) => result,
        Err(panic) => {
            let message = panic_message(&*panic);
            tracing::warn!(task = %task.id(), panic = %message, "Step work panicked");
            Err(StepError::Panicked(message).into())
        }
    })
}
