//! Step execution that runs its body inline on the calling thread.

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use serde_json::Value;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::application::task::{run_task, BackgroundTask, TaskContext};
use crate::domain::channel::ResultChannel;
use crate::domain::context::StepContext;
use crate::domain::execution::StepExecution;
use crate::domain::identity::Principal;
use crate::error::{StepError, StepFailure, StepResult};

type Body = Box<dyn FnOnce(&TaskContext) -> StepResult<Value> + Send + 'static>;

/// Runs a quick body on the controlling thread; `start` returns `Ok(true)`.
///
/// Only for work that cannot block. `stop` interrupts a body that is still
/// running; the body sees it through [`TaskContext::is_cancelled`] or an
/// interrupted [`TaskContext::sleep`].
pub struct SynchronousExecution {
    channel: Arc<ResultChannel>,
    body: Mutex<Option<Body>>,
    executing: Mutex<Option<Arc<BackgroundTask>>>,
    stop_cause: OnceCell<StepFailure>,
}

impl SynchronousExecution {
    /// Execution of `body` for the step owning `context`
    pub fn new<F>(context: Arc<dyn StepContext>, body: F) -> Self
    where
        F: FnOnce(&TaskContext) -> StepResult<Value> + Send + 'static,
    {
        Self {
            channel: Arc::new(ResultChannel::new(context)),
            body: Mutex::new(Some(Box::new(body))),
            executing: Mutex::new(None),
            stop_cause: OnceCell::new(),
        }
    }
}

impl StepExecution for SynchronousExecution {
    fn channel(&self) -> &Arc<ResultChannel> {
        &self.channel
    }

    fn start(&self) -> Result<bool, StepFailure> {
        let body = self
            .body
            .lock()
            .take()
            .ok_or_else(|| StepError::ExecutionError("execution was already started".to_string()))?;

        let task = BackgroundTask::new();
        if self.stop_cause.get().is_some() {
            task.cancel();
        }
        *self.executing.lock() = Some(task.clone());

        let outcome = run_task(&task, &self.channel, Principal::current(), body);
        task.finish();
        self.executing.lock().take();

        match outcome {
            Some(Ok(value)) => {
                self.channel.succeed(value);
            }
            Some(Err(failure)) => match self.stop_cause.get() {
                Some(cause) => {
                    cause.add_suppressed(failure);
                    self.channel.fail(cause.clone());
                }
                None => {
                    self.channel.fail(failure);
                }
            },
            None => {
                if let Some(cause) = self.stop_cause.get() {
                    self.channel.fail(cause.clone());
                }
            }
        }
        Ok(true)
    }

    fn stop(&self, cause: StepFailure) -> Result<(), StepFailure> {
        self.stop_cause.get_or_init(|| cause);
        if let Some(task) = self.executing.lock().as_ref() {
            debug!(task = %task.id(), "Interrupting synchronous step body");
            task.cancel();
        }
        Ok(())
    }

    fn status(&self) -> Option<String> {
        self.executing
            .lock()
            .as_ref()
            .and_then(|task| task.thread_name())
            .map(|thread| format!("running in thread: {}", thread))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl fmt::Debug for SynchronousExecution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SynchronousExecution")
            .field("channel", &self.channel)
            .field("executing", &*self.executing.lock())
            .finish()
    }
}
