//! Shorthand constructors for step executions.
//!
//! Steps that only need a closure do not have to define an execution type of
//! their own.

use parking_lot::Mutex;
use serde_json::Value;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::application::synchronous::SynchronousExecution;
use crate::application::synchronous_non_blocking::SynchronousNonBlockingExecution;
use crate::application::task::TaskContext;
use crate::application::worker_pool::WorkerPool;
use crate::domain::body::{BodyInvoker, ForwardingCallback};
use crate::domain::channel::ResultChannel;
use crate::domain::context::StepContext;
use crate::domain::execution::StepExecution;
use crate::error::{StepError, StepFailure, StepResult};

/// Body of a block step: prepares the invoker before the body is launched
pub type BlockBody = Box<dyn FnOnce(&dyn StepContext, &mut dyn BodyInvoker) -> StepResult<()> + Send + 'static>;

/// Quick step whose body runs on the controlling thread
pub fn synchronous<F>(context: Arc<dyn StepContext>, body: F) -> SynchronousExecution
where
    F: FnOnce(&TaskContext) -> StepResult<Value> + Send + 'static,
{
    SynchronousExecution::new(context, body)
}

/// Step whose body may block; it runs on `pool`
pub fn synchronous_non_blocking<F>(
    context: Arc<dyn StepContext>,
    pool: WorkerPool,
    body: F,
) -> SynchronousNonBlockingExecution
where
    F: FnOnce(&TaskContext) -> StepResult<Value> + Send + 'static,
{
    SynchronousNonBlockingExecution::new(context, pool, body)
}

/// Step that runs its nested body once, after `body` configured the
/// invoker. The body's outcome becomes the step's outcome.
pub fn block<F>(context: Arc<dyn StepContext>, body: F) -> BlockExecution
where
    F: FnOnce(&dyn StepContext, &mut dyn BodyInvoker) -> StepResult<()> + Send + 'static,
{
    BlockExecution {
        channel: Arc::new(ResultChannel::new(context)),
        body: Mutex::new(Some(Box::new(body))),
    }
}

/// Execution returned by [`block`]
pub struct BlockExecution {
    channel: Arc<ResultChannel>,
    body: Mutex<Option<BlockBody>>,
}

impl StepExecution for BlockExecution {
    fn channel(&self) -> &Arc<ResultChannel> {
        &self.channel
    }

    fn start(&self) -> Result<bool, StepFailure> {
        let body = self
            .body
            .lock()
            .take()
            .ok_or_else(|| StepError::ExecutionError("execution was already started".to_string()))?;

        let context = self.channel.context().clone();
        let mut invoker = context.new_body_invoker()?;
        body(context.as_ref(), invoker.as_mut())?;
        invoker.start(ForwardingCallback::new(self.channel.clone()))?;
        Ok(false)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl fmt::Debug for BlockExecution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockExecution")
            .field("channel", &self.channel)
            .finish()
    }
}
