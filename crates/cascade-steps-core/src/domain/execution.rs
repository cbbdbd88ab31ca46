use std::any::Any;
use std::sync::Arc;

use crate::domain::channel::ResultChannel;
use crate::domain::context::StepContext;
use crate::error::StepFailure;

/// One in-flight invocation of a step.
///
/// Every implementation resolves its [`ResultChannel`] exactly once over its
/// lifetime, whether or not it was asked to stop.
pub trait StepExecution: Send + Sync + 'static {
    /// The channel this execution reports through
    fn channel(&self) -> &Arc<ResultChannel>;

    /// The runtime context behind the channel
    fn context(&self) -> &Arc<dyn StepContext> {
        self.channel().context()
    }

    /// Start the execution from the controlling thread.
    ///
    /// `Ok(true)` means the result was already delivered; `Ok(false)` means
    /// the work went asynchronous and the channel will be resolved later. An
    /// error means the step completed abnormally before going asynchronous.
    fn start(&self) -> Result<bool, StepFailure>;

    /// Ask a running step to abort. May be called more than once.
    ///
    /// The default reports `cause` through the channel right away.
    fn stop(&self, cause: StepFailure) -> Result<(), StepFailure> {
        self.channel().fail(cause);
        Ok(())
    }

    /// Called when the execution is brought back after a restart.
    /// Errors are reported through the channel.
    fn on_resume(&self) {}

    /// Short lowercase phrase describing what the step is doing
    fn status(&self) -> Option<String> {
        None
    }

    /// True while the step is doing background work that cannot survive a restart
    fn blocks_restart(&self) -> bool {
        false
    }

    /// Downcast support
    fn as_any(&self) -> &dyn Any;
}
