use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use crate::domain::context::StepContext;
use crate::error::{StepError, StepFailure};

type HandlerFn = dyn Fn(&dyn StepContext, StepFailure) -> StepFailure + Send + Sync;

/// Rewrites or wraps failures before they leave a step.
///
/// Runtimes look it up in the step context (see [`FailureHandler::apply`])
/// and bodies receive one through `BodyInvoker::with_context_value`.
#[derive(Clone)]
pub struct FailureHandler {
    handler: Arc<HandlerFn>,
}

impl FailureHandler {
    /// Wrap a handler function
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&dyn StepContext, StepFailure) -> StepFailure + Send + Sync + 'static,
    {
        Self {
            handler: Arc::new(handler),
        }
    }

    /// Run this handler
    pub fn handle(&self, context: &dyn StepContext, failure: StepFailure) -> StepFailure {
        (self.handler)(context, failure)
    }

    /// Run the handler found in `context` against `failure`.
    ///
    /// Without a handler the failure is returned as is. If the handler
    /// panics, the original failure is returned with the panic suppressed.
    pub fn apply(context: &dyn StepContext, failure: StepFailure) -> StepFailure {
        let handler = match context.get::<FailureHandler>() {
            Some(handler) => handler,
            None => return failure,
        };
        let original = failure.clone();
        match catch_unwind(AssertUnwindSafe(|| handler.handle(context, failure))) {
            Ok(rewritten) => rewritten,
            Err(panic) => {
                original.add_suppressed(StepError::Panicked(panic_message(&*panic)).into());
                original
            }
        }
    }

    /// Run `original` then `subsequent`; just `subsequent` if there is no original
    pub fn merge(original: Option<FailureHandler>, subsequent: FailureHandler) -> FailureHandler {
        match original {
            None => subsequent,
            Some(original) => FailureHandler::new(move |context, failure| {
                subsequent.handle(context, original.handle(context, failure))
            }),
        }
    }
}

impl fmt::Debug for FailureHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FailureHandler").finish_non_exhaustive()
    }
}

/// Best effort text of a panic payload
pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
