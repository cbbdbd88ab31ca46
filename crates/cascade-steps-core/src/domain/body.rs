//! Nested body invocation.
//!
//! A block-scoped step asks its context for a [`BodyInvoker`], optionally
//! adds context for the body, and starts it with a [`BodyExecutionCallback`]
//! the runtime calls once the body is done.

use serde_json::Value;
use std::any::{Any, TypeId};
use std::sync::Arc;

use crate::domain::channel::ResultChannel;
use crate::error::StepFailure;

/// Receives the outcome of a nested body
pub trait BodyExecutionCallback: Send + Sync {
    /// The body started running
    fn on_start(&self) {}

    /// The body completed with a value
    fn on_success(&self, value: Value);

    /// The body failed
    fn on_failure(&self, failure: StepFailure);
}

/// Launches a nested body; provided by the controlling runtime
pub trait BodyInvoker: Send {
    /// Make `value` available to the body's context under `key`
    fn with_context(&mut self, key: TypeId, value: Arc<dyn Any + Send + Sync>);

    /// Start the body. The callback is invoked exactly once when it finishes.
    fn start(self: Box<Self>, callback: Arc<dyn BodyExecutionCallback>) -> Result<(), StepFailure>;
}

impl<'a> dyn BodyInvoker + 'a {
    /// Typed variant of [`BodyInvoker::with_context`]
    pub fn with_context_value<T: Any + Send + Sync>(&mut self, value: T) {
        self.with_context(TypeId::of::<T>(), Arc::new(value));
    }
}

/// Callback that hands the body's outcome straight to the step's channel
pub struct ForwardingCallback {
    channel: Arc<ResultChannel>,
}

impl ForwardingCallback {
    /// Forward to `channel`
    pub fn new(channel: Arc<ResultChannel>) -> Arc<dyn BodyExecutionCallback> {
        Arc::new(Self { channel })
    }
}

impl BodyExecutionCallback for ForwardingCallback {
    fn on_success(&self, value: Value) {
        self.channel.succeed(value);
    }

    fn on_failure(&self, failure: StepFailure) {
        self.channel.fail(failure);
    }
}
