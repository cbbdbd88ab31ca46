//! Step context that records every outcome.

use cascade_steps_core::{
    BodyInvoker, FailureHandler, StepContext, StepDescriptor, StepFailure,
};
use parking_lot::{Condvar, Mutex};
use serde_json::Value;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::scripted_body::{BodyDriver, ScriptedBodyInvoker};

/// What an execution reported
#[derive(Debug, Clone)]
pub enum Outcome {
    /// `on_success` was called
    Success(Value),
    /// `on_failure` was called
    Failure(StepFailure),
}

impl Outcome {
    /// The value, panicking on a failure
    pub fn unwrap_success(self) -> Value {
        match self {
            Outcome::Success(value) => value,
            Outcome::Failure(failure) => panic!("expected success, got failure: {}", failure),
        }
    }

    /// The failure, panicking on a success
    pub fn unwrap_failure(self) -> StepFailure {
        match self {
            Outcome::Failure(failure) => failure,
            Outcome::Success(value) => panic!("expected failure, got success: {}", value),
        }
    }
}

/// In-memory [`StepContext`].
///
/// Failures pass through the registered [`FailureHandler`] before being
/// recorded, like a real runtime would do.
#[derive(Default)]
pub struct RecordingStepContext {
    outcomes: Mutex<Vec<Outcome>>,
    reported: Condvar,
    values: Mutex<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
    bodies: BodyDriver,
}

impl RecordingStepContext {
    /// Empty context
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Context of a step registered under `function_name`
    pub fn for_step(function_name: &str) -> Arc<Self> {
        let context = Self::default();
        context.insert(StepDescriptor::new(function_name, function_name));
        Arc::new(context)
    }

    /// Make `value` available through `StepContext::get`
    pub fn insert<T: Any + Send + Sync>(&self, value: T) {
        self.values.lock().insert(TypeId::of::<T>(), Arc::new(value));
    }

    /// Everything reported so far, in order
    pub fn outcomes(&self) -> Vec<Outcome> {
        self.outcomes.lock().clone()
    }

    /// Number of reports so far
    pub fn outcome_count(&self) -> usize {
        self.outcomes.lock().len()
    }

    /// Wait until something was reported; returns the first report
    pub fn wait_for_outcome(&self, timeout: Duration) -> Option<Outcome> {
        let deadline = Instant::now() + timeout;
        let mut outcomes = self.outcomes.lock();
        while outcomes.is_empty() {
            if self.reported.wait_until(&mut outcomes, deadline).timed_out() {
                break;
            }
        }
        outcomes.first().cloned()
    }

    /// Bodies started through this context
    pub fn bodies(&self) -> &BodyDriver {
        &self.bodies
    }

    fn record(&self, outcome: Outcome) {
        tracing::debug!(?outcome, "Step context received outcome");
        self.outcomes.lock().push(outcome);
        self.reported.notify_all();
    }
}

impl StepContext for RecordingStepContext {
    fn on_success(&self, value: Value) {
        self.record(Outcome::Success(value));
    }

    fn on_failure(&self, failure: StepFailure) {
        let failure = FailureHandler::apply(self, failure);
        self.record(Outcome::Failure(failure));
    }

    fn lookup(&self, key: TypeId) -> Option<Arc<dyn Any + Send + Sync>> {
        self.values.lock().get(&key).cloned()
    }

    fn new_body_invoker(&self) -> Result<Box<dyn BodyInvoker>, StepFailure> {
        Ok(Box::new(ScriptedBodyInvoker::new(self.bodies.clone())))
    }
}
