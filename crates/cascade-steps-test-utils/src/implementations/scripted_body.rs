//! Nested body invoker whose bodies are completed by the test.

use cascade_steps_core::{BodyExecutionCallback, BodyInvoker, StepFailure};
use parking_lot::{Condvar, Mutex};
use serde_json::Value;
use std::any::{Any, TypeId};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// How started bodies behave
#[derive(Debug, Clone, Default)]
pub enum BodyScript {
    /// Queue the body until the test completes it
    #[default]
    Manual,
    /// Complete with this value as soon as the body starts
    Succeed(Value),
    /// Fail with this failure as soon as the body starts
    Fail(StepFailure),
}

/// A body that was started and waits for the test to finish it
pub struct StartedBody {
    callback: Arc<dyn BodyExecutionCallback>,
    context: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl StartedBody {
    /// Finish the body successfully
    pub fn succeed(self, value: Value) {
        self.callback.on_success(value);
    }

    /// Finish the body with a failure
    pub fn fail(self, failure: StepFailure) {
        self.callback.on_failure(failure);
    }

    /// Context value the step made available to its body
    pub fn context_value<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.context
            .get(&TypeId::of::<T>())
            .cloned()
            .and_then(|value| value.downcast::<T>().ok())
    }
}

#[derive(Default)]
struct DriverState {
    script: BodyScript,
    pending: VecDeque<StartedBody>,
    started: usize,
}

/// Shared view of the bodies started by one context
#[derive(Clone, Default)]
pub struct BodyDriver {
    state: Arc<Mutex<DriverState>>,
    started: Arc<Condvar>,
}

impl BodyDriver {
    /// Change how bodies started from now on behave
    pub fn set_script(&self, script: BodyScript) {
        self.state.lock().script = script;
    }

    /// Total number of bodies started
    pub fn started_count(&self) -> usize {
        self.state.lock().started
    }

    /// Wait for a manually scripted body to start and take it
    pub fn wait_for_body(&self, timeout: Duration) -> Option<StartedBody> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if let Some(body) = state.pending.pop_front() {
                return Some(body);
            }
            if self.started.wait_until(&mut state, deadline).timed_out() {
                return state.pending.pop_front();
            }
        }
    }
}

/// [`BodyInvoker`] handed out by `RecordingStepContext`
pub struct ScriptedBodyInvoker {
    driver: BodyDriver,
    context: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl ScriptedBodyInvoker {
    /// Invoker reporting to `driver`
    pub fn new(driver: BodyDriver) -> Self {
        Self {
            driver,
            context: HashMap::new(),
        }
    }
}

impl BodyInvoker for ScriptedBodyInvoker {
    fn with_context(&mut self, key: TypeId, value: Arc<dyn Any + Send + Sync>) {
        self.context.insert(key, value);
    }

    fn start(self: Box<Self>, callback: Arc<dyn BodyExecutionCallback>) -> Result<(), StepFailure> {
        callback.on_start();
        let script = {
            let mut state = self.driver.state.lock();
            state.started += 1;
            state.script.clone()
        };

        match script {
            BodyScript::Manual => {
                let Self { driver, context } = *self;
                driver.state.lock().pending.push_back(StartedBody { callback, context });
                driver.started.notify_all();
            }
            // Completed outside the lock: the callback may start further bodies
            BodyScript::Succeed(value) => callback.on_success(value),
            BodyScript::Fail(failure) => callback.on_failure(failure),
        }
        Ok(())
    }
}
