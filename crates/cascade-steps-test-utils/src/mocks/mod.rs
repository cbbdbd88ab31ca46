//! Mock implementations of the step runtime's collaborator traits.
//!
//! Use these where a test needs to assert on exact calls rather than
//! recorded state.

use cascade_steps_core::{
    BodyInvoker, Job, StepContext, StepError, StepFailure, TaskExecutor,
    TaskListener,
};
use mockall::mock;
use serde_json::Value;
use std::any::{Any, TypeId};
use std::sync::Arc;

mock! {
    /// Mock step context
    pub StepContext {}

    impl StepContext for StepContext {
        fn on_success(&self, value: Value);
        fn on_failure(&self, failure: StepFailure);
        fn lookup(&self, key: TypeId) -> Option<Arc<dyn Any + Send + Sync>>;
        fn new_body_invoker(&self) -> Result<Box<dyn BodyInvoker>, StepFailure>;
    }
}

mock! {
    /// Mock task listener
    pub TaskListener {}

    impl TaskListener for TaskListener {
        fn println(&self, line: &str);
    }
}

mock! {
    /// Mock executor
    pub TaskExecutor {}

    impl TaskExecutor for TaskExecutor {
        fn submit(&self, job: Job) -> Result<(), StepError>;
        fn describe(&self) -> String;
    }
}
