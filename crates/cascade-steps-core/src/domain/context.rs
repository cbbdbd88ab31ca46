use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::{Any, TypeId};
use std::sync::Arc;

use crate::domain::body::BodyInvoker;
use crate::error::{StepError, StepFailure};

/// Sink the controlling runtime hands to a step execution.
///
/// The runtime owns this object; the core only reports through it and looks
/// up ambient collaborators by type.
pub trait StepContext: Send + Sync {
    /// The step completed with a value
    fn on_success(&self, value: Value);

    /// The step failed
    fn on_failure(&self, failure: StepFailure);

    /// Look up a collaborator registered under `key`
    fn lookup(&self, _key: TypeId) -> Option<Arc<dyn Any + Send + Sync>> {
        None
    }

    /// Prepare the invocation of the step's nested body
    fn new_body_invoker(&self) -> Result<Box<dyn BodyInvoker>, StepFailure> {
        Err(StepError::ContextError("this context does not support nested bodies".to_string()).into())
    }
}

impl<'a> dyn StepContext + 'a {
    /// Typed lookup
    pub fn get<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.lookup(TypeId::of::<T>())
            .and_then(|found| found.downcast::<T>().ok())
    }
}

/// Registration data of a step, as found in its context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepDescriptor {
    /// Name the step is called by in a pipeline script
    pub function_name: String,
    /// Human readable name
    pub display_name: String,
}

impl StepDescriptor {
    /// Create a descriptor
    pub fn new(function_name: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            function_name: function_name.into(),
            display_name: display_name.into(),
        }
    }
}

/// Function name of the step owning `context`, or an empty string
pub fn step_function_name(context: &dyn StepContext) -> String {
    match context.get::<StepDescriptor>() {
        Some(descriptor) => descriptor.function_name.clone(),
        None => {
            tracing::debug!("No step descriptor found in context");
            String::new()
        }
    }
}
