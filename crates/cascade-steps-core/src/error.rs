use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::domain::interruption::FlowInterrupted;

const ANONYMOUS_RESUME_MESSAGE: &str =
    "Resume after a restart not supported for non-blocking synchronous steps";

fn resume_not_supported_message(step: &str) -> String {
    if step.is_empty() {
        return ANONYMOUS_RESUME_MESSAGE.to_string();
    }
    format!(
        "Step `{}` is a non-blocking synchronous step, it doesn't support resume after a restart. \
         You may wrap it within `retry(conditions: [nonresumable()], count: 2) {{...}}`, \
         or in declarative syntax, use the `retries` option to an `agent` directive to resume it.",
        step
    )
}

/// Error kinds reported by step executions
#[derive(Error, Debug, Clone)]
pub enum StepError {
    /// The unit of work failed
    #[error("{0}")]
    Failed(String),

    /// Expected failure whose message is the whole story (printed without detail)
    #[error("{0}")]
    Abort(String),

    /// The worker was interrupted while waiting
    #[error("Interrupted while running step")]
    Interrupted,

    /// The flow was interrupted, carrying a desired result and causes
    #[error("{0}")]
    FlowInterrupted(FlowInterrupted),

    /// The execution cannot survive a restart
    #[error("{}", resume_not_supported_message(.step))]
    ResumeNotSupported {
        /// Registered function name of the step, empty when unknown
        step: String,
    },

    /// Work could not be handed to the worker pool
    #[error("Worker pool unavailable: {0}")]
    PoolUnavailable(String),

    /// The worker pool could not be constructed
    #[error("Worker pool initialization failed: {0}")]
    PoolInitialization(String),

    /// The execution was used outside of its lifecycle
    #[error("Step execution error: {0}")]
    ExecutionError(String),

    /// The unit of work panicked
    #[error("Step panicked: {0}")]
    Panicked(String),

    /// A collaborator could not be found in the step context
    #[error("Context error: {0}")]
    ContextError(String),

    /// Input/output error
    #[error("Input/output error: {0}")]
    IOError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl StepError {
    /// Build an unsupported-resume error for the given step name
    pub fn resume_not_supported(step: impl Into<String>) -> Self {
        StepError::ResumeNotSupported { step: step.into() }
    }
}

impl From<serde_json::Error> for StepError {
    fn from(err: serde_json::Error) -> Self {
        StepError::SerializationError(err.to_string())
    }
}

impl From<std::io::Error> for StepError {
    fn from(err: std::io::Error) -> Self {
        StepError::IOError(err.to_string())
    }
}

impl From<String> for StepError {
    fn from(err: String) -> Self {
        StepError::Failed(err)
    }
}

impl From<&str> for StepError {
    fn from(err: &str) -> Self {
        StepError::Failed(err.to_string())
    }
}

impl From<FlowInterrupted> for StepError {
    fn from(err: FlowInterrupted) -> Self {
        StepError::FlowInterrupted(err)
    }
}

struct FailureInner {
    error: StepError,
    suppressed: Mutex<Vec<StepFailure>>,
}

/// A primary error plus the secondary failures folded into it.
///
/// Clones share the same suppressed list, so a failure that was already
/// delivered can still collect the outcome of a losing race afterwards.
#[derive(Clone)]
pub struct StepFailure {
    inner: Arc<FailureInner>,
}

impl StepFailure {
    /// Wrap an error as a primary failure
    pub fn new(error: StepError) -> Self {
        Self {
            inner: Arc::new(FailureInner {
                error,
                suppressed: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Shorthand for `StepError::Failed`
    pub fn msg(message: impl Into<String>) -> Self {
        Self::new(StepError::Failed(message.into()))
    }

    /// The primary error
    pub fn error(&self) -> &StepError {
        &self.inner.error
    }

    /// Attach a secondary failure. Suppressing a failure into itself is ignored.
    pub fn add_suppressed(&self, other: StepFailure) {
        if self.same_as(&other) {
            tracing::warn!("Refusing to suppress a failure into itself: {}", self);
            return;
        }
        self.inner.suppressed.lock().push(other);
    }

    /// Snapshot of the secondary failures, in the order they were attached
    pub fn suppressed(&self) -> Vec<StepFailure> {
        self.inner.suppressed.lock().clone()
    }

    /// True if both handles refer to the same failure
    pub fn same_as(&self, other: &StepFailure) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// The flow interruption carried by this failure, if any
    pub fn as_flow_interrupted(&self) -> Option<&FlowInterrupted> {
        match &self.inner.error {
            StepError::FlowInterrupted(fi) => Some(fi),
            _ => None,
        }
    }
}

impl fmt::Display for StepFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner.error)
    }
}

impl fmt::Debug for StepFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepFailure")
            .field("error", &self.inner.error)
            .field("suppressed", &*self.inner.suppressed.lock())
            .finish()
    }
}

impl std::error::Error for StepFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.inner.error)
    }
}

impl From<StepError> for StepFailure {
    fn from(err: StepError) -> Self {
        StepFailure::new(err)
    }
}

impl From<FlowInterrupted> for StepFailure {
    fn from(err: FlowInterrupted) -> Self {
        StepFailure::new(StepError::FlowInterrupted(err))
    }
}

impl From<std::io::Error> for StepFailure {
    fn from(err: std::io::Error) -> Self {
        StepFailure::new(err.into())
    }
}

impl From<serde_json::Error> for StepFailure {
    fn from(err: serde_json::Error) -> Self {
        StepFailure::new(err.into())
    }
}

impl From<String> for StepFailure {
    fn from(err: String) -> Self {
        StepFailure::new(err.into())
    }
}

impl From<&str> for StepFailure {
    fn from(err: &str) -> Self {
        StepFailure::new(err.into())
    }
}

/// Result alias used by units of work
pub type StepResult<T> = Result<T, StepFailure>;
