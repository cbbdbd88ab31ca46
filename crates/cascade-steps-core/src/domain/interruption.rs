//! Flow interruption modelling.
//!
//! A [`FlowInterrupted`] carries the result the flow should end with and the
//! causes of the interruption. Reporting code calls [`FlowInterrupted::handle`]
//! to record causes against a run exactly once and print them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use crate::error::{StepError, StepFailure};

/// Terminal result of a run, ordered from best to worst
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RunResult {
    /// Completed successfully
    Success,
    /// Completed with warnings
    Unstable,
    /// Failed
    Failure,
    /// Never built
    NotBuilt,
    /// Aborted
    Aborted,
}

impl fmt::Display for RunResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunResult::Success => "SUCCESS",
            RunResult::Unstable => "UNSTABLE",
            RunResult::Failure => "FAILURE",
            RunResult::NotBuilt => "NOT_BUILT",
            RunResult::Aborted => "ABORTED",
        };
        f.write_str(name)
    }
}

/// Why a flow was interrupted
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CauseOfInterruption {
    /// A user asked for the interruption
    UserInterruption {
        /// Name of the user
        user: String,
    },
    /// An error triggered the interruption
    ExceptionCause {
        /// Message of the error
        message: String,
    },
    /// A newer run superseded this one
    Superseded {
        /// Display name of the superseding run
        by_run: String,
    },
    /// Anything else
    Other {
        /// Free form description
        description: String,
    },
}

impl CauseOfInterruption {
    /// Cause derived from a failure
    pub fn from_failure(failure: &StepFailure) -> Self {
        CauseOfInterruption::ExceptionCause {
            message: failure.to_string(),
        }
    }

    /// One line description
    pub fn short_description(&self) -> String {
        match self {
            CauseOfInterruption::UserInterruption { user } => format!("Aborted by {}", user),
            CauseOfInterruption::ExceptionCause { message } => format!("Exception: {}", message),
            CauseOfInterruption::Superseded { by_run } => format!("Superseded by {}", by_run),
            CauseOfInterruption::Other { description } => description.clone(),
        }
    }

    /// Print the cause to a listener
    pub fn print(&self, listener: &dyn TaskListener) {
        listener.println(&self.short_description());
    }
}

/// Sink for human readable run output
pub trait TaskListener: Send + Sync {
    /// Print one line
    fn println(&self, line: &str);
}

/// Causes recorded against a run by one `handle` call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterruptedAction {
    /// Causes recorded
    pub causes: Vec<CauseOfInterruption>,
    /// When they were recorded
    pub recorded_at: DateTime<Utc>,
}

impl InterruptedAction {
    /// Create an action stamped now
    pub fn new(causes: Vec<CauseOfInterruption>) -> Self {
        Self {
            causes,
            recorded_at: Utc::now(),
        }
    }
}

/// The run a flow interruption is reported against
pub trait RunRecord: Send + Sync {
    /// Display name of the run
    fn display_name(&self) -> String;

    /// Interruption actions already recorded
    fn interrupted_actions(&self) -> Vec<InterruptedAction>;

    /// Record a new interruption action
    fn add_interrupted_action(&self, action: InterruptedAction);
}

fn default_actual_interruption() -> bool {
    true
}

/// The flow was aborted from the inside.
///
/// `actual_interruption` distinguishes a genuine user or system interruption
/// from a control-flow device that merely carries a result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowInterrupted {
    result: RunResult,
    causes: Vec<CauseOfInterruption>,
    #[serde(default = "default_actual_interruption")]
    actual_interruption: bool,
    #[serde(skip)]
    cause: Option<StepFailure>,
}

impl FlowInterrupted {
    /// A genuine interruption
    pub fn new(result: RunResult, causes: Vec<CauseOfInterruption>) -> Self {
        Self::with_actual_interruption(result, true, causes)
    }

    /// An interruption with an explicit `actual_interruption` flag
    pub fn with_actual_interruption(
        result: RunResult,
        actual_interruption: bool,
        causes: Vec<CauseOfInterruption>,
    ) -> Self {
        Self {
            result,
            causes,
            actual_interruption,
            cause: None,
        }
    }

    /// Attach the failure that led to this interruption
    pub fn with_cause(mut self, cause: StepFailure) -> Self {
        self.cause = Some(cause);
        self
    }

    /// Desired result of the flow
    pub fn result(&self) -> RunResult {
        self.result
    }

    /// Causes, in the order given
    pub fn causes(&self) -> &[CauseOfInterruption] {
        &self.causes
    }

    /// Underlying failure, if any
    pub fn cause(&self) -> Option<&StepFailure> {
        self.cause.as_ref()
    }

    /// True for a genuine interruption rather than a result carrier
    pub fn is_actual_interruption(&self) -> bool {
        self.actual_interruption
    }

    /// Change the `actual_interruption` flag
    pub fn set_actual_interruption(&mut self, actual_interruption: bool) {
        self.actual_interruption = actual_interruption;
    }

    /// Short descriptions of all causes joined by `", "`
    pub fn message(&self) -> String {
        self.causes
            .iter()
            .map(CauseOfInterruption::short_description)
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Report this interruption against a run.
    ///
    /// Causes already recorded on the run are skipped; new ones are recorded
    /// as one action and printed. The underlying cause, if any, is printed
    /// afterwards.
    pub fn handle(&self, run: &dyn RunRecord, listener: &dyn TaskListener) {
        let bound: HashSet<CauseOfInterruption> = run
            .interrupted_actions()
            .into_iter()
            .flat_map(|action| action.causes)
            .collect();

        let mut seen = HashSet::new();
        let diff: Vec<CauseOfInterruption> = self
            .causes
            .iter()
            .filter(|cause| !bound.contains(*cause) && seen.insert((*cause).clone()))
            .cloned()
            .collect();

        if !diff.is_empty() {
            tracing::debug!(
                run = %run.display_name(),
                count = diff.len(),
                "Recording causes of interruption"
            );
            for cause in &diff {
                cause.print(listener);
            }
            run.add_interrupted_action(InterruptedAction::new(diff));
        }

        if let Some(cause) = &self.cause {
            print_failure(cause, run, listener);
        }
    }
}

impl fmt::Display for FlowInterrupted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl StepFailure {
    /// Report this failure against a run.
    ///
    /// Flow interruptions are handled as such; suppressed failures are printed
    /// after the primary one.
    pub fn handle(&self, run: &dyn RunRecord, listener: &dyn TaskListener) {
        match self.error() {
            StepError::FlowInterrupted(fi) => {
                fi.handle(run, listener);
                for suppressed in self.suppressed() {
                    print_failure(&suppressed, run, listener);
                }
            }
            _ => print_failure(self, run, listener),
        }
    }
}

fn print_failure(failure: &StepFailure, run: &dyn RunRecord, listener: &dyn TaskListener) {
    match failure.error() {
        StepError::Abort(message) => listener.println(message),
        StepError::FlowInterrupted(_) => failure.handle(run, listener),
        other => {
            listener.println(&format!("{}: {}", failure_kind(other), other));
            for suppressed in failure.suppressed() {
                listener.println(&format!("\tSuppressed: {}", suppressed));
            }
        }
    }
}

fn failure_kind(error: &StepError) -> &'static str {
    match error {
        StepError::Failed(_) => "Failed",
        StepError::Abort(_) => "Abort",
        StepError::Interrupted => "Interrupted",
        StepError::FlowInterrupted(_) => "FlowInterrupted",
        StepError::ResumeNotSupported { .. } => "ResumeNotSupported",
        StepError::PoolUnavailable(_) => "PoolUnavailable",
        StepError::PoolInitialization(_) => "PoolInitialization",
        StepError::ExecutionError(_) => "ExecutionError",
        StepError::Panicked(_) => "Panicked",
        StepError::ContextError(_) => "ContextError",
        StepError::IOError(_) => "IOError",
        StepError::SerializationError(_) => "SerializationError",
    }
}
