//!
//! Cascade Steps Core - non-blocking step execution for the Cascade Platform
//!
//! A single controlling thread interprets a flow and must never block. This
//! crate lets it hand long-running step work to a shared worker pool, stop
//! that work cooperatively, and receive exactly one result per step through a
//! [`ResultChannel`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Domain layer - step contract, channels, identity and interruption causes
pub mod domain;

/// Application layer - worker pool and concrete step executions
pub mod application;

/// Worker pool configuration
pub mod config;

/// Error types
pub mod error;

pub use config::PoolConfig;
pub use error::{StepError, StepFailure, StepResult};

pub use domain::body::{BodyExecutionCallback, BodyInvoker, ForwardingCallback};
pub use domain::channel::ResultChannel;
pub use domain::context::{step_function_name, StepContext, StepDescriptor};
pub use domain::execution::StepExecution;
pub use domain::failure_handler::FailureHandler;
pub use domain::identity::{impersonate, Principal, PrincipalGuard};
pub use domain::interruption::{
    CauseOfInterruption, FlowInterrupted, InterruptedAction, RunRecord, RunResult, TaskListener,
};

pub use application::builders::{block, synchronous, synchronous_non_blocking, BlockExecution};
pub use application::general_non_blocking::{
    GeneralHandle, GeneralNonBlockingExecution, GeneralPhase, GeneralSnapshot, GeneralStep, TailCall,
};
pub use application::registry::{status_bounded, ExecutionRegistry};
pub use application::synchronous::SynchronousExecution;
pub use application::synchronous_non_blocking::{SyncPhase, SynchronousNonBlockingExecution};
pub use application::task::{BackgroundTask, TaskContext};
pub use application::worker_pool::{
    ExecutorAugmentor, Job, RuntimeExecutor, TaskExecutor, WorkerPool, WorkerPoolBuilder,
};
