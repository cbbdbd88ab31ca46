/// Worker pool and executor augmentation
pub mod worker_pool;

/// Background task handles and the worker-side context
pub mod task;

/// Executions running one unit of work on the worker pool
pub mod synchronous_non_blocking;

/// Executions alternating background work and nested bodies
pub mod general_non_blocking;

/// Executions running inline on the controlling thread
pub mod synchronous;

/// Closure-based execution constructors
pub mod builders;

/// Active execution registry and bounded status checks
pub mod registry;
