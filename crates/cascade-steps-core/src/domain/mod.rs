/// Step runtime context and descriptors
pub mod context;

/// One-shot result channel
pub mod channel;

/// The step execution contract
pub mod execution;

/// Nested body invocation
pub mod body;

/// Failure rewriting handlers
pub mod failure_handler;

/// Caller identity propagation
pub mod identity;

/// Flow interruption and causes
pub mod interruption;
