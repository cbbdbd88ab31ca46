use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::domain::context::StepContext;
use crate::error::StepFailure;

/// One-shot result sink in front of a [`StepContext`].
///
/// Whoever resolves the channel first reaches the context; every later call
/// returns `false` and is dropped here.
pub struct ResultChannel {
    context: Arc<dyn StepContext>,
    resolved: AtomicBool,
}

impl ResultChannel {
    /// Guard the given context
    pub fn new(context: Arc<dyn StepContext>) -> Self {
        Self {
            context,
            resolved: AtomicBool::new(false),
        }
    }

    /// The guarded context, for lookups
    pub fn context(&self) -> &Arc<dyn StepContext> {
        &self.context
    }

    /// True until a result has been delivered
    pub fn is_open(&self) -> bool {
        !self.resolved.load(Ordering::Acquire)
    }

    fn claim(&self) -> bool {
        self.resolved
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Deliver a value. Returns whether this call resolved the channel.
    pub fn succeed(&self, value: Value) -> bool {
        if !self.claim() {
            tracing::debug!("Result channel already resolved, dropping success");
            return false;
        }
        self.context.on_success(value);
        true
    }

    /// Deliver a failure. Returns whether this call resolved the channel.
    pub fn fail(&self, failure: StepFailure) -> bool {
        if !self.claim() {
            tracing::debug!(error = %failure, "Result channel already resolved, dropping failure");
            return false;
        }
        self.context.on_failure(failure);
        true
    }
}

impl fmt::Debug for ResultChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultChannel")
            .field("open", &self.is_open())
            .finish()
    }
}
