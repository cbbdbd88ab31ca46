//! Registry of the step executions currently alive in the process.

use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};
use uuid::Uuid;

use crate::application::worker_pool::WorkerPool;
use crate::domain::execution::StepExecution;
use crate::domain::failure_handler::panic_message;

/// Active executions, keyed by an id handed out at registration.
///
/// The controlling runtime registers executions that went asynchronous and
/// removes them once their channel is resolved.
#[derive(Default)]
pub struct ExecutionRegistry {
    executions: DashMap<Uuid, Arc<dyn StepExecution>>,
}

impl ExecutionRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `execution`; returns its id
    pub fn register(&self, execution: Arc<dyn StepExecution>) -> Uuid {
        let id = Uuid::new_v4();
        self.executions.insert(id, execution);
        debug!(execution = %id, "Registered step execution");
        id
    }

    /// Stop tracking an execution
    pub fn remove(&self, id: &Uuid) -> Option<Arc<dyn StepExecution>> {
        self.executions.remove(id).map(|(_, execution)| execution)
    }

    /// Look up an execution
    pub fn get(&self, id: &Uuid) -> Option<Arc<dyn StepExecution>> {
        self.executions.get(id).map(|entry| entry.value().clone())
    }

    /// Number of tracked executions
    pub fn len(&self) -> usize {
        self.executions.len()
    }

    /// True when nothing is tracked
    pub fn is_empty(&self) -> bool {
        self.executions.is_empty()
    }

    /// Drop executions whose result was already delivered
    pub fn prune_completed(&self) -> usize {
        let before = self.executions.len();
        self.executions.retain(|_, execution| execution.channel().is_open());
        before - self.executions.len()
    }

    fn snapshot(&self) -> Vec<(Uuid, Arc<dyn StepExecution>)> {
        self.executions
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect()
    }

    /// Apply `f` to every tracked execution; returns how many were visited
    pub fn apply_all<F>(&self, mut f: F) -> usize
    where
        F: FnMut(&dyn StepExecution),
    {
        let executions = self.snapshot();
        for (_, execution) in &executions {
            f(execution.as_ref());
        }
        executions.len()
    }

    /// Apply `f` to the tracked executions of type `T` only
    pub fn apply_all_of<T, F>(&self, mut f: F) -> usize
    where
        T: StepExecution,
        F: FnMut(&T),
    {
        let mut visited = 0;
        self.apply_all(|execution| {
            if let Some(typed) = execution.as_any().downcast_ref::<T>() {
                f(typed);
                visited += 1;
            }
        });
        visited
    }

    /// True if any tracked execution must finish before a restart
    pub fn blocks_restart(&self) -> bool {
        self.executions
            .iter()
            .any(|entry| entry.value().blocks_restart())
    }

    /// Status of every tracked execution, each computed within the pool's
    /// status timeout
    pub fn statuses(&self, pool: &WorkerPool) -> Vec<(Uuid, Option<String>)> {
        let timeout = pool.config().status_timeout();
        let statuses: Vec<_> = self
            .snapshot()
            .into_iter()
            .map(|(id, execution)| (id, status_bounded(execution, pool, timeout)))
            .collect();
        info!(count = statuses.len(), "Collected step execution statuses");
        statuses
    }
}

/// Status reported by a worker, or the panic message if the check panicked
type StatusOutcome = Result<Option<String>, String>;

#[derive(Default)]
struct StatusSlot {
    outcome: Mutex<Option<StatusOutcome>>,
    filled: Condvar,
}

impl StatusSlot {
    fn fill(&self, outcome: StatusOutcome) {
        *self.outcome.lock() = Some(outcome);
        self.filled.notify_all();
    }

    fn wait(&self, timeout: Duration) -> Option<StatusOutcome> {
        let deadline = Instant::now() + timeout;
        let mut outcome = self.outcome.lock();
        while outcome.is_none() {
            if self.filled.wait_until(&mut outcome, deadline).timed_out() {
                break;
            }
        }
        outcome.take()
    }
}

/// Like [`StepExecution::status`], but computed on `pool` and abandoned after
/// `timeout`. A timeout or panic yields a description of what went wrong
/// instead of the status.
pub fn status_bounded(
    execution: Arc<dyn StepExecution>,
    pool: &WorkerPool,
    timeout: Duration,
) -> Option<String> {
    let slot = Arc::new(StatusSlot::default());
    let worker_slot = slot.clone();
    let submitted = pool.submit(Box::new(move || {
        let status = catch_unwind(AssertUnwindSafe(|| execution.status()));
        worker_slot.fill(status.map_err(|panic| panic_message(&*panic)));
    }));
    if let Err(e) = submitted {
        debug!(error = %e, "Could not schedule status check");
        return Some(e.to_string());
    }

    match slot.wait(timeout) {
        Some(Ok(status)) => status,
        Some(Err(panic)) => {
            debug!(panic = %panic, "Status check panicked");
            Some(format!("status check failed: {}", panic))
        }
        None => {
            debug!(?timeout, "Status check timed out");
            Some(format!("status check timed out after {:?}", timeout))
        }
    }
}
