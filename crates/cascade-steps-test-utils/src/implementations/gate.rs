//! Latch that holds background work at a known point.

use cascade_steps_core::{StepResult, TaskContext};
use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

const POLL: Duration = Duration::from_millis(10);

#[derive(Default)]
struct GateState {
    entered: usize,
    open: bool,
}

/// Blocks worker code until the test opens it.
///
/// Waiting workers still notice cancellation, so a stopped step leaves the
/// gate with `StepError::Interrupted`.
#[derive(Default)]
pub struct Gate {
    state: Mutex<GateState>,
    changed: Condvar,
}

impl Gate {
    /// Closed gate
    pub fn new() -> Self {
        Self::default()
    }

    /// Called from worker code: wait until the gate opens
    pub fn pass(&self, ctx: &TaskContext) -> StepResult<()> {
        let mut state = self.state.lock();
        state.entered += 1;
        self.changed.notify_all();
        while !state.open {
            ctx.check_cancelled()?;
            self.changed.wait_for(&mut state, POLL);
        }
        Ok(())
    }

    /// Let every current and future worker through
    pub fn open(&self) {
        self.state.lock().open = true;
        self.changed.notify_all();
    }

    /// Wait until `count` workers reached the gate in total
    pub fn wait_entered(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while state.entered < count {
            if self.changed.wait_until(&mut state, deadline).timed_out() {
                return state.entered >= count;
            }
        }
        true
    }
}
