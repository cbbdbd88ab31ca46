//! In-memory run and listener for interruption reporting.

use cascade_steps_core::{InterruptedAction, RunRecord, TaskListener};
use parking_lot::Mutex;

/// Run that keeps its interruption actions in memory
#[derive(Debug, Default)]
pub struct InMemoryRun {
    name: String,
    actions: Mutex<Vec<InterruptedAction>>,
}

impl InMemoryRun {
    /// Run with the given display name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            actions: Mutex::new(Vec::new()),
        }
    }
}

impl RunRecord for InMemoryRun {
    fn display_name(&self) -> String {
        self.name.clone()
    }

    fn interrupted_actions(&self) -> Vec<InterruptedAction> {
        self.actions.lock().clone()
    }

    fn add_interrupted_action(&self, action: InterruptedAction) {
        self.actions.lock().push(action);
    }
}

/// Listener that keeps every printed line
#[derive(Debug, Default)]
pub struct RecordingListener {
    lines: Mutex<Vec<String>>,
}

impl RecordingListener {
    /// Empty listener
    pub fn new() -> Self {
        Self::default()
    }

    /// Lines printed so far
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }
}

impl TaskListener for RecordingListener {
    fn println(&self, line: &str) {
        self.lines.lock().push(line.to_string());
    }
}
