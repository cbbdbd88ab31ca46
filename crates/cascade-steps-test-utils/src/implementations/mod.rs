//! Test implementations (fakes) of the step runtime's collaborators.
//!
//! These stand in for the controlling runtime: they record what executions
//! report and let tests drive nested bodies and worker timing by hand.

pub mod augmentors;
pub mod gate;
pub mod recording_context;
pub mod run_record;
pub mod scripted_body;

// Re-export all implementations for easy access
pub use augmentors::*;
pub use gate::*;
pub use recording_context::*;
pub use run_record::*;
pub use scripted_body::*;
