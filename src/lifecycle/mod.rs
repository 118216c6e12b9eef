// Lifecycle module for the run-scoped control protocol
//
// Provides the finite status model for a run and the store-backed state
// machine that keeps the shared status synchronized with the worker's
// run-start and run-end control points.

pub mod events;
pub mod machine;
pub mod states;

// Re-export main types for convenient access
pub use events::RunEvent;
pub use machine::{target_status, RunLifecycle};
pub use states::RunStatus;
