use thiserror::Error;

/// Crate-wide error type for the control-state protocol.
///
/// `StoreUnavailable` is deliberately distinct from "flag not set": a caller
/// that cannot reach the store must never behave as if cancellation had been
/// requested.
#[derive(Debug, Error)]
pub enum ControlError {
    /// The control store backend cannot be reached or its contents are
    /// corrupted.
    #[error("control store unavailable: {0}")]
    StoreUnavailable(String),

    /// A lifecycle transition that the status state machine does not permit.
    #[error("invalid status transition from {from} on {event}")]
    InvalidTransition { from: String, event: String },

    /// Configuration could not be loaded or validated.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A work item's own execution failed.
    #[error("work item error: {0}")]
    WorkItem(String),
}

pub type Result<T> = std::result::Result<T, ControlError>;
