use serde::{Deserialize, Serialize};
use std::fmt;

/// Run lifecycle states.
///
/// Pause and cancellation are modeled as orthogonal flags layered on top of
/// `Running`, not as separate states: they are requests observed at discrete
/// control points, and an item already in flight always runs to completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Run created by the orchestrator, worker not yet started
    Pending,
    /// Worker is executing work items
    Running,
    /// Run finished with a successful overall outcome
    Completed,
    /// Run finished with an error outcome
    Failed,
}

impl RunStatus {
    /// Check if this is a terminal state (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Check if the worker is actively processing this run
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Running)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid run status: {s}")),
        }
    }
}

/// Default state for newly created runs
impl Default for RunStatus {
    fn default() -> Self {
        Self::Pending
    }
}
