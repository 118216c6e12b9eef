//! # Control Flag Vocabulary
//!
//! Named per-run boolean signals written by the orchestrator and read by the
//! worker. Flags are orthogonal to the lifecycle status: `paused` and
//! `cancelled` layer on top of a `running` run rather than forming extra
//! lifecycle states.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Per-run control flags understood by the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlFlag {
    /// Request that no further work items start. Sticky: once set for a run
    /// it never reads `false` again for that run.
    Cancelled,
    /// Request that the worker hold before starting the next item. The
    /// orchestrator clears it to resume.
    Paused,
}

impl ControlFlag {
    /// Wire name used as the key in the backing store.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cancelled => "cancelled",
            Self::Paused => "paused",
        }
    }

    /// Whether a `true` value may ever legally revert to `false`.
    pub fn is_sticky(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl fmt::Display for ControlFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
