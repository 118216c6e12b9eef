//! # Control Store
//!
//! Shared, keyed state store through which the orchestrator and a detached
//! worker process coordinate. The store carries only small control values
//! (per-run boolean flags, a lifecycle status and a little metadata), never
//! payloads or results.
//!
//! Backends differ only in durability and visibility scope (in-process
//! memory, same-host file with locking); the contract here is
//! backend-agnostic and every backend must produce identical observable
//! behavior to a caller. Components receive a store instance through explicit
//! construction, never through a global singleton.

pub mod file;
pub mod memory;

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::flags::ControlFlag;
use crate::lifecycle::RunStatus;

pub use file::FileControlStore;
pub use memory::MemoryControlStore;

/// Reference polling interval for flag waits.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Opaque run identifier, unique per job, supplied by the orchestrator
/// before the worker starts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RunId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for RunId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Everything the store holds for one run.
///
/// Exactly one live status per run at any instant; flags are independent
/// booleans, not mutually exclusive with the status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub status: Option<RunStatus>,
    #[serde(default)]
    pub flags: HashMap<String, bool>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    pub created_at: DateTime<Utc>,
}

impl RunRecord {
    pub fn new() -> Self {
        Self {
            status: None,
            flags: HashMap::new(),
            metadata: HashMap::new(),
            created_at: Utc::now(),
        }
    }

    /// Apply a flag write, honoring stickiness: a sticky flag that already
    /// reads `true` ignores any later `false` write, so no reader can ever
    /// observe it regress.
    pub fn apply_flag(&mut self, flag: ControlFlag, value: bool) {
        if flag.is_sticky() && !value && self.flag(flag) {
            return;
        }
        self.flags.insert(flag.as_str().to_string(), value);
    }

    pub fn flag(&self, flag: ControlFlag) -> bool {
        self.flags.get(flag.as_str()).copied().unwrap_or(false)
    }
}

impl Default for RunRecord {
    fn default() -> Self {
        Self::new()
    }
}

/// Contract shared by every control-store backend.
///
/// All mutations are attributed to exactly one `run_id` namespace; flag state
/// for one run is never visible under another. Flag writes are idempotent and
/// resolve last-writer-wins (except the sticky `cancelled` flag, which never
/// reverts to `false` once set).
#[async_trait]
pub trait ControlStore: Send + Sync {
    /// Record a new run: `created_at` now, `status = Pending`.
    /// Orchestrator-side; the worker never creates or deletes runs.
    async fn create_run(&self, run_id: &RunId) -> Result<()>;

    async fn set_flag(&self, run_id: &RunId, flag: ControlFlag, value: bool) -> Result<()>;

    /// Read a flag. An unset flag (or an unknown run) reads `false`, never an
    /// error; only a genuinely unreachable backend errors.
    async fn check_flag(&self, run_id: &RunId, flag: ControlFlag) -> Result<bool>;

    async fn set_status(&self, run_id: &RunId, status: RunStatus) -> Result<()>;

    async fn get_status(&self, run_id: &RunId) -> Result<Option<RunStatus>>;

    /// Attach a small metadata value to a run (orchestrator annotations,
    /// worker host info and the like).
    async fn set_metadata(&self, run_id: &RunId, key: &str, value: Value) -> Result<()>;

    async fn get_metadata(&self, run_id: &RunId, key: &str) -> Result<Option<Value>>;

    /// Interval between polls in [`ControlStore::wait_for_flag`].
    fn poll_interval(&self) -> Duration {
        DEFAULT_POLL_INTERVAL
    }

    /// Block the calling task until the flag reads `false` or the timeout
    /// elapses.
    ///
    /// Returns `true` when the condition was met, `false` on timeout; a
    /// timeout is a normal return value, not an error. An unbounded wait
    /// (`timeout = None`) never returns `false`. The wait is scoped to the
    /// calling task only; other tasks and other runs progress freely.
    async fn wait_for_flag(
        &self,
        run_id: &RunId,
        flag: ControlFlag,
        timeout: Option<Duration>,
    ) -> Result<bool> {
        let interval = self.poll_interval();
        let started = tokio::time::Instant::now();

        loop {
            if !self.check_flag(run_id, flag).await? {
                return Ok(true);
            }

            match timeout {
                Some(limit) => {
                    let elapsed = started.elapsed();
                    if elapsed >= limit {
                        return Ok(false);
                    }
                    tokio::time::sleep((limit - elapsed).min(interval)).await;
                }
                None => tokio::time::sleep(interval).await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_record_sticky_flag() {
        let mut record = RunRecord::new();
        record.apply_flag(ControlFlag::Cancelled, true);
        record.apply_flag(ControlFlag::Cancelled, false);
        assert!(record.flag(ControlFlag::Cancelled));

        record.apply_flag(ControlFlag::Paused, true);
        record.apply_flag(ControlFlag::Paused, false);
        assert!(!record.flag(ControlFlag::Paused));
    }

    #[test]
    fn test_run_record_unset_flag_reads_false() {
        let record = RunRecord::new();
        assert!(!record.flag(ControlFlag::Cancelled));
        assert!(!record.flag(ControlFlag::Paused));
    }

    #[test]
    fn test_run_record_serde_defaults() {
        // Older documents without flag/metadata maps still parse
        let json = format!(
            "{{\"status\":\"running\",\"created_at\":\"{}\"}}",
            Utc::now().to_rfc3339()
        );
        let record: RunRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(record.status, Some(RunStatus::Running));
        assert!(record.flags.is_empty());
    }

    #[test]
    fn test_default_wait_returns_for_clear_flag() {
        let store = MemoryControlStore::new();
        let satisfied = tokio_test::block_on(store.wait_for_flag(
            &RunId::new("r1"),
            ControlFlag::Paused,
            Some(Duration::from_millis(10)),
        ))
        .unwrap();
        assert!(satisfied);
    }

    #[test]
    fn test_run_id_display() {
        let run_id = RunId::new("run-42");
        assert_eq!(run_id.to_string(), "run-42");
        assert_eq!(run_id.as_str(), "run-42");
    }
}
