//! # Control Point Interceptor
//!
//! Worker-side component invoked at fixed points in the worker's execution:
//! run start, before enumerating items, before each item, after each item,
//! run end. Each control point consults the shared [`ControlStore`] and
//! enacts pause-wait, skip, or status transitions.
//!
//! Control is eventual, not immediate: the orchestrator's flag writes are
//! observed only at the next control point or poll tick. Once an item starts
//! executing, cancellation never aborts it mid-flight; it only prevents
//! future items from starting.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::flags::ControlFlag;
use crate::lifecycle::{RunEvent, RunLifecycle};
use crate::store::{ControlStore, RunId};

/// Whether this worker is subject to remote control for the current run.
///
/// Without a resolvable run id the worker proceeds uncontrolled: every
/// control point is a no-op, and exactly one warning was emitted at
/// resolution time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunControl {
    Controlled(RunId),
    Uncontrolled,
}

impl RunControl {
    /// Resolve the run id from command-line arguments (`--run-id <id>` or
    /// `--run-id=<id>`), falling back to the `env_var` environment variable.
    pub fn resolve<I, S>(args: I, env_var: &str) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            let arg = arg.as_ref();
            if arg == "--run-id" {
                if let Some(value) = args.next() {
                    return Self::Controlled(RunId::new(value.as_ref()));
                }
            } else if let Some(value) = arg.strip_prefix("--run-id=") {
                return Self::Controlled(RunId::new(value));
            }
        }

        match std::env::var(env_var) {
            Ok(value) if !value.is_empty() => Self::Controlled(RunId::new(value)),
            _ => {
                warn!(
                    env_var = %env_var,
                    "no run id on command line or in environment; \
                     proceeding in uncontrolled mode (control points disabled)"
                );
                Self::Uncontrolled
            }
        }
    }

    /// Resolve from the current process's arguments and environment.
    pub fn from_process_env(env_var: &str) -> Self {
        Self::resolve(std::env::args().skip(1), env_var)
    }

    pub fn run_id(&self) -> Option<&RunId> {
        match self {
            Self::Controlled(run_id) => Some(run_id),
            Self::Uncontrolled => None,
        }
    }
}

/// Decision taken at the collection-time control point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionGate {
    /// Enumerate and execute items normally.
    Proceed,
    /// Cancellation already requested: every discovered item is marked
    /// skipped (still reported), none executes.
    SkipAll,
}

/// Decision taken before one item executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemGate {
    Proceed,
    Skip(SkipReason),
}

/// Why an item was skipped rather than executed. Reported downstream so a
/// skipped item is distinguishable from one never discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Cancelled,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

pub struct ControlPointInterceptor {
    store: Arc<dyn ControlStore>,
    control: RunControl,
}

impl ControlPointInterceptor {
    /// The store is injected, never looked up through a global.
    pub fn new(store: Arc<dyn ControlStore>, control: RunControl) -> Self {
        Self { store, control }
    }

    pub fn control(&self) -> &RunControl {
        &self.control
    }

    /// Run-start control point: transition the shared status to `Running`.
    pub async fn on_run_start(&self) {
        let Some(run_id) = self.control.run_id() else {
            return;
        };

        let lifecycle = RunLifecycle::new(Arc::clone(&self.store), run_id.clone());
        if let Err(e) = lifecycle.transition(RunEvent::Start).await {
            // Control-plane failures never stop the worker itself
            warn!(run_id = %run_id, error = %e, "could not record run start");
        }
    }

    /// Collection-time control point, fired before items are enumerated.
    pub async fn before_collection(&self, item_count: usize) -> CollectionGate {
        let Some(run_id) = self.control.run_id() else {
            return CollectionGate::Proceed;
        };

        if self.flag_or_default(run_id, ControlFlag::Cancelled).await {
            crate::logging::log_control_point(
                "before_collection",
                run_id.as_str(),
                &format!("run cancelled; all {item_count} items will be skipped"),
            );
            CollectionGate::SkipAll
        } else {
            CollectionGate::Proceed
        }
    }

    /// Per-item control point, fired before the item starts executing.
    ///
    /// Skips on cancellation; on pause, blocks the calling task until the
    /// orchestrator resumes. A cancel arriving during the pause wait unblocks
    /// it within one poll interval and the skip path takes over: waiting to
    /// resume a cancelled run serves no purpose.
    pub async fn before_item(&self) -> ItemGate {
        let Some(run_id) = self.control.run_id() else {
            return ItemGate::Proceed;
        };

        if self.flag_or_default(run_id, ControlFlag::Cancelled).await {
            crate::logging::log_control_point(
                "before_item",
                run_id.as_str(),
                "run cancelled; item skipped",
            );
            return ItemGate::Skip(SkipReason::Cancelled);
        }

        if self.flag_or_default(run_id, ControlFlag::Paused).await {
            self.wait_while_paused(run_id).await;
            if self.flag_or_default(run_id, ControlFlag::Cancelled).await {
                return ItemGate::Skip(SkipReason::Cancelled);
            }
        }

        ItemGate::Proceed
    }

    /// Post-item control point. Returns whether cancellation was observed
    /// after the item completed. Informational only, the finished item is
    /// never undone.
    pub async fn after_item(&self) -> bool {
        let Some(run_id) = self.control.run_id() else {
            return false;
        };

        let cancelled = self.flag_or_default(run_id, ControlFlag::Cancelled).await;
        if cancelled {
            debug!(run_id = %run_id, "cancellation observed after item completion");
        }
        cancelled
    }

    /// Run-end control point: record the terminal status. Cancellation skips
    /// alone never force `Failed`; only the aggregate outcome decides.
    pub async fn on_run_end(&self, outcome: Result<()>) {
        let Some(run_id) = self.control.run_id() else {
            return;
        };

        let event = match outcome {
            Ok(()) => RunEvent::Complete,
            Err(e) => RunEvent::Fail(e.to_string()),
        };

        let lifecycle = RunLifecycle::new(Arc::clone(&self.store), run_id.clone());
        if let Err(e) = lifecycle.transition(event).await {
            // Terminal status stays unknown to the orchestrator; it treats
            // unreachable-status runs as suspect on its side.
            warn!(run_id = %run_id, error = %e, "could not record terminal run status");
        }
    }

    /// Block until `paused` clears or `cancelled` appears. Waits in
    /// poll-interval slices so a cancel is observed within one interval.
    async fn wait_while_paused(&self, run_id: &RunId) {
        info!(run_id = %run_id, "run paused; waiting for resume");
        let slice = self.store.poll_interval();

        loop {
            if self.flag_or_default(run_id, ControlFlag::Cancelled).await {
                info!(run_id = %run_id, "cancel observed during pause wait");
                return;
            }
            match self
                .store
                .wait_for_flag(run_id, ControlFlag::Paused, Some(slice))
                .await
            {
                Ok(true) => {
                    info!(run_id = %run_id, "run resumed");
                    return;
                }
                Ok(false) => continue,
                Err(e) => {
                    warn!(
                        run_id = %run_id,
                        error = %e,
                        "control store unavailable during pause wait; proceeding"
                    );
                    return;
                }
            }
        }
    }

    /// Conservative flag read: an unreachable store reads as "no control
    /// signal pending" rather than as cancellation, which would silently
    /// discard work.
    async fn flag_or_default(&self, run_id: &RunId, flag: ControlFlag) -> bool {
        match self.store.check_flag(run_id, flag).await {
            Ok(value) => value,
            Err(e) => {
                warn!(
                    run_id = %run_id,
                    flag = %flag,
                    error = %e,
                    "cannot determine flag state; treating as unset"
                );
                false
            }
        }
    }
}
