#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # runctl-core
//!
//! Run-scoped control-state protocol: lets an orchestrator process remotely
//! pause, resume or cancel a separately-started worker process, and observe
//! its status, without any direct interprocess call channel. Coordination
//! happens entirely through a shared, keyed control store that both sides
//! poll or update.
//!
//! ## Architecture
//!
//! - [`store`] - the [`store::ControlStore`] contract plus interchangeable
//!   backends (in-process memory, same-host locked files). Carries only small
//!   boolean/enum control signals and status values, never payloads.
//! - [`lifecycle`] - the finite run status model (`pending` -> `running` ->
//!   `completed`/`failed`) and its store-backed state machine. Pause and
//!   cancellation are orthogonal flags layered on `running`, not states.
//! - [`interceptor`] - the worker-side control points that consume flag
//!   state: pause-wait, skip-on-cancel, status synchronization.
//! - [`runner`] - drives a sequence of work items through the control points
//!   and reports per-item outcomes.
//! - [`controller`] - the orchestrator-side boundary issuing pause, resume
//!   and cancel requests.
//! - [`context`] - task-scoped correlation ids implicitly available to
//!   nested code within one unit of work.
//!
//! Control is eventual: a flag write becomes visible at the worker's next
//! control point or poll tick. Once a work item starts, cancellation never
//! aborts it mid-flight; it only prevents future items from starting, so
//! cancellation latency is bounded by the longest single item, not by the
//! poll interval.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use runctl_core::{RunControlConfig, RunController, RunId};
//!
//! # async fn example() -> runctl_core::Result<()> {
//! let config = RunControlConfig::default();
//! let store = config.build_store()?;
//!
//! // Orchestrator side: create a run, later pause or cancel it
//! let controller = RunController::new(Arc::clone(&store));
//! let run_id = RunId::new("nightly-batch-42");
//! controller.create_run(&run_id).await?;
//! controller.request_pause(&run_id).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod context;
pub mod controller;
pub mod error;
pub mod flags;
pub mod interceptor;
pub mod lifecycle;
pub mod logging;
pub mod runner;
pub mod store;

pub use config::{RunControlConfig, StoreBackend};
pub use context::CorrelationId;
pub use controller::RunController;
pub use error::{ControlError, Result};
pub use flags::ControlFlag;
pub use interceptor::{
    CollectionGate, ControlPointInterceptor, ItemGate, RunControl, SkipReason,
};
pub use lifecycle::{RunEvent, RunLifecycle, RunStatus};
pub use runner::{ItemOutcome, ItemReport, RunReport, WorkItem, WorkerRunner};
pub use store::{ControlStore, FileControlStore, MemoryControlStore, RunId};
