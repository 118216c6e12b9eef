//! # Run Controller
//!
//! Orchestrator-side boundary of the protocol. Issues flag and status
//! mutations into the shared store keyed by run id; the worker observes them
//! at its next control point. Writes fail loud: a dropped cancel request
//! must never go unnoticed.

use std::sync::Arc;

use serde_json::Value;
use tracing::info;

use crate::error::Result;
use crate::flags::ControlFlag;
use crate::lifecycle::RunStatus;
use crate::store::{ControlStore, RunId};

pub struct RunController {
    store: Arc<dyn ControlStore>,
}

impl RunController {
    pub fn new(store: Arc<dyn ControlStore>) -> Self {
        Self { store }
    }

    /// Register a run before its worker starts: `status = Pending`,
    /// `created_at` now.
    pub async fn create_run(&self, run_id: &RunId) -> Result<()> {
        self.store.create_run(run_id).await?;
        info!(run_id = %run_id, "run created");
        Ok(())
    }

    /// Request that no further work items start. Sticky for the rest of the
    /// run; the worker honors it at its next control point.
    pub async fn request_cancel(&self, run_id: &RunId) -> Result<()> {
        self.store
            .set_flag(run_id, ControlFlag::Cancelled, true)
            .await?;
        info!(run_id = %run_id, "cancel requested");
        Ok(())
    }

    /// Request that the worker hold before its next item.
    pub async fn request_pause(&self, run_id: &RunId) -> Result<()> {
        self.store
            .set_flag(run_id, ControlFlag::Paused, true)
            .await?;
        info!(run_id = %run_id, "pause requested");
        Ok(())
    }

    /// Clear the pause flag so a waiting worker proceeds.
    pub async fn request_resume(&self, run_id: &RunId) -> Result<()> {
        self.store
            .set_flag(run_id, ControlFlag::Paused, false)
            .await?;
        info!(run_id = %run_id, "resume requested");
        Ok(())
    }

    /// Current lifecycle status as last recorded in the store; `None` when
    /// the run was never created.
    pub async fn status(&self, run_id: &RunId) -> Result<Option<RunStatus>> {
        self.store.get_status(run_id).await
    }

    /// Attach a metadata value to the run record.
    pub async fn annotate(&self, run_id: &RunId, key: &str, value: Value) -> Result<()> {
        self.store.set_metadata(run_id, key, value).await
    }

    pub async fn annotation(&self, run_id: &RunId, key: &str) -> Result<Option<Value>> {
        self.store.get_metadata(run_id, key).await
    }
}
