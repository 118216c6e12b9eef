//! # Worker Runner
//!
//! Drives a sequence of work items through the control points, wrapping each
//! item's execution in its own correlation scope and producing a per-item
//! report the orchestrator side can render.
//!
//! The runner never lets control-plane trouble abort payload work: store
//! errors at control points degrade to warnings, and an item that has
//! started always runs to completion.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info};

use crate::context::{self, CorrelationId};
use crate::error::{ControlError, Result};
use crate::interceptor::{CollectionGate, ControlPointInterceptor, ItemGate, RunControl, SkipReason};
use crate::lifecycle::RunStatus;
use crate::store::ControlStore;

/// One unit of work: the smallest independently skip-able piece of the
/// worker's job.
#[async_trait]
pub trait WorkItem: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self) -> Result<()>;
}

/// How one discovered item ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    /// The item executed; `Err` carries its failure message.
    Executed(std::result::Result<(), String>),
    /// The item was discovered but deliberately not executed.
    Skipped(SkipReason),
}

impl ItemOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Executed(Err(_)))
    }
}

/// Per-item entry in the final run report.
#[derive(Debug, Clone)]
pub struct ItemReport {
    pub name: String,
    /// Correlation id the item executed under; `None` for skipped items,
    /// which never entered a correlation scope.
    pub correlation_id: Option<CorrelationId>,
    pub outcome: ItemOutcome,
    /// Cancellation was already requested by the time this item finished.
    /// The item still ran to completion; subsequent items get skipped.
    pub cancel_observed_after: bool,
}

/// Aggregate outcome of one run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub status: RunStatus,
    pub items: Vec<ItemReport>,
}

impl RunReport {
    pub fn executed_count(&self) -> usize {
        self.items
            .iter()
            .filter(|item| matches!(item.outcome, ItemOutcome::Executed(_)))
            .count()
    }

    pub fn skipped_count(&self) -> usize {
        self.items
            .iter()
            .filter(|item| matches!(item.outcome, ItemOutcome::Skipped(_)))
            .count()
    }
}

pub struct WorkerRunner {
    interceptor: ControlPointInterceptor,
}

impl WorkerRunner {
    pub fn new(store: Arc<dyn ControlStore>, control: RunControl) -> Self {
        Self {
            interceptor: ControlPointInterceptor::new(store, control),
        }
    }

    pub fn interceptor(&self) -> &ControlPointInterceptor {
        &self.interceptor
    }

    /// Execute the items under control-point supervision and report.
    pub async fn execute(&self, items: &[Box<dyn WorkItem>]) -> RunReport {
        context::scope(CorrelationId::generate(), self.execute_inner(items)).await
    }

    async fn execute_inner(&self, items: &[Box<dyn WorkItem>]) -> RunReport {
        info!(
            correlation_id = %context::current(),
            items = items.len(),
            "run starting"
        );
        self.interceptor.on_run_start().await;

        let gate = self.interceptor.before_collection(items.len()).await;
        let mut reports = Vec::with_capacity(items.len());
        let mut failures = 0usize;

        for item in items {
            let decision = match gate {
                CollectionGate::SkipAll => ItemGate::Skip(SkipReason::Cancelled),
                CollectionGate::Proceed => self.interceptor.before_item().await,
            };

            match decision {
                ItemGate::Skip(reason) => {
                    info!(item = item.name(), reason = %reason, "skipping work item");
                    reports.push(ItemReport {
                        name: item.name().to_string(),
                        correlation_id: None,
                        outcome: ItemOutcome::Skipped(reason),
                        cancel_observed_after: false,
                    });
                }
                ItemGate::Proceed => {
                    let correlation = CorrelationId::generate();
                    let result = context::scope(correlation.clone(), async {
                        info!(
                            item = item.name(),
                            correlation_id = %context::current(),
                            "executing work item"
                        );
                        item.run().await
                    })
                    .await;

                    let outcome = match result {
                        Ok(()) => ItemOutcome::Executed(Ok(())),
                        Err(e) => {
                            failures += 1;
                            error!(
                                item = item.name(),
                                correlation_id = %correlation,
                                error = %e,
                                "work item failed"
                            );
                            ItemOutcome::Executed(Err(e.to_string()))
                        }
                    };

                    let cancel_observed_after = self.interceptor.after_item().await;
                    reports.push(ItemReport {
                        name: item.name().to_string(),
                        correlation_id: Some(correlation),
                        outcome,
                        cancel_observed_after,
                    });
                }
            }
        }

        // Skips due to cancellation do not count against the outcome
        let outcome = if failures == 0 {
            Ok(())
        } else {
            Err(ControlError::WorkItem(format!(
                "{failures} of {} work items failed",
                items.len()
            )))
        };
        let status = if failures == 0 {
            RunStatus::Completed
        } else {
            RunStatus::Failed
        };

        self.interceptor.on_run_end(outcome).await;

        let report = RunReport {
            status,
            items: reports,
        };
        info!(
            correlation_id = %context::current(),
            status = %report.status,
            executed = report.executed_count(),
            skipped = report.skipped_count(),
            "run finished"
        );
        report
    }
}
