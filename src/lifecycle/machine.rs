use std::sync::Arc;

use tracing::{debug, warn};

use super::{events::RunEvent, states::RunStatus};
use crate::error::{ControlError, Result};
use crate::store::{ControlStore, RunId};

/// Determine the target status for an event, or reject the transition.
///
/// Pure function so the transition table is testable without a store.
pub fn target_status(current: RunStatus, event: &RunEvent) -> Result<RunStatus> {
    let target = match (current, event) {
        (RunStatus::Pending, RunEvent::Start) => RunStatus::Running,
        (RunStatus::Running, RunEvent::Complete) => RunStatus::Completed,
        (RunStatus::Running, RunEvent::Fail(_)) => RunStatus::Failed,

        // Terminal states never transition out; everything else is illegal
        (from, event) => {
            return Err(ControlError::InvalidTransition {
                from: from.to_string(),
                event: event.event_type().to_string(),
            })
        }
    };

    Ok(target)
}

/// Store-backed run status state machine.
///
/// Reads the current status from the injected [`ControlStore`], validates the
/// requested transition against the table above and writes the new status
/// back. A run with no recorded status yet is treated as `Pending`.
pub struct RunLifecycle {
    store: Arc<dyn ControlStore>,
    run_id: RunId,
}

impl RunLifecycle {
    pub fn new(store: Arc<dyn ControlStore>, run_id: RunId) -> Self {
        Self { store, run_id }
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    /// Get the current status of the run, defaulting to `Pending` when the
    /// orchestrator has not recorded one yet.
    pub async fn current_status(&self) -> Result<RunStatus> {
        Ok(self
            .store
            .get_status(&self.run_id)
            .await?
            .unwrap_or_default())
    }

    /// Attempt to transition the run status.
    pub async fn transition(&self, event: RunEvent) -> Result<RunStatus> {
        let current = self.current_status().await?;
        let target = target_status(current, &event)?;

        self.store.set_status(&self.run_id, target).await?;

        if let Some(message) = event.error_message() {
            warn!(
                run_id = %self.run_id,
                from = %current,
                to = %target,
                error = %message,
                "run status transition"
            );
        } else {
            debug!(
                run_id = %self.run_id,
                from = %current,
                to = %target,
                event = event.event_type(),
                "run status transition"
            );
        }

        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryControlStore;

    #[test]
    fn test_legal_transitions() {
        assert_eq!(
            target_status(RunStatus::Pending, &RunEvent::Start).unwrap(),
            RunStatus::Running
        );
        assert_eq!(
            target_status(RunStatus::Running, &RunEvent::Complete).unwrap(),
            RunStatus::Completed
        );
        assert_eq!(
            target_status(RunStatus::Running, &RunEvent::Fail("e".into())).unwrap(),
            RunStatus::Failed
        );
    }

    #[test]
    fn test_terminal_states_are_sealed() {
        for terminal in [RunStatus::Completed, RunStatus::Failed] {
            assert!(target_status(terminal, &RunEvent::Start).is_err());
            assert!(target_status(terminal, &RunEvent::Complete).is_err());
            assert!(target_status(terminal, &RunEvent::Fail("e".into())).is_err());
        }
    }

    #[test]
    fn test_pending_cannot_complete_directly() {
        let err = target_status(RunStatus::Pending, &RunEvent::Complete).unwrap_err();
        match err {
            ControlError::InvalidTransition { from, event } => {
                assert_eq!(from, "pending");
                assert_eq!(event, "complete");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_store_backed_lifecycle() {
        let store = Arc::new(MemoryControlStore::new());
        let run_id = RunId::new("lifecycle-run");
        store.create_run(&run_id).await.unwrap();

        let lifecycle = RunLifecycle::new(store.clone(), run_id.clone());
        assert_eq!(lifecycle.current_status().await.unwrap(), RunStatus::Pending);

        lifecycle.transition(RunEvent::Start).await.unwrap();
        assert_eq!(
            store.get_status(&run_id).await.unwrap(),
            Some(RunStatus::Running)
        );

        lifecycle.transition(RunEvent::Complete).await.unwrap();
        assert_eq!(
            store.get_status(&run_id).await.unwrap(),
            Some(RunStatus::Completed)
        );

        // Completed is terminal
        assert!(lifecycle.transition(RunEvent::Start).await.is_err());
    }

    #[tokio::test]
    async fn test_unrecorded_run_defaults_to_pending() {
        let store = Arc::new(MemoryControlStore::new());
        let lifecycle = RunLifecycle::new(store, RunId::new("never-created"));
        assert_eq!(lifecycle.current_status().await.unwrap(), RunStatus::Pending);
    }
}
