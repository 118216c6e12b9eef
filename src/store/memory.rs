//! In-process control store backend.
//!
//! Suitable when orchestrator and worker share one process (tests, embedded
//! wiring). Shared state lives in a [`DashMap`] keyed by run id, so writers
//! to different runs never contend.

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;

use super::{ControlStore, RunId, RunRecord, DEFAULT_POLL_INTERVAL};
use crate::error::Result;
use crate::flags::ControlFlag;
use crate::lifecycle::RunStatus;

pub struct MemoryControlStore {
    runs: DashMap<String, RunRecord>,
    poll_interval: Duration,
}

impl MemoryControlStore {
    pub fn new() -> Self {
        Self {
            runs: DashMap::new(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Override the polling interval (tests use a short one).
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

impl Default for MemoryControlStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ControlStore for MemoryControlStore {
    async fn create_run(&self, run_id: &RunId) -> Result<()> {
        let mut record = RunRecord::new();
        record.status = Some(RunStatus::Pending);
        self.runs.insert(run_id.as_str().to_string(), record);
        Ok(())
    }

    async fn set_flag(&self, run_id: &RunId, flag: ControlFlag, value: bool) -> Result<()> {
        self.runs
            .entry(run_id.as_str().to_string())
            .or_default()
            .apply_flag(flag, value);
        Ok(())
    }

    async fn check_flag(&self, run_id: &RunId, flag: ControlFlag) -> Result<bool> {
        Ok(self
            .runs
            .get(run_id.as_str())
            .map(|record| record.flag(flag))
            .unwrap_or(false))
    }

    async fn set_status(&self, run_id: &RunId, status: RunStatus) -> Result<()> {
        self.runs
            .entry(run_id.as_str().to_string())
            .or_default()
            .status = Some(status);
        Ok(())
    }

    async fn get_status(&self, run_id: &RunId) -> Result<Option<RunStatus>> {
        Ok(self
            .runs
            .get(run_id.as_str())
            .and_then(|record| record.status))
    }

    async fn set_metadata(&self, run_id: &RunId, key: &str, value: Value) -> Result<()> {
        self.runs
            .entry(run_id.as_str().to_string())
            .or_default()
            .metadata
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn get_metadata(&self, run_id: &RunId, key: &str) -> Result<Option<Value>> {
        Ok(self
            .runs
            .get(run_id.as_str())
            .and_then(|record| record.metadata.get(key).cloned()))
    }

    fn poll_interval(&self) -> Duration {
        self.poll_interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Instant;

    fn store() -> MemoryControlStore {
        MemoryControlStore::new().with_poll_interval(Duration::from_millis(10))
    }

    #[tokio::test]
    async fn test_unset_flag_reads_false() {
        let store = store();
        let run_id = RunId::new("r1");
        assert!(!store.check_flag(&run_id, ControlFlag::Cancelled).await.unwrap());
        assert!(!store.check_flag(&run_id, ControlFlag::Paused).await.unwrap());
    }

    #[tokio::test]
    async fn test_cancelled_is_sticky() {
        let store = store();
        let run_id = RunId::new("r1");

        store.set_flag(&run_id, ControlFlag::Cancelled, true).await.unwrap();
        assert!(store.check_flag(&run_id, ControlFlag::Cancelled).await.unwrap());

        // A later false write never becomes observable
        store.set_flag(&run_id, ControlFlag::Cancelled, false).await.unwrap();
        assert!(store.check_flag(&run_id, ControlFlag::Cancelled).await.unwrap());
    }

    #[tokio::test]
    async fn test_paused_toggles() {
        let store = store();
        let run_id = RunId::new("r1");

        store.set_flag(&run_id, ControlFlag::Paused, true).await.unwrap();
        assert!(store.check_flag(&run_id, ControlFlag::Paused).await.unwrap());
        store.set_flag(&run_id, ControlFlag::Paused, false).await.unwrap();
        assert!(!store.check_flag(&run_id, ControlFlag::Paused).await.unwrap());
    }

    #[tokio::test]
    async fn test_run_namespaces_are_isolated() {
        let store = store();
        let a = RunId::new("run-a");
        let b = RunId::new("run-b");

        store.set_flag(&a, ControlFlag::Cancelled, true).await.unwrap();
        store.set_flag(&a, ControlFlag::Paused, true).await.unwrap();

        assert!(!store.check_flag(&b, ControlFlag::Cancelled).await.unwrap());
        assert!(!store.check_flag(&b, ControlFlag::Paused).await.unwrap());
    }

    #[tokio::test]
    async fn test_status_roundtrip() {
        let store = store();
        let run_id = RunId::new("r1");

        assert_eq!(store.get_status(&run_id).await.unwrap(), None);
        store.create_run(&run_id).await.unwrap();
        assert_eq!(store.get_status(&run_id).await.unwrap(), Some(RunStatus::Pending));
        store.set_status(&run_id, RunStatus::Running).await.unwrap();
        assert_eq!(store.get_status(&run_id).await.unwrap(), Some(RunStatus::Running));
    }

    #[tokio::test]
    async fn test_metadata_roundtrip() {
        let store = store();
        let run_id = RunId::new("r1");

        assert_eq!(store.get_metadata(&run_id, "host").await.unwrap(), None);
        store
            .set_metadata(&run_id, "host", Value::String("worker-3".into()))
            .await
            .unwrap();
        assert_eq!(
            store.get_metadata(&run_id, "host").await.unwrap(),
            Some(Value::String("worker-3".into()))
        );
    }

    #[tokio::test]
    async fn test_wait_times_out_after_full_timeout() {
        let store = store();
        let run_id = RunId::new("r1");
        store.set_flag(&run_id, ControlFlag::Paused, true).await.unwrap();

        let timeout = Duration::from_millis(50);
        let started = Instant::now();
        let satisfied = store
            .wait_for_flag(&run_id, ControlFlag::Paused, Some(timeout))
            .await
            .unwrap();

        assert!(!satisfied);
        assert!(started.elapsed() >= timeout);
    }

    #[tokio::test]
    async fn test_wait_returns_immediately_when_flag_clear() {
        let store = store();
        let run_id = RunId::new("r1");

        let satisfied = store
            .wait_for_flag(&run_id, ControlFlag::Paused, Some(Duration::from_secs(5)))
            .await
            .unwrap();
        assert!(satisfied);
    }

    #[tokio::test]
    async fn test_wait_unblocks_on_concurrent_clear() {
        let store = Arc::new(store());
        let run_id = RunId::new("r1");
        store.set_flag(&run_id, ControlFlag::Paused, true).await.unwrap();

        let writer = {
            let store = Arc::clone(&store);
            let run_id = run_id.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(60)).await;
                store.set_flag(&run_id, ControlFlag::Paused, false).await.unwrap();
            })
        };

        let started = Instant::now();
        let satisfied = store
            .wait_for_flag(&run_id, ControlFlag::Paused, None)
            .await
            .unwrap();
        writer.await.unwrap();

        assert!(satisfied);
        assert!(started.elapsed() >= Duration::from_millis(60));
    }
}
