//! # Configuration
//!
//! Explicit, validated configuration for the control protocol's wiring: the
//! store backend, poll interval and run-id channel. Loaded from an optional
//! config file plus `RUNCTL_*` environment overrides; no silent fallbacks
//! beyond the documented defaults.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ControlError, Result};
use crate::store::{ControlStore, FileControlStore, MemoryControlStore};

/// Which control-store backend to wire up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    /// In-process store; orchestrator and worker share one process.
    Memory,
    /// Same-host multi-process store over locked files.
    File,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunControlConfig {
    /// Interval between flag polls, in milliseconds.
    pub poll_interval_ms: u64,
    pub backend: StoreBackend,
    /// Base directory for the file backend's run documents.
    pub file_store_dir: PathBuf,
    /// Environment variable consulted for the run id when no `--run-id`
    /// argument is present.
    pub run_id_env_var: String,
}

impl Default for RunControlConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            backend: StoreBackend::File,
            file_store_dir: PathBuf::from("runctl-state"),
            run_id_env_var: "RUNCTL_RUN_ID".to_string(),
        }
    }
}

impl RunControlConfig {
    /// Load configuration: defaults, then the file named by `RUNCTL_CONFIG`
    /// (if set), then `RUNCTL_*` environment variables, later sources
    /// winning.
    pub fn load() -> Result<Self> {
        let mut builder = config::Config::builder()
            .set_default("poll_interval_ms", 500_i64)
            .map_err(|e| ControlError::Configuration(e.to_string()))?
            .set_default("backend", "file")
            .map_err(|e| ControlError::Configuration(e.to_string()))?
            .set_default("file_store_dir", "runctl-state")
            .map_err(|e| ControlError::Configuration(e.to_string()))?
            .set_default("run_id_env_var", "RUNCTL_RUN_ID")
            .map_err(|e| ControlError::Configuration(e.to_string()))?;

        if let Ok(path) = std::env::var("RUNCTL_CONFIG") {
            builder = builder.add_source(config::File::from(PathBuf::from(path)));
        }
        builder = builder.add_source(config::Environment::with_prefix("RUNCTL"));

        builder
            .build()
            .and_then(config::Config::try_deserialize)
            .map_err(|e| ControlError::Configuration(e.to_string()))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Construct the configured store. The caller owns the instance and
    /// injects it into the controller or interceptor explicitly.
    pub fn build_store(&self) -> Result<Arc<dyn ControlStore>> {
        let store: Arc<dyn ControlStore> = match self.backend {
            StoreBackend::Memory => Arc::new(
                MemoryControlStore::new().with_poll_interval(self.poll_interval()),
            ),
            StoreBackend::File => Arc::new(
                FileControlStore::new(&self.file_store_dir)?
                    .with_poll_interval(self.poll_interval()),
            ),
        };
        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RunControlConfig::default();
        assert_eq!(config.poll_interval(), Duration::from_millis(500));
        assert_eq!(config.backend, StoreBackend::File);
        assert_eq!(config.run_id_env_var, "RUNCTL_RUN_ID");
    }

    #[test]
    fn test_backend_serde_names() {
        assert_eq!(
            serde_json::to_string(&StoreBackend::Memory).unwrap(),
            "\"memory\""
        );
        let parsed: StoreBackend = serde_json::from_str("\"file\"").unwrap();
        assert_eq!(parsed, StoreBackend::File);
    }

    #[test]
    fn test_build_memory_store() {
        let config = RunControlConfig {
            backend: StoreBackend::Memory,
            poll_interval_ms: 20,
            ..Default::default()
        };
        let store = config.build_store().unwrap();
        assert_eq!(store.poll_interval(), Duration::from_millis(20));
    }

    #[test]
    fn test_build_file_store() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = RunControlConfig {
            backend: StoreBackend::File,
            file_store_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        let store = config.build_store().unwrap();
        assert_eq!(store.poll_interval(), Duration::from_millis(500));
    }
}
