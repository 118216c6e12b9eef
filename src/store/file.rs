//! File-backed control store for same-host, multi-process coordination.
//!
//! One JSON document per run under a base directory. Documents are replaced
//! atomically (write to a temp file, then rename) so a concurrent reader
//! never sees a torn write, and read-modify-write cycles are serialized
//! across processes through a sidecar lock file. A crashed writer's lock is
//! taken over once it goes stale.

use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use super::{ControlStore, RunId, RunRecord, DEFAULT_POLL_INTERVAL};
use crate::error::{ControlError, Result};
use crate::flags::ControlFlag;
use crate::lifecycle::RunStatus;

/// How long a writer may hold the lock before another writer treats it as
/// abandoned.
const LOCK_STALE_AFTER: Duration = Duration::from_secs(5);
/// How long to contend for the lock before giving up with `StoreUnavailable`.
const LOCK_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(2);
const LOCK_RETRY_DELAY: Duration = Duration::from_millis(5);

pub struct FileControlStore {
    base_dir: PathBuf,
    poll_interval: Duration,
}

impl FileControlStore {
    /// Open a store rooted at `base_dir`, creating the directory if needed.
    pub fn new(base_dir: impl Into<PathBuf>) -> Result<Self> {
        let base_dir = base_dir.into();
        fs::create_dir_all(&base_dir).map_err(|e| {
            ControlError::StoreUnavailable(format!(
                "cannot create store directory {}: {e}",
                base_dir.display()
            ))
        })?;
        Ok(Self {
            base_dir,
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn run_path(&self, run_id: &RunId) -> PathBuf {
        self.base_dir
            .join(format!("{}.json", encode_run_id(run_id.as_str())))
    }

    fn lock_path(&self, run_id: &RunId) -> PathBuf {
        self.base_dir
            .join(format!("{}.lock", encode_run_id(run_id.as_str())))
    }

    fn load(&self, run_id: &RunId) -> Result<Option<RunRecord>> {
        let path = self.run_path(run_id);
        match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map(Some).map_err(|e| {
                ControlError::StoreUnavailable(format!(
                    "corrupted run document {}: {e}",
                    path.display()
                ))
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ControlError::StoreUnavailable(format!(
                "cannot read {}: {e}",
                path.display()
            ))),
        }
    }

    fn persist(&self, run_id: &RunId, record: &RunRecord) -> Result<()> {
        let path = self.run_path(run_id);
        let tmp = path.with_extension("json.tmp");

        let bytes = serde_json::to_vec_pretty(record).map_err(|e| {
            ControlError::StoreUnavailable(format!("cannot encode run document: {e}"))
        })?;
        fs::write(&tmp, bytes).map_err(|e| {
            ControlError::StoreUnavailable(format!("cannot write {}: {e}", tmp.display()))
        })?;
        fs::rename(&tmp, &path).map_err(|e| {
            ControlError::StoreUnavailable(format!("cannot replace {}: {e}", path.display()))
        })
    }

    /// Read-modify-write one run document under the run's lock.
    async fn update(&self, run_id: &RunId, mutate: impl FnOnce(&mut RunRecord)) -> Result<()> {
        let _lock = RunLock::acquire(self.lock_path(run_id)).await?;
        let mut record = self.load(run_id)?.unwrap_or_default();
        mutate(&mut record);
        self.persist(run_id, &record)
    }
}

#[async_trait]
impl ControlStore for FileControlStore {
    async fn create_run(&self, run_id: &RunId) -> Result<()> {
        let _lock = RunLock::acquire(self.lock_path(run_id)).await?;
        let mut record = RunRecord::new();
        record.status = Some(RunStatus::Pending);
        self.persist(run_id, &record)
    }

    async fn set_flag(&self, run_id: &RunId, flag: ControlFlag, value: bool) -> Result<()> {
        self.update(run_id, |record| record.apply_flag(flag, value))
            .await
    }

    async fn check_flag(&self, run_id: &RunId, flag: ControlFlag) -> Result<bool> {
        Ok(self
            .load(run_id)?
            .map(|record| record.flag(flag))
            .unwrap_or(false))
    }

    async fn set_status(&self, run_id: &RunId, status: RunStatus) -> Result<()> {
        self.update(run_id, |record| record.status = Some(status))
            .await
    }

    async fn get_status(&self, run_id: &RunId) -> Result<Option<RunStatus>> {
        Ok(self.load(run_id)?.and_then(|record| record.status))
    }

    async fn set_metadata(&self, run_id: &RunId, key: &str, value: Value) -> Result<()> {
        self.update(run_id, |record| {
            record.metadata.insert(key.to_string(), value);
        })
        .await
    }

    async fn get_metadata(&self, run_id: &RunId, key: &str) -> Result<Option<Value>> {
        Ok(self
            .load(run_id)?
            .and_then(|record| record.metadata.get(key).cloned()))
    }

    fn poll_interval(&self) -> Duration {
        self.poll_interval
    }
}

/// Advisory cross-process lock: existence of the lock file is ownership.
struct RunLock {
    path: PathBuf,
}

impl RunLock {
    /// Contending for a held lock yields to the runtime between retries, so
    /// other tasks' polls keep progressing.
    async fn acquire(path: PathBuf) -> Result<Self> {
        let deadline = Instant::now() + LOCK_ACQUIRE_TIMEOUT;
        loop {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(_) => return Ok(Self { path }),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if lock_is_stale(&path) {
                        warn!(lock = %path.display(), "taking over stale run lock");
                        let _ = fs::remove_file(&path);
                        continue;
                    }
                    if Instant::now() >= deadline {
                        return Err(ControlError::StoreUnavailable(format!(
                            "timed out acquiring run lock {}",
                            path.display()
                        )));
                    }
                    tokio::time::sleep(LOCK_RETRY_DELAY).await;
                }
                Err(e) => {
                    return Err(ControlError::StoreUnavailable(format!(
                        "cannot acquire run lock {}: {e}",
                        path.display()
                    )))
                }
            }
        }
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

fn lock_is_stale(path: &Path) -> bool {
    fs::metadata(path)
        .and_then(|meta| meta.modified())
        .ok()
        .and_then(|modified| modified.elapsed().ok())
        .map(|age| age > LOCK_STALE_AFTER)
        .unwrap_or(false)
}

/// Map an opaque run id onto a safe file name. Bytes outside the portable
/// set are percent-encoded, so distinct run ids always get distinct files.
fn encode_run_id(run_id: &str) -> String {
    let mut out = String::with_capacity(run_id.len());
    for byte in run_id.bytes() {
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'_' | b'.' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}
