use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info, warn};

use crate::error::RelayError;
use crate::message::MessageRecord;
use crate::store::MessageStore;

/// Debounced dump of the message store to a JSON file.
///
/// Every append calls [`touch`](Self::touch). Once the store has been quiet
/// for the idle period the full snapshot is written. Shutdown and crash paths
/// call the synchronous save methods directly. Write failures are logged and
/// never retried.
pub struct SnapshotPersister {
    path: PathBuf,
    crash_path: PathBuf,
    idle: Duration,
    changed: Notify,
}

impl SnapshotPersister {
    pub fn new(path: PathBuf, crash_path: PathBuf, idle: Duration) -> Self {
        Self {
            path,
            crash_path,
            idle,
            changed: Notify::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn crash_path(&self) -> &Path {
        &self.crash_path
    }

    /// Record that the store changed; restarts the idle countdown.
    pub fn touch(&self) {
        self.changed.notify_one();
    }

    /// Write the normal snapshot target.
    pub fn save(&self, records: &[MessageRecord]) -> Result<(), RelayError> {
        write_snapshot(&self.path, records)
    }

    /// Write the crash target, leaving the last clean snapshot alone.
    pub fn save_crash_dump(&self, records: &[MessageRecord]) -> Result<(), RelayError> {
        write_snapshot(&self.crash_path, records)
    }

    /// Read the normal snapshot. A missing file is an empty timeline.
    pub fn load(&self) -> Result<Vec<MessageRecord>, RelayError> {
        read_snapshot(&self.path)
    }

    /// Debounce loop. Runs until the task is aborted.
    pub async fn run(self: Arc<Self>, store: Arc<Mutex<MessageStore>>) {
        info!(
            "Snapshot persister started (idle save after {}s)",
            self.idle.as_secs()
        );
        loop {
            self.changed.notified().await;
            loop {
                tokio::select! {
                    _ = self.changed.notified() => continue,
                    _ = tokio::time::sleep(self.idle) => break,
                }
            }

            let records = store.lock().await.snapshot();
            match self.save(&records) {
                Ok(()) => info!(
                    "Saved {} messages to {}",
                    records.len(),
                    self.path.display()
                ),
                Err(e) => warn!("Idle snapshot save failed: {e}"),
            }
        }
    }
}

/// Write `value` as pretty JSON via a temp file, so a failed write never
/// leaves a truncated file behind.
pub(crate) fn write_json_atomic<T: Serialize + ?Sized>(
    path: &Path,
    value: &T,
) -> Result<(), RelayError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let json = serde_json::to_string_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Write records as a JSON array.
pub fn write_snapshot(path: &Path, records: &[MessageRecord]) -> Result<(), RelayError> {
    write_json_atomic(path, records)?;
    debug!("Wrote snapshot of {} messages to {}", records.len(), path.display());
    Ok(())
}

pub fn read_snapshot(path: &Path) -> Result<Vec<MessageRecord>, RelayError> {
    match std::fs::read_to_string(path) {
        Ok(contents) if contents.trim().is_empty() => Ok(Vec::new()),
        Ok(contents) => Ok(serde_json::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e.into()),
    }
}
