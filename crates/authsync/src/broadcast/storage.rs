// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Origin-wide key-value storage with change notifications.
//!
//! Every context of an origin shares one [`SharedStorage`]. A write that
//! changes a value notifies subscribers with a [`StorageChange`] naming the
//! writing context, so a context can ignore its own writes. Optionally the
//! map is mirrored to a JSON file so it outlives the process.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::debug;

use crate::broadcast::ContextId;
use crate::error::SessionError;

/// One committed change to a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageChange {
    pub key: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub writer: ContextId,
}

pub struct SharedStorage {
    entries: Mutex<BTreeMap<String, String>>,
    path: Option<PathBuf>,
    change_tx: broadcast::Sender<StorageChange>,
}

impl SharedStorage {
    pub fn in_memory() -> Arc<Self> {
        Arc::new(Self::with_entries(BTreeMap::new(), None))
    }

    /// Open storage mirrored to `path`, loading existing entries if the file
    /// exists.
    pub fn open(path: &Path) -> Result<Arc<Self>, SessionError> {
        let entries = if path.exists() { load(path).map_err(storage_error)? } else { BTreeMap::new() };
        debug!(path = %path.display(), keys = entries.len(), "shared storage opened");
        Ok(Arc::new(Self::with_entries(entries, Some(path.to_path_buf()))))
    }

    fn with_entries(entries: BTreeMap<String, String>, path: Option<PathBuf>) -> Self {
        let (change_tx, _) = broadcast::channel(64);
        Self { entries: Mutex::new(entries), path, change_tx }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().get(key).cloned()
    }

    /// Write `value` under `key`. Writing the value already stored is not a
    /// change and notifies no one.
    pub fn set(&self, key: &str, value: &str, writer: ContextId) -> Result<(), SessionError> {
        let old_value = {
            let mut entries = self.entries.lock();
            if entries.get(key).is_some_and(|v| v == value) {
                return Ok(());
            }
            let old = entries.insert(key.to_owned(), value.to_owned());
            self.persist(&entries)?;
            old
        };
        self.notify(StorageChange {
            key: key.to_owned(),
            old_value,
            new_value: Some(value.to_owned()),
            writer,
        });
        Ok(())
    }

    /// Remove `key`. Returns whether it was present.
    pub fn remove(&self, key: &str, writer: ContextId) -> Result<bool, SessionError> {
        let old_value = {
            let mut entries = self.entries.lock();
            let Some(old) = entries.remove(key) else {
                return Ok(false);
            };
            self.persist(&entries)?;
            old
        };
        self.notify(StorageChange { key: key.to_owned(), old_value: Some(old_value), new_value: None, writer });
        Ok(true)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
        self.change_tx.subscribe()
    }

    fn notify(&self, change: StorageChange) {
        debug!(key = %change.key, writer = %change.writer, "storage changed");
        let _ = self.change_tx.send(change);
    }

    fn persist(&self, entries: &BTreeMap<String, String>) -> Result<(), SessionError> {
        match self.path {
            Some(ref path) => save(path, entries).map_err(storage_error),
            None => Ok(()),
        }
    }
}

fn storage_error(e: anyhow::Error) -> SessionError {
    SessionError::Storage(format!("{e:#}"))
}

fn load(path: &Path) -> anyhow::Result<BTreeMap<String, String>> {
    let contents = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}

/// Write the map atomically (write tmp + rename).
///
/// The temp name carries PID and a counter so racing writers never share a
/// temp file.
fn save(path: &Path, entries: &BTreeMap<String, String>) -> anyhow::Result<()> {
    use std::sync::atomic::{AtomicU32, Ordering};
    static COUNTER: AtomicU32 = AtomicU32::new(0);

    let json = serde_json::to_string_pretty(entries)?;
    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
    let tmp_name = format!(
        "{}.{}.{}.tmp",
        path.file_name().unwrap_or_default().to_string_lossy(),
        std::process::id(),
        seq,
    );
    let tmp_path = path.with_file_name(tmp_name);
    std::fs::write(&tmp_path, json)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
#[path = "storage_tests.rs"]
mod tests;
