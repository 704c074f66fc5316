//! File-based persistence — JSON-lines key-value storage.
//!
//! Each line is a JSON object `{"key": ..., "value": ...}`. The whole file is
//! loaded on creation and rewritten on every mutation, giving fast reads with
//! durable writes.
//!
//! Storage location: `~/.memtier/memory.jsonl` unless configured otherwise.
//!
//! This backend is simple, portable, human-inspectable, and requires zero
//! external dependencies.

use crate::in_memory::scan_prefix;
use async_trait::async_trait;
use memtier_core::error::PortError;
use memtier_core::memory::PersistencePort;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, warn};

#[derive(Serialize, Deserialize)]
struct Line {
    key: String,
    value: String,
}

/// A file-backed key-value store using JSONL (one JSON object per line).
pub struct JsonlKv {
    path: PathBuf,
    entries: RwLock<BTreeMap<String, String>>,
}

impl JsonlKv {
    /// Open the store at `path`.
    ///
    /// If the file exists, entries are loaded from it.
    /// If the file does not exist, starts empty (file created on first write).
    pub fn new(path: PathBuf) -> Self {
        let entries = Self::load_from_disk(&path);
        debug!(path = %path.display(), count = entries.len(), "JSONL store loaded");
        Self {
            path,
            entries: RwLock::new(entries),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load_from_disk(path: &Path) -> BTreeMap<String, String> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(_) => return BTreeMap::new(), // File doesn't exist yet — start empty
        };

        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str::<Line>(line) {
                Ok(l) => Some((l.key, l.value)),
                Err(e) => {
                    warn!(error = %e, "Skipping corrupted line");
                    None
                }
            })
            .collect()
    }

    /// Rewrite the file. Called with the write lock held so flushes never
    /// interleave.
    fn flush(&self, entries: &BTreeMap<String, String>) -> Result<(), PortError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    PortError::Storage(format!("Failed to create storage directory: {e}"))
                })?;
            }
        }

        let mut content = String::new();
        for (key, value) in entries {
            let line = serde_json::to_string(&Line {
                key: key.clone(),
                value: value.clone(),
            })
            .map_err(|e| PortError::Storage(format!("Failed to serialize line: {e}")))?;
            content.push_str(&line);
            content.push('\n');
        }

        std::fs::write(&self.path, &content)
            .map_err(|e| PortError::Storage(format!("Failed to write storage file: {e}")))
    }
}

#[async_trait]
impl PersistencePort for JsonlKv {
    fn name(&self) -> &str {
        "file"
    }

    async fn put(&self, key: &str, value: String) -> Result<(), PortError> {
        let mut entries = self.entries.write().await;
        let previous = entries.insert(key.to_string(), value);
        if let Err(e) = self.flush(&entries) {
            // Keep memory and disk in agreement.
            match previous {
                Some(v) => entries.insert(key.to_string(), v),
                None => entries.remove(key),
            };
            return Err(e);
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, PortError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn delete(&self, key: &str) -> Result<bool, PortError> {
        let mut entries = self.entries.write().await;
        let Some(previous) = entries.remove(key) else {
            return Ok(false);
        };
        if let Err(e) = self.flush(&entries) {
            entries.insert(key.to_string(), previous);
            return Err(e);
        }
        Ok(true)
    }

    async fn scan(&self, prefix: &str) -> Result<Vec<(String, String)>, PortError> {
        Ok(scan_prefix(&*self.entries.read().await, prefix))
    }
}
