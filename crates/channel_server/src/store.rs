//! Shared global variables and their persistence.
//!
//! Channels keep a small set of process-wide key/value pairs (event flags,
//! counters set by world logic). They are written out when the node shuts
//! down so the next start picks them up again.

use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Persists shared state on shutdown.
pub trait SharedStateStore: Send + Sync {
    fn save(&self) -> Result<(), StoreError>;
}

/// Global variables stored as a JSON object on disk.
#[derive(Debug)]
pub struct FileStateStore {
    path: PathBuf,
    vars: Mutex<BTreeMap<String, Value>>,
}

impl FileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            vars: Mutex::new(BTreeMap::new()),
        }
    }

    /// Opens the store, loading previously saved variables if the file
    /// exists.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let store = Self::new(path);
        if store.path.exists() {
            let content = std::fs::read_to_string(&store.path).map_err(|source| StoreError::Io {
                path: store.path.clone(),
                source,
            })?;
            let vars: BTreeMap<String, Value> = serde_json::from_str(&content)?;
            info!("📂 Loaded {} global variable(s) from {}", vars.len(), store.path.display());
            *store.lock() = vars;
        }
        Ok(store)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Value>> {
        self.vars.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.lock().get(key).cloned()
    }

    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.lock().insert(key.into(), value);
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.lock().remove(key)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SharedStateStore for FileStateStore {
    fn save(&self) -> Result<(), StoreError> {
        let content = serde_json::to_string_pretty(&*self.lock())?;
        let io_error = |source| StoreError::Io {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_error)?;
        }

        // Write beside the target and rename so a crash never leaves half a file
        let staging = self.path.with_extension("tmp");
        std::fs::write(&staging, content).map_err(io_error)?;
        std::fs::rename(&staging, &self.path).map_err(io_error)?;

        debug!("💾 Saved global variables to {}", self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_save_and_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("vars.json");

        let store = FileStateStore::new(&path);
        store.set("event.halloween", json!(true));
        store.set("counter", json!(42));
        store.save().unwrap();

        let reopened = FileStateStore::open(&path).unwrap();
        assert_eq!(reopened.len(), 2);
        assert_eq!(reopened.get("counter"), Some(json!(42)));
        assert_eq!(reopened.get("event.halloween"), Some(json!(true)));
    }

    #[test]
    fn test_open_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = FileStateStore::open(dir.path().join("absent.json")).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_open_corrupt_file_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vars.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(FileStateStore::open(&path), Err(StoreError::Serialization(_))));
    }
}
