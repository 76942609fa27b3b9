//! Persisted node/cluster metadata for recovery
//!
//! A small JSON key/value store loaded at startup and written on
//! checkpoint. The message path never depends on it; nodes that run without
//! a recovery config simply skip both calls.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::RecoveryError;

// ----------------------------------------------------------------------------
// Recovery Store
// ----------------------------------------------------------------------------

/// File-backed key/value store for recovery metadata
#[derive(Debug)]
pub struct RecoveryStore {
    path: PathBuf,
    values: HashMap<String, Value>,
}

impl RecoveryStore {
    /// Load the store from disk
    ///
    /// A missing file yields an empty store: first boot and recovery boot
    /// share one code path.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, RecoveryError> {
        let path = path.as_ref().to_path_buf();
        let values = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "recovery file absent, starting empty");
                HashMap::new()
            }
            Err(e) => return Err(e.into()),
        };
        Ok(Self { path, values })
    }

    /// Get a stored value
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Get a stored string value
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_str)
    }

    /// Insert or replace a value
    pub fn put<K: Into<String>, V: Into<Value>>(&mut self, key: K, value: V) {
        self.values.insert(key.into(), value.into());
    }

    /// Remove a value
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    /// Write the store back to disk
    ///
    /// Writes to a sibling temp file first and renames over the target, so a
    /// crash mid-write cannot truncate the previous checkpoint.
    pub fn persist(&self) -> Result<(), RecoveryError> {
        let bytes = serde_json::to_vec_pretty(&self.values)?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, &self.path)?;
        debug!(path = %self.path.display(), keys = self.values.len(), "recovery state persisted");
        Ok(())
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True when the store holds nothing
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!("latch-recovery-{}-{}.json", name, std::process::id()));
        p
    }

    #[test]
    fn test_missing_file_loads_empty() {
        let store = RecoveryStore::load(temp_path("missing")).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_persist_and_reload() {
        let path = temp_path("roundtrip");
        let mut store = RecoveryStore::load(&path).unwrap();
        store.put("node_id", "w-0");
        store.put("rank_id", 3);
        store.persist().unwrap();

        let reloaded = RecoveryStore::load(&path).unwrap();
        assert_eq!(reloaded.get_str("node_id"), Some("w-0"));
        assert_eq!(reloaded.get("rank_id").and_then(Value::as_u64), Some(3));
        assert_eq!(reloaded.len(), 2);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let path = temp_path("corrupt");
        std::fs::write(&path, b"not json").unwrap();
        let err = RecoveryStore::load(&path).unwrap_err();
        assert!(matches!(err, RecoveryError::Parse(_)));
        std::fs::remove_file(&path).ok();
    }
}
