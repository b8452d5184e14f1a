// src/storage/kv.rs
//! Small string key-value store persisted as one JSON object

use super::{remove_if_exists, write_atomically};
use crate::error::{Result, TripError};
use log::warn;
use std::{
    collections::BTreeMap,
    io,
    path::PathBuf,
    sync::{Mutex, PoisonError},
};

pub struct KvStore {
    path: PathBuf,
    // Serializes read-modify-write of the whole map
    write_lock: Mutex<()>,
}

impl KvStore {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.read_all()?.remove(key))
    }

    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut entries = self.read_for_update()?;
        entries.insert(key.to_string(), value.to_string());
        self.write_all(&entries)
    }

    /// Delete the whole map without reading it
    pub fn clear(&self) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        remove_if_exists(&self.path).map_err(|e| {
            TripError::Storage(format!("Failed to remove {}: {}", self.path.display(), e))
        })
    }

    // A corrupt map is overwritten rather than blocking every later write
    fn read_for_update(&self) -> Result<BTreeMap<String, String>> {
        match self.read_all() {
            Err(TripError::Serialization(msg)) => {
                warn!("{}; starting from an empty state", msg);
                Ok(BTreeMap::new())
            }
            other => other,
        }
    }

    fn read_all(&self) -> Result<BTreeMap<String, String>> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(TripError::Io(e)),
        };
        if contents.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&contents).map_err(|e| {
            TripError::Serialization(format!("Corrupt state file {}: {}", self.path.display(), e))
        })
    }

    fn write_all(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        let contents = serde_json::to_vec(entries)?;
        write_atomically(&self.path, &contents).map_err(|e| {
            TripError::Storage(format!("Failed to write {}: {}", self.path.display(), e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        {
            let store = KvStore::open(&path);
            store.set("bg_tracking_active", "true").unwrap();
            store.set("other", "x").unwrap();
        }

        let store = KvStore::open(&path);
        assert_eq!(store.get("bg_tracking_active").unwrap().as_deref(), Some("true"));
        assert_eq!(store.get("other").unwrap().as_deref(), Some("x"));
    }

    #[test]
    fn test_missing_file_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = KvStore::open(dir.path().join("absent.json"));
        assert_eq!(store.get("anything").unwrap(), None);
        store.clear().unwrap();
        assert!(!dir.path().join("absent.json").exists());
    }

    #[test]
    fn test_corrupt_file_is_serialization_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{not json").unwrap();
        let store = KvStore::open(&path);
        assert!(matches!(store.get("k"), Err(TripError::Serialization(_))));
    }

    #[test]
    fn test_write_replaces_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{\"bg_tracking_active\":\"tr").unwrap();
        let store = KvStore::open(&path);

        store.set("trip_session_active", "false").unwrap();
        assert_eq!(store.get("trip_session_active").unwrap().as_deref(), Some("false"));
        assert_eq!(store.get("bg_tracking_active").unwrap(), None);
    }

    #[test]
    fn test_clear_removes_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{not json").unwrap();
        let store = KvStore::open(&path);

        store.clear().unwrap();
        store.clear().unwrap();
        assert!(!path.exists());
        assert_eq!(store.get("k").unwrap(), None);
    }
}
