// src/storage/append_file.rs
//! File backend for fixes recorded while background tracking is on

use super::{remove_if_exists, write_atomically};
use crate::{
    error::{Result, TripError},
    gps::data::{decode_sequence, encode_sequence, FixPoint},
};
use std::{
    io,
    path::PathBuf,
};

/// JSON array of fixes, rewritten whole on every append
pub struct AppendFile {
    path: PathBuf,
}

impl AppendFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn read(&self) -> Result<Vec<FixPoint>> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => decode_sequence(&content),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(TripError::Io(e)),
        }
    }

    pub fn append(&self, fix: &FixPoint) -> Result<()> {
        let mut fixes = self.read()?;
        fixes.push(*fix);
        let encoded = encode_sequence(&fixes)?;
        write_atomically(&self.path, encoded.as_bytes()).map_err(|e| {
            TripError::Storage(format!("Failed to write {}: {}", self.path.display(), e))
        })
    }

    pub fn remove(&self) -> Result<()> {
        remove_if_exists(&self.path).map_err(|e| {
            TripError::Storage(format!("Failed to remove {}: {}", self.path.display(), e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    #[test]
    fn test_append_keeps_order() {
        let dir = tempfile::tempdir().unwrap();
        let file = AppendFile::new(dir.path().join("current_trip_points.json"));
        let t0 = Utc::now();

        for i in 0..5 {
            file.append(&FixPoint::new(i as f64, 0.0, t0 + Duration::seconds(i))).unwrap();
        }

        let fixes = file.read().unwrap();
        assert_eq!(fixes.len(), 5);
        assert!(fixes.windows(2).all(|w| w[0].latitude < w[1].latitude));
        assert!(!dir.path().join("current_trip_points.tmp").exists());
    }

    #[test]
    fn test_remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("points.json");
        let file = AppendFile::new(&path);
        file.append(&FixPoint::new(1.0, 1.0, Utc::now())).unwrap();
        file.remove().unwrap();
        file.remove().unwrap();
        assert!(!path.exists());
        assert!(file.read().unwrap().is_empty());
    }
}
