// src/storage/buffer.rs
//! Durable buffer for the fixes of the trip currently being recorded.
//!
//! Fixes land in one of two backends. While background tracking is flagged
//! they go to an append file; otherwise they go to the small key-value store.
//! The flags live in the key-value store and are read fresh on every call, so
//! a relaunched process picks up exactly where the previous one stopped.
//!
//! Physical read and write failures on the append/list path are logged and
//! swallowed. A dropped fix is preferable to a broken recording session.

use super::{AppendFile, KvStore};
use crate::{
    error::Result,
    gps::data::{decode_sequence, encode_sequence, FixPoint},
};
use log::{debug, warn};
use std::{fs, path::Path};

const POINTS_KEY: &str = "current_trip_points";
const BG_FLAG_KEY: &str = "bg_tracking_active";
const SESSION_KEY: &str = "trip_session_active";

const STATE_FILE: &str = "state.json";
const POINTS_FILE: &str = "current_trip_points.json";

/// Where appends currently go
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferMode {
    /// Session not active, appends are dropped
    Inactive,
    LightBacked,
    FileBacked,
}

pub struct FixBuffer {
    kv: KvStore,
    file: AppendFile,
}

impl FixBuffer {
    /// Open (or create) the buffer in `dir`
    pub fn open(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)?;
        Ok(Self {
            kv: KvStore::open(dir.join(STATE_FILE)),
            file: AppendFile::new(dir.join(POINTS_FILE)),
        })
    }

    fn read_flag(&self, key: &str) -> bool {
        match self.kv.get(key) {
            Ok(value) => value.as_deref() == Some("true"),
            Err(e) => {
                warn!("Failed to read {} flag: {}", key, e);
                false
            }
        }
    }

    fn write_flag(&self, key: &str, on: bool) -> Result<()> {
        self.kv.set(key, if on { "true" } else { "false" })
    }

    /// Session-active flag; appends are dropped while it is off
    pub fn is_active(&self) -> bool {
        self.read_flag(SESSION_KEY)
    }

    pub fn set_active(&self, active: bool) -> Result<()> {
        debug!("Trip session active: {}", active);
        self.write_flag(SESSION_KEY, active)
    }

    /// Durable "background tracking started" flag
    pub fn background_mode(&self) -> bool {
        self.read_flag(BG_FLAG_KEY)
    }

    pub fn set_background_mode(&self, on: bool) -> Result<()> {
        debug!("Background mode flag: {}", on);
        self.write_flag(BG_FLAG_KEY, on)
    }

    pub fn mode(&self) -> BufferMode {
        if !self.is_active() {
            BufferMode::Inactive
        } else if self.background_mode() {
            BufferMode::FileBacked
        } else {
            BufferMode::LightBacked
        }
    }

    /// Persist a fix to the backend the mode flag designates.
    ///
    /// Returns whether the fix was stored; never fails.
    pub fn append(&self, fix: &FixPoint) -> bool {
        let stored = match self.mode() {
            BufferMode::Inactive => {
                debug!("Fix dropped, no active trip session");
                return false;
            }
            BufferMode::FileBacked => self.file.append(fix),
            BufferMode::LightBacked => self.append_light(fix),
        };
        match stored {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to persist fix: {}", e);
                false
            }
        }
    }

    fn append_light(&self, fix: &FixPoint) -> Result<()> {
        let mut fixes = self.read_light()?;
        fixes.push(*fix);
        self.kv.set(POINTS_KEY, &encode_sequence(&fixes)?)
    }

    fn read_light(&self) -> Result<Vec<FixPoint>> {
        match self.kv.get(POINTS_KEY)? {
            Some(content) => decode_sequence(&content),
            None => Ok(Vec::new()),
        }
    }

    fn read_or_empty(result: Result<Vec<FixPoint>>, backend: &str) -> Vec<FixPoint> {
        result.unwrap_or_else(|e| {
            warn!("Failed to read {} fixes: {}", backend, e);
            Vec::new()
        })
    }

    /// The full trip in recorded order.
    ///
    /// Both backends are read so a trip that switched between foreground and
    /// background keeps every fix; when both hold data they are merged by
    /// timestamp (stable, so equal timestamps keep backend order).
    pub fn list(&self) -> Vec<FixPoint> {
        let light = Self::read_or_empty(self.read_light(), "light");
        let file = Self::read_or_empty(self.file.read(), "file");

        match (light.is_empty(), file.is_empty()) {
            (_, true) => light,
            (true, false) => file,
            (false, false) => {
                let mut merged = light;
                merged.extend(file);
                merged.sort_by_key(|fix| fix.timestamp);
                merged
            }
        }
    }

    pub fn len(&self) -> usize {
        self.list().len()
    }

    pub fn is_empty(&self) -> bool {
        !self.has_unfinished_trip()
    }

    /// True when either backend holds at least one fix
    pub fn has_unfinished_trip(&self) -> bool {
        let light = Self::read_or_empty(self.read_light(), "light");
        if !light.is_empty() {
            return true;
        }
        !Self::read_or_empty(self.file.read(), "file").is_empty()
    }

    /// Delete both backends and reset both flags. Idempotent.
    ///
    /// Neither backend is parsed, so a corrupt file cannot keep the trip
    /// alive. Both removals are attempted even if the first fails.
    pub fn clear(&self) -> Result<()> {
        let state = self.kv.clear();
        let file = self.file.remove();
        state.and(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn t(seconds: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap() + Duration::seconds(seconds)
    }

    fn fix(i: i64) -> FixPoint {
        FixPoint::new(50.0 + i as f64 * 0.001, 8.0, t(i))
    }

    #[test]
    fn test_append_preserves_order() {
        let dir = tempfile::tempdir().unwrap();
        let buffer = FixBuffer::open(dir.path()).unwrap();
        buffer.set_active(true).unwrap();

        let fixes: Vec<FixPoint> = (0..20).map(fix).collect();
        for f in &fixes {
            assert!(buffer.append(f));
        }

        assert_eq!(buffer.list(), fixes);
        assert_eq!(buffer.mode(), BufferMode::LightBacked);
    }

    #[test]
    fn test_inactive_append_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let buffer = FixBuffer::open(dir.path()).unwrap();

        assert!(!buffer.append(&fix(0)));
        assert!(buffer.list().is_empty());

        buffer.set_active(true).unwrap();
        buffer.append(&fix(1));
        buffer.set_active(false).unwrap();
        buffer.append(&fix(2));
        buffer.set_active(true).unwrap();
        buffer.append(&fix(3));

        assert_eq!(buffer.list(), vec![fix(1), fix(3)]);
    }

    #[test]
    fn test_background_flag_selects_file() {
        let dir = tempfile::tempdir().unwrap();
        let buffer = FixBuffer::open(dir.path()).unwrap();
        buffer.set_active(true).unwrap();
        buffer.set_background_mode(true).unwrap();

        buffer.append(&fix(0));

        assert_eq!(buffer.mode(), BufferMode::FileBacked);
        assert!(dir.path().join(POINTS_FILE).exists());
        assert_eq!(buffer.list(), vec![fix(0)]);
    }

    #[test]
    fn test_mode_switch_mid_trip_keeps_all_fixes() {
        let dir = tempfile::tempdir().unwrap();
        let buffer = FixBuffer::open(dir.path()).unwrap();
        buffer.set_active(true).unwrap();

        buffer.append(&fix(0));
        buffer.append(&fix(1));
        buffer.set_background_mode(true).unwrap();
        buffer.append(&fix(2));
        buffer.set_background_mode(false).unwrap();
        buffer.append(&fix(3));

        assert_eq!(buffer.list(), vec![fix(0), fix(1), fix(2), fix(3)]);
    }

    #[test]
    fn test_flags_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let buffer = FixBuffer::open(dir.path()).unwrap();
            buffer.set_active(true).unwrap();
            buffer.set_background_mode(true).unwrap();
            buffer.append(&fix(0));
        }

        let reopened = FixBuffer::open(dir.path()).unwrap();
        assert!(reopened.is_active());
        assert!(reopened.background_mode());
        assert!(reopened.has_unfinished_trip());
        assert!(reopened.append(&fix(1)));
        assert_eq!(reopened.len(), 2);
    }

    #[test]
    fn test_clear_resets_everything() {
        for background in [false, true] {
            let dir = tempfile::tempdir().unwrap();
            let buffer = FixBuffer::open(dir.path()).unwrap();
            buffer.set_active(true).unwrap();
            buffer.set_background_mode(background).unwrap();
            buffer.append(&fix(0));

            buffer.clear().unwrap();
            buffer.clear().unwrap();

            assert!(!buffer.has_unfinished_trip());
            assert!(buffer.list().is_empty());
            assert_eq!(buffer.mode(), BufferMode::Inactive);
            assert!(!buffer.background_mode());
        }
    }

    #[test]
    fn test_corrupt_backend_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let buffer = FixBuffer::open(dir.path()).unwrap();
        std::fs::write(dir.path().join(POINTS_FILE), "[{\"lat\": 1").unwrap();

        assert!(buffer.list().is_empty());
        assert!(!buffer.has_unfinished_trip());
    }

    #[test]
    fn test_legacy_file_fixes_detected() {
        let dir = tempfile::tempdir().unwrap();
        let buffer = FixBuffer::open(dir.path()).unwrap();
        AppendFile::new(dir.path().join(POINTS_FILE)).append(&fix(0)).unwrap();

        // No flags set at all, but the file backend still holds a fix
        assert!(buffer.has_unfinished_trip());
        assert_eq!(buffer.mode(), BufferMode::Inactive);
    }

    #[test]
    fn test_corrupt_state_file_does_not_block_clear() {
        let dir = tempfile::tempdir().unwrap();
        let buffer = FixBuffer::open(dir.path()).unwrap();
        buffer.set_active(true).unwrap();
        buffer.set_background_mode(true).unwrap();
        assert!(buffer.append(&fix(0)));
        std::fs::write(dir.path().join(STATE_FILE), "{\"bg_tracking_active\":\"tr").unwrap();

        assert!(buffer.has_unfinished_trip());
        assert!(!buffer.is_active());
        buffer.set_active(false).unwrap();
        buffer.set_background_mode(false).unwrap();

        buffer.clear().unwrap();
        assert!(!buffer.has_unfinished_trip());
        assert!(!dir.path().join(POINTS_FILE).exists());
        buffer.clear().unwrap();
    }
}
