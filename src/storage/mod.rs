// src/storage/mod.rs
//! Crash-durable storage for the trip being recorded

pub mod append_file;
pub mod buffer;
pub mod kv;

pub use append_file::AppendFile;
pub use buffer::{BufferMode, FixBuffer};
pub use kv::KvStore;

use std::{fs, io, path::Path};

/// Replace `path` with `contents` so readers see either the old or the new
/// file, never a partial write.
pub(crate) fn write_atomically(path: &Path, contents: &[u8]) -> io::Result<()> {
    let temp_path = path.with_extension("tmp");
    fs::write(&temp_path, contents)?;
    fs::rename(&temp_path, path)
}

/// Remove a file, treating "already gone" as success
pub(crate) fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
