//! Storage layer for SecDigest
//!
//! Provides:
//! - Record models
//! - The file-backed paper store
//! - Atomic file replacement shared by the store, the search cache and
//!   the digest writer

pub mod models;
mod repository;

pub use repository::{PaperQuery, PaperStore};

use crate::errors::{AppError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

fn store_error(path: &Path, message: impl ToString) -> AppError {
    AppError::Store {
        path: path.display().to_string(),
        message: message.to_string(),
    }
}

/// Read a JSON snapshot; a missing file yields `None`
pub(crate) fn read_snapshot<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(store_error(path, e)),
    };

    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| store_error(path, format!("corrupt snapshot: {}", e)))
}

/// Write `bytes` to a synced temp file next to `path`
fn stage_file(path: &Path, bytes: &[u8]) -> Result<NamedTempFile> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).map_err(|e| store_error(path, e))?;

    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| store_error(path, e))?;
    tmp.write_all(bytes).map_err(|e| store_error(path, e))?;
    tmp.as_file().sync_all().map_err(|e| store_error(path, e))?;
    Ok(tmp)
}

/// Replace `path` with `bytes`.
///
/// The content is written to a sibling temp file and renamed over the
/// target, so readers never see a partial file.
pub fn write_file_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = stage_file(path, bytes)?;
    tmp.persist(path).map_err(|e| store_error(path, e.error))?;
    Ok(())
}

/// Replace several files as one unit.
///
/// Every file is staged before any is renamed into place. If a rename
/// fails, the files already renamed by this call are removed again, so
/// either all targets are written or none are.
pub fn write_files_atomic(files: &[(&Path, &[u8])]) -> Result<()> {
    let staged = files
        .iter()
        .map(|(path, bytes)| stage_file(path, bytes).map(|tmp| (*path, tmp)))
        .collect::<Result<Vec<_>>>()?;

    let mut persisted: Vec<&Path> = Vec::with_capacity(staged.len());
    for (path, tmp) in staged {
        if let Err(e) = tmp.persist(path) {
            for done in persisted {
                let _ = std::fs::remove_file(done);
            }
            return Err(store_error(path, e.error));
        }
        persisted.push(path);
    }

    Ok(())
}

/// Replace `path` with the pretty-printed JSON of `value`
pub(crate) fn write_snapshot<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let mut bytes = serde_json::to_vec_pretty(value).map_err(|e| store_error(path, e))?;
    bytes.push(b'\n');
    write_file_atomic(path, &bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_missing_snapshot_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let loaded: Option<Vec<String>> = read_snapshot(&dir.path().join("nope.json")).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_write_creates_parent_and_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");

        let mut value = BTreeMap::new();
        value.insert("q".to_string(), "2026-01-01T00:00:00Z".to_string());
        write_snapshot(&path, &value).unwrap();

        let loaded: Option<BTreeMap<String, String>> = read_snapshot(&path).unwrap();
        assert_eq!(loaded, Some(value));
    }

    #[test]
    fn test_corrupt_snapshot_is_store_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{not json").unwrap();

        let err = read_snapshot::<Vec<String>>(&path).unwrap_err();
        assert!(matches!(err, AppError::Store { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_write_files_atomic_all_or_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("out").join("a.md");
        let second = dir.path().join("out").join("a.eml");

        write_files_atomic(&[
            (first.as_path(), b"one".as_slice()),
            (second.as_path(), b"two".as_slice()),
        ])
        .unwrap();
        assert_eq!(std::fs::read(&first).unwrap(), b"one");
        assert_eq!(std::fs::read(&second).unwrap(), b"two");

        let blocked = dir.path().join("out").join("b.eml");
        std::fs::create_dir_all(&blocked).unwrap();
        let fresh = dir.path().join("out").join("b.md");
        let err = write_files_atomic(&[
            (fresh.as_path(), b"one".as_slice()),
            (blocked.as_path(), b"two".as_slice()),
        ])
        .unwrap_err();
        assert!(matches!(err, AppError::Store { .. }));
        assert!(!fresh.exists());
        assert!(blocked.is_dir());
    }
}
