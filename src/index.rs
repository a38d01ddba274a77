//! Crash-safe persistence for the two in-memory indexes.
//!
//! Both the key directory (`index`) and the TTL index (`ttl_index`) are
//! saved by serializing to a sibling temp file and renaming it into place,
//! so a crash mid-save leaves either the old or the new file intact, never
//! a half-written one.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Serialize};

use crate::error::Result;

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().expect("index path has a file name").to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Serializes `value` and atomically replaces the file at `path`.
pub fn save<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let tmp = tmp_path(path);
    let bytes = bincode::serialize(value)?;
    fs::write(&tmp, &bytes)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Loads `path` if it exists. Returns `(value, true)` on success, or
/// `(T::default(), false)` if the file is absent. A corrupt file is a hard
/// error: the caller (the engine's `Reopen`) decides whether to fall back
/// to a full replay.
pub fn load<T: DeserializeOwned + Default>(path: &Path) -> Result<(T, bool)> {
    match fs::read(path) {
        Ok(bytes) => {
            let value: T = bincode::deserialize(&bytes)?;
            Ok((value, true))
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok((T::default(), false)),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{Directory, Item};

    #[test]
    fn save_then_load_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index");

        let mut directory = Directory::new();
        directory.insert(b"k".to_vec(), Item { file_id: 3, offset: 10, size: 20 });
        save(&path, &directory).unwrap();

        let (loaded, found): (Directory, bool) = load(&path).unwrap();
        assert!(found);
        assert_eq!(loaded.get(b"k"), directory.get(b"k"));
    }

    #[test]
    fn load_missing_file_returns_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index");
        let (loaded, found): (Directory, bool) = load(&path).unwrap();
        assert!(!found);
        assert_eq!(loaded.len(), 0);
    }

    #[test]
    fn load_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index");
        fs::write(&path, b"not a valid bincode stream at all, much too short").unwrap();
        let result: Result<(Directory, bool)> = load(&path);
        assert!(result.is_err());
    }

    #[test]
    fn save_does_not_leave_tmp_file_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index");
        save(&path, &Directory::new()).unwrap();
        assert!(!tmp_path(&path).exists());
        assert!(path.exists());
    }
}
