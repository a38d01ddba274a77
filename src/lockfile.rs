//! Cross-process exclusion via an `flock`-style filesystem lock.
//!
//! A single process may have a database directory open at a time. The
//! lock is acquired non-blocking on `Open`; contention fails fast with
//! `Error::DatabaseLocked` rather than waiting for the other process.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use fs4::FileExt;

use crate::error::{Error, Result};

#[derive(Debug)]
pub struct LockFile {
    file: File,
    path: PathBuf,
}

impl LockFile {
    /// Acquires the lock at `<dir>/lock`, creating the empty token file if
    /// needed. Fails with `Error::DatabaseLocked` if another process (or
    /// another open `LockFile` in this process) already holds it.
    pub fn acquire(dir: &Path) -> Result<Self> {
        let path = dir.join("lock");
        let file = OpenOptions::new().read(true).write(true).create(true).open(&path)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Self { file, path }),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Err(Error::DatabaseLocked),
            Err(e) => Err(e.into()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn release(&self) -> Result<()> {
        FileExt::unlock(&self.file)?;
        Ok(())
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        let _ = self.release();
    }
}
