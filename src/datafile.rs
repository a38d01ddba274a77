//! Append-only on-disk log files.
//!
//! A [`Datafile`] is either the single mutable "current" file (`Writable`)
//! or one of the immutable sealed files superseded by later writes
//! (`Sealed`). Positional reads (`read_at`) use `pread`-style access so
//! concurrent readers never need to coordinate a shared seek position;
//! sequential reads (`read`), used only during recovery replay, keep a
//! private cursor on a dedicated file descriptor.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::io::BufReader;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use crate::codec::{self, Entry};
use crate::error::{Error, Result};

pub type FileId = u64;

/// Builds the on-disk filename for a datafile. Fixed-width zero-padded
/// decimal so that lexicographic sort order agrees with numeric order.
pub fn datafile_path(dir: &Path, file_id: FileId) -> PathBuf {
    dir.join(format!("{file_id:020}.data"))
}

/// Parses a datafile filename back into its `FileId`, returning `None` for
/// any name that doesn't match the `datafile_path` convention.
pub fn parse_file_id(file_name: &str) -> Option<FileId> {
    let stem = file_name.strip_suffix(".data")?;
    stem.parse().ok()
}

/// Lists every datafile's `FileId` present in `dir`, in ascending order.
pub fn list_file_ids(dir: &Path) -> Result<Vec<FileId>> {
    let mut ids: Vec<FileId> = fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .filter_map(|e| e.file_name().into_string().ok())
        .filter_map(|name| parse_file_id(&name))
        .collect();
    ids.sort_unstable();
    Ok(ids)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Writable,
    Sealed,
}

#[derive(Debug)]
pub struct Datafile {
    file_id: FileId,
    path: PathBuf,
    handle: File,
    scan_reader: Option<BufReader<File>>,
    mode: Mode,
    with_trailer: bool,
}

impl Datafile {
    /// Opens (creating if necessary) the datafile for `file_id` in `dir`
    /// as the writable current file.
    pub fn create_writable(dir: &Path, file_id: FileId, with_trailer: bool) -> Result<Self> {
        let path = datafile_path(dir, file_id);
        let handle = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        Ok(Self { file_id, path, handle, scan_reader: None, mode: Mode::Writable, with_trailer })
    }

    /// Opens an existing datafile as read-only/sealed.
    pub fn open_sealed(dir: &Path, file_id: FileId, with_trailer: bool) -> Result<Self> {
        let path = datafile_path(dir, file_id);
        let handle = OpenOptions::new().read(true).open(&path)?;
        Ok(Self { file_id, path, handle, scan_reader: None, mode: Mode::Sealed, with_trailer })
    }

    /// Seals a writable datafile: drops the writable handle and reopens a
    /// fresh read-only one at the same path, matching the "close, then
    /// reopen sealed" step of the engine's rotation and merge paths.
    pub fn seal(self) -> Result<Self> {
        let Self { file_id, path, with_trailer, .. } = self;
        let handle = OpenOptions::new().read(true).open(&path)?;
        Ok(Self { file_id, path, handle, scan_reader: None, mode: Mode::Sealed, with_trailer })
    }

    pub fn file_id(&self) -> FileId {
        self.file_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_writable(&self) -> bool {
        self.mode == Mode::Writable
    }

    /// Appends `entry` to the file. Returns the offset the entry starts at
    /// and the number of bytes written. Valid only on a writable datafile.
    pub fn write(&mut self, entry: &Entry) -> Result<(u64, u64)> {
        if self.mode != Mode::Writable {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "cannot write to a sealed datafile",
            )));
        }
        let (bytes, n) = codec::encode(entry, self.with_trailer);
        let offset = self.handle.seek(SeekFrom::End(0))?;
        let mut w = BufWriter::with_capacity(bytes.len(), &mut self.handle);
        w.write_all(&bytes)?;
        w.flush()?;
        Ok((offset, n))
    }

    /// Decodes the record at `offset` spanning `size` bytes, verifying its
    /// CRC. Used by `Get`.
    pub fn read_at(&self, offset: u64, size: u64) -> Result<Entry> {
        let mut buf = vec![0u8; size as usize];
        self.handle.read_exact_at(&mut buf, offset)?;
        codec::decode_at(&buf, self.with_trailer)
    }

    /// Advances a private sequential cursor and returns the next record, or
    /// `None` at end-of-file. Used for recovery replay.
    pub fn read(&mut self) -> Result<Option<(Entry, u64)>> {
        if self.scan_reader.is_none() {
            let f = File::open(&self.path)?;
            self.scan_reader = Some(BufReader::new(f));
        }
        let reader = self.scan_reader.as_mut().unwrap();
        codec::decode_stream(reader, self.with_trailer)
    }

    /// Resets the sequential read cursor back to the start of the file.
    pub fn rewind(&mut self) {
        self.scan_reader = None;
    }

    pub fn size(&self) -> Result<u64> {
        Ok(self.handle.metadata()?.len())
    }

    pub fn sync(&self) -> Result<()> {
        self.handle.sync_all()?;
        Ok(())
    }

    /// Truncates the file to `len` bytes, discarding a torn tail record.
    pub fn truncate(&mut self, len: u64) -> Result<()> {
        self.handle.set_len(len)?;
        self.scan_reader = None;
        Ok(())
    }

    /// Releases the file descriptor. A no-op beyond `Drop`, kept for
    /// parity with the Datafile contract's explicit `Close`.
    pub fn close(self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Entry;

    #[test]
    fn write_then_read_at_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let mut df = Datafile::create_writable(dir.path(), 0, true).unwrap();
        let entry = Entry::new(b"key".to_vec(), b"value".to_vec(), None);
        let (offset, size) = df.write(&entry).unwrap();
        let decoded = df.read_at(offset, size).unwrap();
        assert_eq!(decoded, entry);
    }

    #[test]
    fn sealed_datafile_rejects_write() {
        let dir = tempfile::tempdir().unwrap();
        let df = Datafile::create_writable(dir.path(), 0, true).unwrap();
        let mut sealed = df.seal().unwrap();
        let entry = Entry::new(b"k".to_vec(), b"v".to_vec(), None);
        assert!(sealed.write(&entry).is_err());
    }

    #[test]
    fn sequential_read_visits_all_entries_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut df = Datafile::create_writable(dir.path(), 0, true).unwrap();
        let entries = vec![
            Entry::new(b"a".to_vec(), b"1".to_vec(), None),
            Entry::new(b"b".to_vec(), b"2".to_vec(), None),
            Entry::tombstone(b"a".to_vec()),
        ];
        for e in &entries {
            df.write(e).unwrap();
        }
        let mut seen = Vec::new();
        while let Some((entry, _)) = df.read().unwrap() {
            seen.push(entry);
        }
        assert_eq!(seen, entries);
    }

    #[test]
    fn file_id_roundtrips_through_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = datafile_path(dir.path(), 42);
        let name = path.file_name().unwrap().to_str().unwrap();
        assert_eq!(parse_file_id(name), Some(42));
    }

    #[test]
    fn list_file_ids_is_sorted_and_ignores_other_files() {
        let dir = tempfile::tempdir().unwrap();
        Datafile::create_writable(dir.path(), 5, true).unwrap();
        Datafile::create_writable(dir.path(), 1, true).unwrap();
        std::fs::write(dir.path().join("lock"), b"").unwrap();
        assert_eq!(list_file_ids(dir.path()).unwrap(), vec![1, 5]);
    }
}
