//! The `Bitcask` engine: ties the datafile log, the key directory, the TTL
//! index, and the persisted config/metadata together behind a single
//! reader/writer lock, with an advisory file lock guarding the directory
//! against a second process opening it concurrently.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use chrono::{DateTime, Utc};

use crate::codec::Entry;
use crate::config::{Config, ConfigOverrides};
use crate::datafile::{self, Datafile, FileId};
use crate::directory::{Directory, Item, TtlIndex};
use crate::error::{Error, Result};
use crate::index;
use crate::lockfile::LockFile;
use crate::meta::Metadata;
use crate::version;

const INDEX_FILE: &str = "index";
const TTL_INDEX_FILE: &str = "ttl_index";

/// Per-`Put` options. Only carries the expiry today; a zero value leaves any
/// expiry already recorded for the key untouched (see `Inner::put_locked`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PutOptions {
    pub expiry: Option<DateTime<Utc>>,
}

/// A point-in-time snapshot of engine sizing, returned by `Bitcask::stats`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Stats {
    pub datafiles: usize,
    pub keys: usize,
    pub reclaimable: u64,
}

/// Everything the engine needs behind the reader/writer lock.
struct Inner {
    path: PathBuf,
    config: Config,
    current: Option<Datafile>,
    sealed: BTreeMap<FileId, Datafile>,
    directory: Directory,
    ttl: TtlIndex,
    meta: Metadata,
    is_merging: bool,
}

impl Inner {
    fn current(&self) -> &Datafile {
        self.current.as_ref().expect("current datafile is always present")
    }

    fn current_mut(&mut self) -> &mut Datafile {
        self.current.as_mut().expect("current datafile is always present")
    }

    fn datafile_for(&self, file_id: FileId) -> Option<&Datafile> {
        if self.current().file_id() == file_id {
            Some(self.current())
        } else {
            self.sealed.get(&file_id)
        }
    }

    fn with_trailer(&self) -> bool {
        self.config.db_version >= 1
    }

    fn next_file_id(&self) -> FileId {
        let max_sealed = self.sealed.keys().copied().max().unwrap_or(0);
        max_sealed.max(self.current().file_id()) + 1
    }

    /// Seals the current datafile and opens a fresh one at `new_id`, then
    /// persists both indexes as a crash-safe checkpoint: after this point the
    /// sealed file is never written to again, so the persisted index can
    /// safely describe everything up to and including it.
    fn rotate_to(&mut self, new_id: FileId) -> Result<()> {
        let current = self.current.take().expect("current datafile is always present");
        let file_id = current.file_id();
        let sealed = current.seal()?;
        self.sealed.insert(file_id, sealed);
        self.current = Some(Datafile::create_writable(&self.path, new_id, self.with_trailer())?);
        self.checkpoint_indexes()?;
        Ok(())
    }

    fn rotate_if_needed(&mut self) -> Result<()> {
        if self.config.max_datafile_size > 0 && self.current().size()? >= self.config.max_datafile_size {
            let new_id = self.next_file_id();
            self.rotate_to(new_id)?;
        }
        Ok(())
    }

    fn checkpoint_indexes(&self) -> Result<()> {
        index::save(&self.path.join(INDEX_FILE), &self.directory)?;
        index::save(&self.path.join(TTL_INDEX_FILE), &self.ttl)?;
        Ok(())
    }

    /// Appends `entry`, rotating first if the current datafile is full.
    /// Returns the directory entry the caller should record.
    fn append_entry(&mut self, entry: &Entry) -> Result<Item> {
        self.rotate_if_needed()?;
        let (offset, size) = self.current_mut().write(entry)?;
        if self.config.sync {
            self.current().sync()?;
        }
        self.meta.index_up_to_date = false;
        Ok(Item { file_id: self.current().file_id(), offset, size })
    }

    fn put_locked(&mut self, key: &[u8], value: &[u8], expiry: Option<DateTime<Utc>>) -> Result<()> {
        let entry = Entry::new(key.to_vec(), value.to_vec(), expiry);
        let item = self.append_entry(&entry)?;
        if let Some(old) = self.directory.insert(key.to_vec(), item) {
            self.meta.reclaimable_space = self.meta.reclaimable_space.saturating_add(old.size);
        }
        // A Put without an explicit expiry leaves any existing TTL entry for
        // the key as-is: overwriting a value doesn't implicitly clear a
        // previously set expiration.
        if let Some(expiry) = expiry {
            self.ttl.insert(key.to_vec(), expiry);
        }
        Ok(())
    }

    fn delete_locked(&mut self, key: &[u8]) -> Result<()> {
        let tombstone = Entry::tombstone(key.to_vec());
        self.append_entry(&tombstone)?;
        if let Some(old) = self.directory.remove(key) {
            let reclaimed = old.size + crate::codec::META_INFO_SIZE as u64 + key.len() as u64;
            self.meta.reclaimable_space = self.meta.reclaimable_space.saturating_add(reclaimed);
        }
        self.ttl.remove(key);
        Ok(())
    }

    /// Re-reads the snapshot taken for a merge copy and returns the current
    /// value if, and only if, the directory still points at the exact
    /// on-disk location the snapshot saw (i.e. the key hasn't been
    /// overwritten or deleted since the merge began) and it hasn't expired.
    fn merge_copy_one(&self, key: &[u8], snapshot: Item) -> Result<Option<(Vec<u8>, Option<DateTime<Utc>>)>> {
        let current = match self.directory.get(key) {
            Some(item) => item,
            None => return Ok(None),
        };
        if current.file_id != snapshot.file_id || current.offset != snapshot.offset {
            return Ok(None);
        }
        if let Some(expiry) = self.ttl.get(key) {
            if expiry <= Utc::now() {
                return Ok(None);
            }
        }
        let df = self
            .datafile_for(current.file_id)
            .ok_or_else(|| Error::CorruptRecord(format!("directory points at missing datafile {}", current.file_id)))?;
        let entry = df.read_at(current.offset, current.size)?;
        Ok(Some((entry.value, self.ttl.get(key))))
    }
}

/// An embedded, single-writer, log-structured key-value store.
///
/// A directory may only be opened by one `Bitcask` at a time, in one
/// process, enforced by an advisory lockfile. Within a process, any number
/// of threads may share one `Bitcask` through `&self`: reads run
/// concurrently, writes (`Put`, `Delete`, `DeleteAll`, `RunGC`, `Merge`) are
/// serialized against each other and against reads.
pub struct Bitcask {
    path: PathBuf,
    inner: RwLock<Inner>,
    _lock: LockFile,
}

impl Bitcask {
    /// Opens (creating if necessary) the database directory at `path`.
    pub fn open(path: impl AsRef<Path>, overrides: ConfigOverrides) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let mut config = Config::load(&path)?;
        version::reject_unsupported(config.db_version)?;
        if config.db_version < version::CURRENT_DB_VERSION {
            // Upgrading an empty/nonexistent directory is a no-op, so it's
            // safe to create the directory before the version check runs.
            fs::create_dir_all(&path)?;
            version::upgrade(&path, config.db_version)?;
            config.db_version = version::CURRENT_DB_VERSION;
        }
        config.apply(&overrides);

        fs::create_dir_all(&path)?;

        let mut meta = Metadata::load(&path)?;
        meta.db_version = config.db_version;

        let lock = LockFile::acquire(&path)?;

        config.save(&path)?;

        if config.auto_recovery {
            truncate_torn_tail(&path, config.db_version >= 1)?;
        }

        let (current, sealed, directory, ttl) = reopen_state(&path, &config, &meta)?;

        log::info!("opened database at {} ({} keys)", path.display(), directory.len());

        let inner = Inner {
            path: path.clone(),
            config,
            current: Some(current),
            sealed,
            directory,
            ttl,
            meta,
            is_merging: false,
        };
        Ok(Self { path, inner: RwLock::new(inner), _lock: lock })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-derives all in-memory state from what's currently on disk: config,
    /// metadata, the datafile set, and the directory/TTL index (trusting a
    /// persisted index only when metadata says it's up to date).
    pub fn reopen(&self) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        let config = Config::load(&self.path)?;
        let meta = Metadata::load(&self.path)?;
        let (current, sealed, directory, ttl) = reopen_state(&self.path, &config, &meta)?;
        inner.config = config;
        inner.meta = meta;
        inner.current = Some(current);
        inner.sealed = sealed;
        inner.directory = directory;
        inner.ttl = ttl;
        Ok(())
    }

    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        let outcome = {
            let inner = self.inner.read().unwrap();
            let item = inner.directory.get(key).ok_or(Error::KeyNotFound)?;
            let expired = inner.ttl.get(key).map(|e| e <= Utc::now()).unwrap_or(false);
            if expired {
                Err(Error::KeyExpired)
            } else {
                let df = inner
                    .datafile_for(item.file_id)
                    .ok_or_else(|| Error::CorruptRecord(format!("directory points at missing datafile {}", item.file_id)))?;
                Ok(df.read_at(item.offset, item.size)?.value)
            }
        };
        // A key found expired on read is removed best-effort; the lookup
        // itself still reports KeyExpired rather than KeyNotFound.
        if matches!(&outcome, Err(Error::KeyExpired)) {
            let _ = self.delete(key);
        }
        outcome
    }

    pub fn has(&self, key: &[u8]) -> Result<bool> {
        let inner = self.inner.read().unwrap();
        match inner.directory.get(key) {
            None => Ok(false),
            Some(_) => {
                let expired = inner.ttl.get(key).map(|e| e <= Utc::now()).unwrap_or(false);
                Ok(!expired)
            }
        }
    }

    pub fn put(&self, key: &[u8], value: &[u8], options: PutOptions) -> Result<()> {
        if key.is_empty() {
            return Err(Error::EmptyKey);
        }
        {
            let inner = self.inner.read().unwrap();
            if inner.config.max_key_size != 0 && key.len() as u32 > inner.config.max_key_size {
                return Err(Error::KeyTooLarge);
            }
            if inner.config.max_value_size != 0 && value.len() as u64 > inner.config.max_value_size {
                return Err(Error::ValueTooLarge);
            }
        }
        let mut inner = self.inner.write().unwrap();
        inner.put_locked(key, value, options.expiry)
    }

    pub fn delete(&self, key: &[u8]) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        inner.delete_locked(key)
    }

    /// Deletes every key currently in the directory. Resolves the ambiguity
    /// the on-disk contract leaves open (a read lock around an operation
    /// that plainly mutates state) by taking the write lock for the whole
    /// operation: the alternative admits a second writer interleaving with
    /// the enumeration, which could delete keys that were never actually
    /// observed as present.
    pub fn delete_all(&self) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        let keys: Vec<Vec<u8>> = inner.directory.keys().cloned().collect();
        for key in keys {
            inner.delete_locked(&key)?;
        }
        Ok(())
    }

    /// Invokes `f` with every key/value pair whose key starts with `prefix`,
    /// in ascending key order, while holding the read lock. `f` returning an
    /// error stops the scan and propagates.
    pub fn scan<F>(&self, prefix: &[u8], mut f: F) -> Result<()>
    where
        F: FnMut(&[u8], &[u8]) -> Result<()>,
    {
        let inner = self.inner.read().unwrap();
        let now = Utc::now();
        for (key, item) in inner.directory.prefix_iter(prefix) {
            if inner.ttl.get(key).map(|e| e <= now).unwrap_or(false) {
                continue;
            }
            let df = inner
                .datafile_for(item.file_id)
                .ok_or_else(|| Error::CorruptRecord(format!("directory points at missing datafile {}", item.file_id)))?;
            let entry = df.read_at(item.offset, item.size)?;
            f(key, &entry.value)?;
        }
        Ok(())
    }

    /// Invokes `f` with every live key/value pair in ascending key order.
    /// Equivalent to `scan` with an empty prefix.
    pub fn fold<F>(&self, f: F) -> Result<()>
    where
        F: FnMut(&[u8], &[u8]) -> Result<()>,
    {
        self.scan(&[], f)
    }

    /// Snapshots every live (non-expired) key in ascending order under the
    /// read lock, then returns an iterator over the snapshot. The lock is
    /// not held for the lifetime of iteration; this trades strict "drain
    /// promptly" streaming for a simpler, always-consistent-as-of-call
    /// result.
    pub fn keys(&self) -> std::vec::IntoIter<Vec<u8>> {
        let inner = self.inner.read().unwrap();
        let now = Utc::now();
        let keys: Vec<Vec<u8>> = inner
            .directory
            .keys()
            .filter(|k| inner.ttl.get(k).map(|e| e > now).unwrap_or(true))
            .cloned()
            .collect();
        keys.into_iter()
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().directory.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deletes every key whose TTL has elapsed as of now, in TTL-index (key)
    /// order. Returns the number of keys removed.
    pub fn run_gc(&self) -> Result<usize> {
        let mut inner = self.inner.write().unwrap();
        let expired = inner.ttl.expired_as_of(Utc::now());
        for key in &expired {
            inner.delete_locked(key)?;
        }
        Ok(expired.len())
    }

    pub fn sync(&self) -> Result<()> {
        let inner = self.inner.read().unwrap();
        inner.meta.save(&self.path)?;
        inner.current().sync()
    }

    /// Persists the indexes and metadata, marks the index up to date, and
    /// releases every datafile handle (and, once `self` is dropped at the
    /// end of this call, the directory lockfile) regardless of whether the
    /// persistence step failed.
    pub fn close(self) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        inner.checkpoint_indexes()?;
        inner.meta.index_up_to_date = true;
        inner.meta.save(&self.path)?;
        Ok(())
    }

    pub fn stats(&self) -> Stats {
        let inner = self.inner.read().unwrap();
        Stats {
            datafiles: inner.sealed.len() + 1,
            keys: inner.directory.len(),
            reclaimable: inner.meta.reclaimable_space,
        }
    }

    pub fn reclaimable(&self) -> u64 {
        self.inner.read().unwrap().meta.reclaimable_space
    }

    /// Copies every datafile (other than the lockfile) to `target`, which is
    /// created if it doesn't exist. A best-effort, point-in-time directory
    /// copy: it is not crash-safe against concurrent writers the way the
    /// datafile log itself is, since it doesn't go through the write lock
    /// for its whole duration.
    pub fn backup(&self, target: impl AsRef<Path>) -> Result<()> {
        let target = target.as_ref();
        let _inner = self.inner.read().unwrap();
        fs::create_dir_all(target)?;
        for entry in fs::read_dir(&self.path)? {
            let entry = entry?;
            if entry.file_name() == "lock" {
                continue;
            }
            let src = entry.path();
            if src.is_file() {
                fs::copy(&src, target.join(entry.file_name()))?;
            }
        }
        Ok(())
    }

    /// Rewrites the datafile log to contain only the current live value of
    /// every key, reclaiming space held by superseded versions and
    /// tombstones. Writes continue to be accepted while the merge copies
    /// existing data; anything written during that window is preserved
    /// rather than merged.
    pub fn merge(&self) -> Result<()> {
        {
            let mut inner = self.inner.write().unwrap();
            if inner.is_merging {
                return Err(Error::MergeInProgress);
            }
            inner.is_merging = true;
        }

        let result = self.merge_body();

        if result.is_err() {
            let mut inner = self.inner.write().unwrap();
            inner.is_merging = false;
        }
        result
    }

    fn merge_body(&self) -> Result<()> {
        // Seal the current datafile and open a new one outside the merge
        // set, so writes during the copy phase land somewhere the merge
        // loop below knows to skip.
        let files_to_merge: Vec<FileId> = {
            let mut inner = self.inner.write().unwrap();
            let new_id = inner.next_file_id();
            inner.rotate_to(new_id)?;
            inner.sealed.keys().copied().collect()
        };
        let max_merged = files_to_merge.iter().copied().max().unwrap_or(0);

        let temp_dir = self.path.join(format!(".merge-{max_merged}"));
        if temp_dir.exists() {
            fs::remove_dir_all(&temp_dir)?;
        }
        fs::create_dir_all(&temp_dir)?;

        let overrides = {
            let inner = self.inner.read().unwrap();
            ConfigOverrides {
                max_key_size: Some(inner.config.max_key_size),
                max_value_size: Some(inner.config.max_value_size),
                max_datafile_size: Some(inner.config.max_datafile_size),
                sync: Some(inner.config.sync),
                auto_recovery: Some(inner.config.auto_recovery),
                dir_file_mode_before_umask: Some(inner.config.dir_file_mode_before_umask),
                file_file_mode_before_umask: Some(inner.config.file_file_mode_before_umask),
            }
        };
        let temp = Bitcask::open(&temp_dir, overrides)?;

        let snapshot: Vec<(Vec<u8>, Item)> = {
            let inner = self.inner.read().unwrap();
            inner.directory.iter().map(|(k, v)| (k.clone(), *v)).collect()
        };

        for (key, item) in snapshot {
            if item.file_id > max_merged {
                // Written after the merge began; the live file already
                // holds it and it'll survive the deletion pass below.
                continue;
            }
            let copy = {
                let inner = self.inner.read().unwrap();
                inner.merge_copy_one(&key, item)?
            };
            if let Some((value, expiry)) = copy {
                temp.put(&key, &value, PutOptions { expiry })?;
            }
        }

        temp.close()?;

        {
            let mut inner = self.inner.write().unwrap();
            for (_, df) in std::mem::take(&mut inner.sealed) {
                df.close()?;
            }
            if let Some(current) = inner.current.take() {
                current.close()?;
            }
        }

        // Delete every file except the lockfile and datafiles written after
        // the merge began, tracking the next free FileID so the merged
        // files renamed in below can't collide with a surviving one.
        let mut next_merged_id = max_merged + 1;
        for entry in fs::read_dir(&self.path)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name == "lock" {
                continue;
            }
            if let Some(file_id) = datafile::parse_file_id(&name) {
                if file_id > max_merged {
                    next_merged_id = next_merged_id.max(file_id + 1);
                    continue;
                }
            }
            let p = entry.path();
            if p.is_dir() {
                fs::remove_dir_all(p)?;
            } else {
                fs::remove_file(p)?;
            }
        }

        // Rename the merged datafiles in under fresh FileIDs. The merged
        // index/metadata are deliberately not carried over: they only
        // describe keys as of merge start, not whatever landed on the live
        // file opened above. Leaving no persisted index behind forces the
        // next Reopen to replay every remaining datafile in ascending
        // order, which reconstructs the directory correctly either way.
        let mut temp_ids = datafile::list_file_ids(&temp_dir)?;
        temp_ids.sort_unstable();
        for old_id in temp_ids {
            let new_id = next_merged_id;
            next_merged_id += 1;
            fs::rename(datafile::datafile_path(&temp_dir, old_id), datafile::datafile_path(&self.path, new_id))?;
        }
        fs::remove_dir_all(&temp_dir)?;

        {
            let mut inner = self.inner.write().unwrap();
            inner.config.save(&self.path)?;
            let meta = Metadata { reclaimable_space: 0, index_up_to_date: false, db_version: inner.config.db_version };
            meta.save(&self.path)?;
            inner.is_merging = false;
        }

        self.reopen()
    }
}

impl Drop for Bitcask {
    fn drop(&mut self) {
        if let Ok(inner) = self.inner.read() {
            if let Err(e) = inner.current().sync() {
                log::error!("failed to sync current datafile on drop: {e}");
            }
        }
    }
}

/// Truncates a torn trailing record left by a crash mid-write, found in the
/// highest-numbered (and therefore most recently active) datafile.
fn truncate_torn_tail(path: &Path, with_trailer: bool) -> Result<()> {
    let file_ids = datafile::list_file_ids(path)?;
    let Some(&last_id) = file_ids.last() else {
        return Ok(());
    };

    let file_path = datafile::datafile_path(path, last_id);
    let file = fs::OpenOptions::new().read(true).write(true).open(&file_path)?;
    let len = file.metadata()?.len();

    let mut reader = std::io::BufReader::new(&file);
    let mut offset = 0u64;
    loop {
        match crate::codec::decode_stream(&mut reader, with_trailer) {
            Ok(Some((_, n))) => offset += n,
            Ok(None) => break,
            Err(_) => break,
        }
    }

    if offset < len {
        log::warn!("truncating torn tail of datafile {last_id}: {len} bytes on disk, {offset} bytes of valid records");
        file.set_len(offset)?;
    }
    Ok(())
}

/// Replays every record in datafile `file_id`, applying it to `directory`
/// and `ttl` in on-disk order (a tombstone removes the key; anything else
/// records its location, overwriting whatever came before).
fn replay_into(directory: &mut Directory, ttl: &mut TtlIndex, path: &Path, file_id: FileId, with_trailer: bool) -> Result<()> {
    let mut df = Datafile::open_sealed(path, file_id, with_trailer)?;
    let mut offset = 0u64;
    while let Some((entry, n)) = df.read()? {
        if entry.is_tombstone() {
            directory.remove(&entry.key);
            ttl.remove(&entry.key);
        } else {
            directory.insert(entry.key.clone(), Item { file_id, offset, size: n });
            ttl.remove(&entry.key);
            if let Some(expiry) = entry.expiry {
                ttl.insert(entry.key.clone(), expiry);
            }
        }
        offset += n;
    }
    Ok(())
}

/// Derives the full in-memory datafile/directory/TTL state for `path`:
/// opens the highest FileID as the writable current file and the rest as
/// sealed, then either trusts a persisted index (if metadata says it's up
/// to date), replays just the current file on top of a stale-but-present
/// index, or replays every datafile from scratch.
fn reopen_state(path: &Path, config: &Config, meta: &Metadata) -> Result<(Datafile, BTreeMap<FileId, Datafile>, Directory, TtlIndex)> {
    let with_trailer = config.db_version >= 1;
    let mut file_ids = datafile::list_file_ids(path)?;
    file_ids.sort_unstable();

    let current_id = file_ids.last().copied().unwrap_or(0);

    let mut sealed = BTreeMap::new();
    for &id in &file_ids {
        if id != current_id {
            sealed.insert(id, Datafile::open_sealed(path, id, with_trailer)?);
        }
    }
    let current = Datafile::create_writable(path, current_id, with_trailer)?;

    let (mut directory, dir_found): (Directory, bool) = index::load(&path.join(INDEX_FILE))?;
    let (mut ttl, _): (TtlIndex, bool) = index::load(&path.join(TTL_INDEX_FILE))?;

    if dir_found && meta.index_up_to_date {
        log::info!("trusting persisted index ({} keys)", directory.len());
    } else if dir_found {
        log::info!("persisted index is stale; replaying datafile {current_id}");
        replay_into(&mut directory, &mut ttl, path, current_id, with_trailer)?;
    } else {
        log::info!("no persisted index; replaying {} datafiles", file_ids.len());
        directory = Directory::new();
        ttl = TtlIndex::new();
        for &id in &file_ids {
            replay_into(&mut directory, &mut ttl, path, id, with_trailer)?;
        }
    }

    Ok((current, sealed, directory, ttl))
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn open(dir: &tempfile::TempDir) -> Bitcask {
        Bitcask::open(dir.path(), ConfigOverrides::default()).unwrap()
    }

    /// Tests that size-bound validation accepts/rejects at the boundary.
    #[test_case(0, 0, 10, 10 => true; "unlimited bounds always fit")]
    #[test_case(10, 0, 10, 10 => true; "key at limit fits")]
    #[test_case(10, 0, 11, 10 => false; "key over limit rejected")]
    #[test_case(0, 10, 10, 10 => true; "value at limit fits")]
    #[test_case(0, 10, 10, 11 => false; "value over limit rejected")]
    #[test_case(10, 10, 11, 5 => false; "key over limit rejected even if value fits")]
    fn put_respects_size_bounds(max_key: u32, max_value: u64, key_len: usize, value_len: usize) -> bool {
        let dir = tempfile::tempdir().unwrap();
        let overrides = ConfigOverrides {
            max_key_size: Some(max_key),
            max_value_size: Some(max_value),
            ..Default::default()
        };
        let db = Bitcask::open(dir.path(), overrides).unwrap();
        let key = vec![b'k'; key_len];
        let value = vec![b'v'; value_len];
        db.put(&key, &value, PutOptions::default()).is_ok()
    }

    #[test]
    fn put_then_get_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let db = open(&dir);
        db.put(b"k", b"v", PutOptions::default()).unwrap();
        assert_eq!(db.get(b"k").unwrap(), b"v");
    }

    #[test]
    fn get_missing_key_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let db = open(&dir);
        assert!(matches!(db.get(b"missing"), Err(Error::KeyNotFound)));
    }

    #[test]
    fn overwrite_is_last_writer_wins() {
        let dir = tempfile::tempdir().unwrap();
        let db = open(&dir);
        db.put(b"k", b"v1", PutOptions::default()).unwrap();
        db.put(b"k", b"v2", PutOptions::default()).unwrap();
        assert_eq!(db.get(b"k").unwrap(), b"v2");
        assert_eq!(db.len(), 1);
    }

    #[test]
    fn empty_key_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let db = open(&dir);
        assert!(matches!(db.put(b"", b"v", PutOptions::default()), Err(Error::EmptyKey)));
    }

    #[test]
    fn delete_then_get_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let db = open(&dir);
        db.put(b"k", b"v", PutOptions::default()).unwrap();
        db.delete(b"k").unwrap();
        assert!(matches!(db.get(b"k"), Err(Error::KeyNotFound)));
        assert_eq!(db.len(), 0);
    }

    #[test]
    fn delete_of_absent_key_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let db = open(&dir);
        db.delete(b"never-existed").unwrap();
    }

    #[test]
    fn expired_key_reports_expired_then_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let db = open(&dir);
        let expiry = Utc::now() - chrono::Duration::seconds(1);
        db.put(b"k", b"v", PutOptions { expiry: Some(expiry) }).unwrap();
        assert!(matches!(db.get(b"k"), Err(Error::KeyExpired)));
        assert!(matches!(db.get(b"k"), Err(Error::KeyNotFound)));
    }

    #[test]
    fn put_without_expiry_does_not_clear_existing_ttl() {
        let dir = tempfile::tempdir().unwrap();
        let db = open(&dir);
        let expiry = Utc::now() - chrono::Duration::seconds(1);
        db.put(b"k", b"v1", PutOptions { expiry: Some(expiry) }).unwrap();
        db.put(b"k", b"v2", PutOptions::default()).unwrap();
        assert!(matches!(db.get(b"k"), Err(Error::KeyExpired)));
    }

    #[test]
    fn run_gc_removes_expired_keys_and_reports_count() {
        let dir = tempfile::tempdir().unwrap();
        let db = open(&dir);
        let expiry = Utc::now() - chrono::Duration::seconds(1);
        db.put(b"a", b"1", PutOptions { expiry: Some(expiry) }).unwrap();
        db.put(b"b", b"2", PutOptions::default()).unwrap();
        assert_eq!(db.run_gc().unwrap(), 1);
        assert_eq!(db.len(), 1);
    }

    #[test]
    fn key_too_large_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let overrides = ConfigOverrides { max_key_size: Some(2), ..Default::default() };
        let db = Bitcask::open(dir.path(), overrides).unwrap();
        assert!(matches!(db.put(b"abc", b"v", PutOptions::default()), Err(Error::KeyTooLarge)));
    }

    #[test]
    fn scan_visits_matching_keys_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let db = open(&dir);
        for k in ["ab", "ac", "b", "abd"] {
            db.put(k.as_bytes(), b"v", PutOptions::default()).unwrap();
        }
        let mut seen = Vec::new();
        db.scan(b"ab", |k, _| {
            seen.push(k.to_vec());
            Ok(())
        })
        .unwrap();
        assert_eq!(seen, vec![b"ab".to_vec(), b"abd".to_vec()]);
    }

    #[test]
    fn delete_all_clears_every_key() {
        let dir = tempfile::tempdir().unwrap();
        let db = open(&dir);
        db.put(b"a", b"1", PutOptions::default()).unwrap();
        db.put(b"b", b"2", PutOptions::default()).unwrap();
        db.delete_all().unwrap();
        assert_eq!(db.len(), 0);
        assert!(db.is_empty());
    }

    #[test]
    fn reopen_recovers_state_without_a_persisted_index() {
        let dir = tempfile::tempdir().unwrap();
        {
            let db = open(&dir);
            db.put(b"a", b"1", PutOptions::default()).unwrap();
            db.put(b"b", b"2", PutOptions::default()).unwrap();
            db.delete(b"a").unwrap();
            // Deliberately not calling close(), so no index file is left
            // behind and the reopen below must replay the datafile log.
        }
        let db = open(&dir);
        assert_eq!(db.get(b"b").unwrap(), b"2");
        assert!(matches!(db.get(b"a"), Err(Error::KeyNotFound)));
    }

    #[test]
    fn reopen_trusts_persisted_index_after_close() {
        let dir = tempfile::tempdir().unwrap();
        {
            let db = open(&dir);
            db.put(b"a", b"1", PutOptions::default()).unwrap();
            db.close().unwrap();
        }
        let db = open(&dir);
        assert_eq!(db.get(b"a").unwrap(), b"1");
    }

    #[test]
    fn second_open_of_same_directory_is_locked() {
        let dir = tempfile::tempdir().unwrap();
        let _first = open(&dir);
        let second = Bitcask::open(dir.path(), ConfigOverrides::default());
        assert!(matches!(second, Err(Error::DatabaseLocked)));
    }

    #[test]
    fn rotation_grows_the_datafile_set() {
        let dir = tempfile::tempdir().unwrap();
        let overrides = ConfigOverrides { max_datafile_size: Some(1), ..Default::default() };
        let db = Bitcask::open(dir.path(), overrides).unwrap();
        db.put(b"a", b"1", PutOptions::default()).unwrap();
        db.put(b"b", b"2", PutOptions::default()).unwrap();
        assert!(db.stats().datafiles >= 2);
        assert_eq!(db.get(b"a").unwrap(), b"1");
        assert_eq!(db.get(b"b").unwrap(), b"2");
    }

    #[test]
    fn merge_preserves_live_values_and_resets_reclaimable_space() {
        let dir = tempfile::tempdir().unwrap();
        let db = open(&dir);
        db.put(b"a", b"1", PutOptions::default()).unwrap();
        db.put(b"a", b"2", PutOptions::default()).unwrap();
        db.put(b"b", b"x", PutOptions::default()).unwrap();
        db.delete(b"b").unwrap();
        db.put(b"c", b"3", PutOptions::default()).unwrap();
        assert!(db.reclaimable() > 0);

        db.merge().unwrap();

        assert_eq!(db.get(b"a").unwrap(), b"2");
        assert!(matches!(db.get(b"b"), Err(Error::KeyNotFound)));
        assert_eq!(db.get(b"c").unwrap(), b"3");
        assert_eq!(db.reclaimable(), 0);
    }

    #[test]
    fn merge_while_already_merging_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let db = open(&dir);
        db.put(b"a", b"1", PutOptions::default()).unwrap();
        {
            let mut inner = db.inner.write().unwrap();
            inner.is_merging = true;
        }
        assert!(matches!(db.merge(), Err(Error::MergeInProgress)));
    }
}
