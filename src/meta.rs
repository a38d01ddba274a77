//! Persisted database metadata: `<path>/meta.json`.

use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::version::CURRENT_DB_VERSION;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(rename = "ReclaimableSpace")]
    pub reclaimable_space: u64,
    #[serde(rename = "IndexUpToDate")]
    pub index_up_to_date: bool,
    #[serde(rename = "DBVersion")]
    pub db_version: u32,
}

impl Default for Metadata {
    fn default() -> Self {
        Self { reclaimable_space: 0, index_up_to_date: false, db_version: CURRENT_DB_VERSION }
    }
}

impl Metadata {
    /// Loads `<path>/meta.json`, or returns the default metadata if the
    /// file does not exist yet (a brand-new database directory).
    pub fn load(path: &Path) -> Result<Self> {
        match fs::read(meta_path(path)) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(self)?;
        fs::write(meta_path(path), bytes)?;
        Ok(())
    }
}

fn meta_path(path: &Path) -> std::path::PathBuf {
    path.join("meta.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_not_up_to_date_and_has_no_reclaimable_space() {
        let m = Metadata::default();
        assert_eq!(m.reclaimable_space, 0);
        assert!(!m.index_up_to_date);
        assert_eq!(m.db_version, CURRENT_DB_VERSION);
    }

    #[test]
    fn save_then_load_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let meta = Metadata { reclaimable_space: 42, index_up_to_date: true, db_version: 1 };
        meta.save(dir.path()).unwrap();
        let loaded = Metadata::load(dir.path()).unwrap();
        assert_eq!(loaded, meta);
    }

    #[test]
    fn load_missing_file_returns_default() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = Metadata::load(dir.path()).unwrap();
        assert_eq!(loaded, Metadata::default());
    }
}
