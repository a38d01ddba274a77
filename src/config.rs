//! Persisted configuration: `<path>/config.json`.
//!
//! Kept deliberately simple per spec.md's "configuration loading and
//! persistence" non-goal — a flat struct and `serde_json`, no layered
//! environment/CLI sources.

use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::version::CURRENT_DB_VERSION;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Maximum key length in bytes; `0` means unlimited.
    #[serde(rename = "MaxKeySize")]
    pub max_key_size: u32,
    /// Maximum value length in bytes; `0` means unlimited.
    #[serde(rename = "MaxValueSize")]
    pub max_value_size: u64,
    /// Rotation threshold for the current datafile, in bytes.
    #[serde(rename = "MaxDatafileSize")]
    pub max_datafile_size: u64,
    /// Fsync the current datafile after every `Put`.
    #[serde(rename = "Sync")]
    pub sync: bool,
    /// Truncate a trailing torn record found on `Open`.
    #[serde(rename = "AutoRecovery")]
    pub auto_recovery: bool,
    /// Permission bits (before umask) for directories created by the
    /// engine.
    #[serde(rename = "DirFileModeBeforeUmask")]
    pub dir_file_mode_before_umask: u32,
    /// Permission bits (before umask) for files created by the engine.
    #[serde(rename = "FileFileModeBeforeUmask")]
    pub file_file_mode_before_umask: u32,
    /// On-disk layout version.
    #[serde(rename = "DBVersion")]
    pub db_version: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_key_size: 0,
            max_value_size: 0,
            max_datafile_size: 1 << 30, // 1 GiB
            sync: false,
            auto_recovery: true,
            dir_file_mode_before_umask: 0o755,
            file_file_mode_before_umask: 0o644,
            db_version: CURRENT_DB_VERSION,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        match fs::read(config_path(path)) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(self)?;
        fs::write(config_path(path), bytes)?;
        Ok(())
    }

    pub fn apply(&mut self, overrides: &ConfigOverrides) {
        if let Some(v) = overrides.max_key_size {
            self.max_key_size = v;
        }
        if let Some(v) = overrides.max_value_size {
            self.max_value_size = v;
        }
        if let Some(v) = overrides.max_datafile_size {
            self.max_datafile_size = v;
        }
        if let Some(v) = overrides.sync {
            self.sync = v;
        }
        if let Some(v) = overrides.auto_recovery {
            self.auto_recovery = v;
        }
        if let Some(v) = overrides.dir_file_mode_before_umask {
            self.dir_file_mode_before_umask = v;
        }
        if let Some(v) = overrides.file_file_mode_before_umask {
            self.file_file_mode_before_umask = v;
        }
    }
}

fn config_path(path: &Path) -> std::path::PathBuf {
    path.join("config.json")
}

/// Caller-supplied overrides applied on top of the persisted (or default)
/// config during `Open`.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub max_key_size: Option<u32>,
    pub max_value_size: Option<u64>,
    pub max_datafile_size: Option<u64>,
    pub sync: Option<bool>,
    pub auto_recovery: Option<bool>,
    pub dir_file_mode_before_umask: Option<u32>,
    pub file_file_mode_before_umask: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_has_unlimited_key_and_value_sizes() {
        let c = Config::default();
        assert_eq!(c.max_key_size, 0);
        assert_eq!(c.max_value_size, 0);
    }

    #[test]
    fn save_then_load_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = Config::default();
        cfg.max_key_size = 128;
        cfg.save(dir.path()).unwrap();
        let loaded = Config::load(dir.path()).unwrap();
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn load_missing_file_returns_default() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = Config::load(dir.path()).unwrap();
        assert_eq!(loaded, Config::default());
    }

    #[test]
    fn apply_only_overrides_set_fields() {
        let mut cfg = Config::default();
        let overrides = ConfigOverrides { sync: Some(true), ..Default::default() };
        cfg.apply(&overrides);
        assert!(cfg.sync);
        assert_eq!(cfg.max_key_size, 0);
    }
}
