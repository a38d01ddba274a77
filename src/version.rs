//! Forward-only on-disk version upgrades.
//!
//! The only migration currently defined is v0 -> v1, which appends the
//! reserved 8-byte trailer introduced by DB version 1 to every record in
//! every existing datafile. Downgrades are never supported: an on-disk
//! version newer than what this build understands is a hard error.

use std::fs;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use crate::codec;
use crate::datafile;
use crate::error::{Error, Result};

pub const CURRENT_DB_VERSION: u32 = 1;

/// Rejects an on-disk version this build doesn't understand. Versions
/// older than `CURRENT_DB_VERSION` are handled by `upgrade`, not here.
pub fn reject_unsupported(found: u32) -> Result<()> {
    if found > CURRENT_DB_VERSION {
        return Err(Error::InvalidVersion { found, supported: CURRENT_DB_VERSION });
    }
    Ok(())
}

/// Upgrades every datafile under `path` from `from_version` up to
/// `CURRENT_DB_VERSION`. A no-op when already current.
pub fn upgrade(path: &Path, from_version: u32) -> Result<()> {
    reject_unsupported(from_version)?;
    if from_version >= CURRENT_DB_VERSION {
        return Ok(());
    }
    // Only v0 -> v1 is defined today; the loop is structured so a future
    // v1 -> v2 step could be inserted without touching the v0 -> v1 logic.
    if from_version == 0 {
        upgrade_v0_to_v1(path)?;
    }
    Ok(())
}

fn upgrade_v0_to_v1(path: &Path) -> Result<()> {
    let mut file_ids: Vec<_> = fs::read_dir(path)?
        .filter_map(|e| e.ok())
        .filter_map(|e| e.file_name().into_string().ok())
        .filter_map(|name| datafile::parse_file_id(&name))
        .collect();
    file_ids.sort_unstable();

    for file_id in file_ids {
        let src_path = datafile::datafile_path(path, file_id);
        let tmp_path = src_path.with_extension("data.upgrade");

        {
            let src = fs::OpenOptions::new().read(true).open(&src_path)?;
            let mut reader = BufReader::new(src);
            let dst = fs::OpenOptions::new().write(true).create(true).truncate(true).open(&tmp_path)?;
            let mut writer = BufWriter::new(dst);

            while let Some((entry, _)) = codec::decode_stream(&mut reader, false)? {
                let (bytes, _) = codec::encode(&entry, true);
                writer.write_all(&bytes)?;
            }
            writer.flush()?;
        }

        fs::rename(&tmp_path, &src_path)?;
    }
    Ok(())
}
