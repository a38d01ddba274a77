//! Crate-wide error type.
//!
//! Mirrors the error kinds a caller can observe per the on-disk contract:
//! validation failures are reported synchronously and never mutate state,
//! while I/O and codec failures are passed through transparently.

use std::io;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Looked up a key that has no current binding in the directory.
    #[error("key not found")]
    KeyNotFound,

    /// The key's current entry carries an expiry that has already elapsed.
    #[error("key has expired")]
    KeyExpired,

    /// Key length exceeds the configured `MaxKeySize`.
    #[error("key too large")]
    KeyTooLarge,

    /// Key is the empty byte sequence, which is never a valid key.
    #[error("key must not be empty")]
    EmptyKey,

    /// Value length exceeds the configured `MaxValueSize`.
    #[error("value too large")]
    ValueTooLarge,

    /// A record's stored CRC did not match the CRC computed over its value.
    #[error("checksum mismatch: record is corrupt")]
    ChecksumFailed,

    /// A record failed to decode for a reason other than a checksum
    /// mismatch: a short read, or a header that claims a size the
    /// remaining file can't satisfy.
    #[error("corrupt record: {0}")]
    CorruptRecord(String),

    /// Another process already holds the database's lockfile.
    #[error("database is locked by another process")]
    DatabaseLocked,

    /// The on-disk `DBVersion` is newer than this build understands.
    #[error("database version {found} is newer than the supported version {supported}")]
    InvalidVersion { found: u32, supported: u32 },

    /// A merge was requested while one was already in progress.
    #[error("merge already in progress")]
    MergeInProgress,

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("config/metadata (de)serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// True for errors that leave the engine's in-memory state unchanged
    /// and require no recovery action from the caller beyond retrying.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Error::KeyTooLarge | Error::EmptyKey | Error::ValueTooLarge
        )
    }
}
