//! On-disk record encoding.
//!
//! A single logical [`Entry`] is encoded as a fixed-size header followed by
//! the key bytes and the value bytes:
//!
//! ```text
//! KeySize: u32 | ValueSize: u64 | Checksum: u32 | Expiry: i64 | key | value
//! ```
//!
//! All header fields are little-endian. `Checksum` is the CRC-32/IEEE of the
//! value bytes only. `Expiry` is a Unix-nanosecond UTC timestamp, with `0`
//! meaning "no expiry". Database version 1 appends 8 reserved trailing
//! zero bytes after every record (the v0 -> v1 on-disk migration).

use std::io::{self, Read};

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};

pub const KEY_SIZE_LEN: usize = 4;
pub const VALUE_SIZE_LEN: usize = 8;
pub const CRC_LEN: usize = 4;
pub const EXPIRY_LEN: usize = 8;

/// Size of the fixed record header, used for reclaimable-space accounting.
pub const META_INFO_SIZE: usize = KEY_SIZE_LEN + VALUE_SIZE_LEN + CRC_LEN + EXPIRY_LEN;

/// Number of reserved trailing bytes appended per record from DB version 1
/// onward.
pub const TRAILER_SIZE: usize = 8;

/// A single logical record: a key, its value (empty denotes a tombstone),
/// and an optional absolute expiry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub expiry: Option<DateTime<Utc>>,
}

impl Entry {
    pub fn new(key: Vec<u8>, value: Vec<u8>, expiry: Option<DateTime<Utc>>) -> Self {
        Self { key, value, expiry }
    }

    /// A tombstone entry: same key, empty value, no expiry.
    pub fn tombstone(key: Vec<u8>) -> Self {
        Self { key, value: Vec::new(), expiry: None }
    }

    pub fn is_tombstone(&self) -> bool {
        self.value.is_empty()
    }

    fn expiry_nanos(&self) -> i64 {
        self.expiry.map_or(0, |t| t.timestamp_nanos_opt().unwrap_or(0))
    }
}

/// Encodes `entry` into its on-disk byte representation. `with_trailer`
/// selects whether the DB-version-1 trailing 8 reserved bytes are appended.
/// Returns the encoded bytes and their length.
pub fn encode(entry: &Entry, with_trailer: bool) -> (Vec<u8>, u64) {
    let key_len = entry.key.len() as u32;
    let value_len = entry.value.len() as u64;
    let checksum = crc32fast::hash(&entry.value);
    let expiry = entry.expiry_nanos();

    let header_len = META_INFO_SIZE;
    let trailer_len = if with_trailer { TRAILER_SIZE } else { 0 };
    let total = header_len + entry.key.len() + entry.value.len() + trailer_len;

    let mut buf = Vec::with_capacity(total);
    buf.extend_from_slice(&key_len.to_le_bytes());
    buf.extend_from_slice(&value_len.to_le_bytes());
    buf.extend_from_slice(&checksum.to_le_bytes());
    buf.extend_from_slice(&expiry.to_le_bytes());
    buf.extend_from_slice(&entry.key);
    buf.extend_from_slice(&entry.value);
    if with_trailer {
        buf.extend_from_slice(&[0u8; TRAILER_SIZE]);
    }

    (buf, total as u64)
}

/// Decodes one record from a byte slice of exactly the expected total
/// length (as returned by a prior [`encode`]). Used for positional reads
/// (`Get`), where the directory already knows the exact on-disk size.
pub fn decode_at(buf: &[u8], with_trailer: bool) -> Result<Entry> {
    let entry = decode_header_and_body(buf)?;
    let expected_len = META_INFO_SIZE
        + entry.key.len()
        + entry.value.len()
        + if with_trailer { TRAILER_SIZE } else { 0 };
    if buf.len() != expected_len {
        return Err(Error::CorruptRecord(format!(
            "expected {expected_len} bytes, got {}",
            buf.len()
        )));
    }
    verify_checksum(buf, &entry)?;
    Ok(entry)
}

/// Reads and decodes the next record from a sequential reader, as used
/// during recovery replay and full-log scans. Returns `Ok(None)` at a
/// clean end-of-file (no bytes consumed). A short read into the middle of
/// a record is reported as `Error::CorruptRecord` so callers doing
/// recovery can distinguish "nothing here" from "a torn write here".
pub fn decode_stream<R: Read>(reader: &mut R, with_trailer: bool) -> Result<Option<(Entry, u64)>> {
    let mut header = [0u8; META_INFO_SIZE];
    match read_exact_or_eof(reader, &mut header)? {
        false => return Ok(None),
        true => {}
    }

    let key_len = u32::from_le_bytes(header[0..4].try_into().unwrap()) as usize;
    let value_len = u64::from_le_bytes(header[4..12].try_into().unwrap()) as usize;
    let checksum = u32::from_le_bytes(header[12..16].try_into().unwrap());
    let expiry_nanos = i64::from_le_bytes(header[16..24].try_into().unwrap());

    let mut key = vec![0u8; key_len];
    reader
        .read_exact(&mut key)
        .map_err(|e| torn_or_io("key", e))?;
    let mut value = vec![0u8; value_len];
    reader
        .read_exact(&mut value)
        .map_err(|e| torn_or_io("value", e))?;

    if with_trailer {
        let mut trailer = [0u8; TRAILER_SIZE];
        reader
            .read_exact(&mut trailer)
            .map_err(|e| torn_or_io("trailer", e))?;
    }

    let actual_checksum = crc32fast::hash(&value);
    if actual_checksum != checksum {
        return Err(Error::ChecksumFailed);
    }

    let expiry = decode_expiry(expiry_nanos);
    let total = (META_INFO_SIZE + key_len + value_len + if with_trailer { TRAILER_SIZE } else { 0 }) as u64;
    Ok(Some((Entry { key, value, expiry }, total)))
}

fn torn_or_io(field: &str, e: io::Error) -> Error {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        Error::CorruptRecord(format!("truncated while reading {field}"))
    } else {
        Error::Io(e)
    }
}

/// Like `Read::read_exact`, but treats a zero-byte read at the very start
/// as a clean EOF (`Ok(false)`) rather than an error, while a partial read
/// mid-record is still a genuine corruption.
fn read_exact_or_eof<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => {
                if filled == 0 {
                    return Ok(false);
                }
                return Err(Error::CorruptRecord("truncated record header".into()));
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(true)
}

fn decode_header_and_body(buf: &[u8]) -> Result<Entry> {
    if buf.len() < META_INFO_SIZE {
        return Err(Error::CorruptRecord("buffer shorter than header".into()));
    }
    let key_len = u32::from_le_bytes(buf[0..4].try_into().unwrap()) as usize;
    let value_len = u64::from_le_bytes(buf[4..12].try_into().unwrap()) as usize;
    let expiry_nanos = i64::from_le_bytes(buf[16..24].try_into().unwrap());

    let key_start = META_INFO_SIZE;
    let key_end = key_start
        .checked_add(key_len)
        .ok_or_else(|| Error::CorruptRecord("key length overflow".into()))?;
    let value_end = key_end
        .checked_add(value_len)
        .ok_or_else(|| Error::CorruptRecord("value length overflow".into()))?;
    if value_end > buf.len() {
        return Err(Error::CorruptRecord("record extends past buffer".into()));
    }

    let key = buf[key_start..key_end].to_vec();
    let value = buf[key_end..value_end].to_vec();
    let expiry = decode_expiry(expiry_nanos);
    Ok(Entry { key, value, expiry })
}

fn verify_checksum(buf: &[u8], entry: &Entry) -> Result<()> {
    let stored = u32::from_le_bytes(buf[12..16].try_into().unwrap());
    let actual = crc32fast::hash(&entry.value);
    if stored != actual {
        return Err(Error::ChecksumFailed);
    }
    Ok(())
}

fn decode_expiry(nanos: i64) -> Option<DateTime<Utc>> {
    if nanos == 0 {
        None
    } else {
        DateTime::from_timestamp_nanos(nanos).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(entry: Entry, with_trailer: bool) {
        let (bytes, n) = encode(&entry, with_trailer);
        assert_eq!(bytes.len() as u64, n);
        let decoded = decode_at(&bytes, with_trailer).expect("decode_at");
        assert_eq!(decoded, entry);

        let mut cursor = io::Cursor::new(bytes);
        let (streamed, read) = decode_stream(&mut cursor, with_trailer)
            .expect("decode_stream")
            .expect("some entry");
        assert_eq!(streamed, entry);
        assert_eq!(read, n);
    }

    #[test]
    fn roundtrip_simple_v0() {
        roundtrip(Entry::new(b"foo".to_vec(), b"bar".to_vec(), None), false);
    }

    #[test]
    fn roundtrip_simple_v1() {
        roundtrip(Entry::new(b"foo".to_vec(), b"bar".to_vec(), None), true);
    }

    #[test]
    fn roundtrip_tombstone() {
        roundtrip(Entry::tombstone(b"foo".to_vec()), true);
    }

    #[test]
    fn roundtrip_with_expiry() {
        let expiry = DateTime::from_timestamp_nanos(1_700_000_000_000_000_000);
        roundtrip(Entry::new(b"k".to_vec(), b"v".to_vec(), Some(expiry)), true);
    }

    #[test]
    fn decode_stream_clean_eof() {
        let mut cursor = io::Cursor::new(Vec::<u8>::new());
        let result = decode_stream(&mut cursor, true).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn decode_stream_torn_header_is_corrupt() {
        let mut cursor = io::Cursor::new(vec![1, 2, 3]);
        let err = decode_stream(&mut cursor, true).unwrap_err();
        assert!(matches!(err, Error::CorruptRecord(_)));
    }

    #[test]
    fn decode_at_checksum_mismatch() {
        let entry = Entry::new(b"k".to_vec(), b"v".to_vec(), None);
        let (mut bytes, _) = encode(&entry, true);
        // Corrupt a value byte without touching the stored checksum.
        let value_offset = META_INFO_SIZE + entry.key.len();
        bytes[value_offset] ^= 0xFF;
        let err = decode_at(&bytes, true).unwrap_err();
        assert!(matches!(err, Error::ChecksumFailed));
    }

    #[test]
    fn decode_at_wrong_size_is_corrupt() {
        let entry = Entry::new(b"k".to_vec(), b"v".to_vec(), None);
        let (mut bytes, _) = encode(&entry, true);
        bytes.push(0);
        let err = decode_at(&bytes, true).unwrap_err();
        assert!(matches!(err, Error::CorruptRecord(_)));
    }
}
