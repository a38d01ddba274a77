//! The in-memory key directory and its parallel TTL index.
//!
//! Both are ordered maps keyed on raw key bytes with prefix-iteration
//! support. The spec's "adaptive radix tree, treated as an ordered map
//! with prefix iteration" is realized here with a plain `BTreeMap`, which
//! satisfies the same point insert/delete/search, ordered iteration, and
//! prefix-filtered ordered iteration contract the engine needs.

use std::collections::BTreeMap;
use std::ops::Bound;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::datafile::FileId;

/// Points at the most recent on-disk record for a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub file_id: FileId,
    pub offset: u64,
    pub size: u64,
}

/// Computes the exclusive upper bound of the key range sharing `prefix`,
/// i.e. the smallest key that is strictly greater than every key starting
/// with `prefix`. Returns `Bound::Unbounded` when `prefix` is all `0xFF`
/// bytes (or empty), since no such upper bound exists.
fn prefix_upper_bound(prefix: &[u8]) -> Bound<Vec<u8>> {
    let mut end = prefix.to_vec();
    while let Some(&last) = end.last() {
        if last == 0xFF {
            end.pop();
        } else {
            let len = end.len();
            end[len - 1] += 1;
            return Bound::Excluded(end);
        }
    }
    Bound::Unbounded
}

/// The ordered key -> on-disk-location directory.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Directory {
    map: BTreeMap<Vec<u8>, Item>,
}

impl Directory {
    pub fn new() -> Self {
        Self { map: BTreeMap::new() }
    }

    pub fn get(&self, key: &[u8]) -> Option<Item> {
        self.map.get(key).copied()
    }

    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.map.contains_key(key)
    }

    pub fn insert(&mut self, key: Vec<u8>, item: Item) -> Option<Item> {
        self.map.insert(key, item)
    }

    pub fn remove(&mut self, key: &[u8]) -> Option<Item> {
        self.map.remove(key)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Vec<u8>, &Item)> {
        self.map.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &Vec<u8>> {
        self.map.keys()
    }

    /// Iterates keys with the given `prefix` in ascending order, skipping
    /// the empty root key a radix tree would otherwise expose.
    pub fn prefix_iter<'a>(&'a self, prefix: &'a [u8]) -> impl Iterator<Item = (&'a Vec<u8>, &'a Item)> {
        let start = Bound::Included(prefix.to_vec());
        let end = prefix_upper_bound(prefix);
        self.map
            .range((start, end))
            .filter(move |(k, _)| !k.is_empty() && k.starts_with(prefix))
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }
}

/// The ordered key -> expiry TTL index, maintained in lockstep with the
/// directory for every key whose current entry carries an expiry.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TtlIndex {
    map: BTreeMap<Vec<u8>, DateTime<Utc>>,
}

impl TtlIndex {
    pub fn new() -> Self {
        Self { map: BTreeMap::new() }
    }

    pub fn get(&self, key: &[u8]) -> Option<DateTime<Utc>> {
        self.map.get(key).copied()
    }

    pub fn insert(&mut self, key: Vec<u8>, expiry: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.map.insert(key, expiry)
    }

    pub fn remove(&mut self, key: &[u8]) -> Option<DateTime<Utc>> {
        self.map.remove(key)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Vec<u8>, &DateTime<Utc>)> {
        self.map.iter()
    }

    /// Keys (in key order) whose expiry is at or before `now`.
    pub fn expired_as_of(&self, now: DateTime<Utc>) -> Vec<Vec<u8>> {
        self.map
            .iter()
            .filter(|(_, expiry)| **expiry <= now)
            .map(|(k, _)| k.clone())
            .collect()
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }
}
