//! # Memtable
//!
//! Ordered in-memory buffer of the most recent mutations.
//!
//! A primary applies every committed write here after appending it to the
//! WAL. A secondary rebuilds its own memtable by replaying the primary's live
//! WAL during catch-up, so both see the same unflushed state.
//!
//! Deletes are stored as tombstones (`value == None`) so they keep shadowing
//! older values that live in tables on disk.

use std::collections::BTreeMap;

/// The sequence number and optional value stored for a key.
/// `value == None` signifies a tombstone (delete).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueEntry {
    pub seq: u64,
    pub value: Option<Vec<u8>>,
}

impl ValueEntry {
    #[must_use]
    pub fn is_tombstone(&self) -> bool {
        self.value.is_none()
    }

    fn footprint(key: &[u8], value: Option<&Vec<u8>>) -> usize {
        key.len() + value.map_or(0, |v| v.len())
    }
}

#[derive(Debug, Clone, Default)]
pub struct Memtable {
    map: BTreeMap<Vec<u8>, ValueEntry>,
    /// Sum of key and value bytes of the entries currently held.
    approx_size: usize,
    /// Highest sequence number ever applied (survives overwrites).
    max_seq: u64,
}

impl Memtable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value` under `key` unless an entry with an equal or newer
    /// `seq` is already present.
    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>, seq: u64) {
        self.upsert(key, Some(value), seq);
    }

    /// Writes a tombstone for `key` at `seq`. Same staleness rule as [`put`](Self::put).
    pub fn delete(&mut self, key: Vec<u8>, seq: u64) {
        self.upsert(key, None, seq);
    }

    fn upsert(&mut self, key: Vec<u8>, value: Option<Vec<u8>>, seq: u64) {
        if let Some(old) = self.map.get(&key) {
            if old.seq >= seq {
                return;
            }
            let old_size = ValueEntry::footprint(&key, old.value.as_ref());
            self.approx_size = self.approx_size.saturating_sub(old_size);
        }

        self.approx_size += ValueEntry::footprint(&key, value.as_ref());
        self.max_seq = self.max_seq.max(seq);
        self.map.insert(key, ValueEntry { seq, value });
    }

    /// Latest live value for `key`; `None` when missing or deleted.
    pub fn get(&self, key: &[u8]) -> Option<(u64, Vec<u8>)> {
        self.map
            .get(key)
            .and_then(|e| e.value.as_ref().map(|v| (e.seq, v.clone())))
    }

    /// Raw entry for `key`, tombstones included.
    pub fn get_entry(&self, key: &[u8]) -> Option<&ValueEntry> {
        self.map.get(key)
    }

    /// `true` if the key has any entry, live or tombstone.
    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.map.contains_key(key)
    }

    /// Ordered iterator over `(key, entry)` pairs, tombstones included.
    pub fn iter(&self) -> impl Iterator<Item = (&Vec<u8>, &ValueEntry)> {
        self.map.iter()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn approx_size(&self) -> usize {
        self.approx_size
    }

    /// Highest sequence number applied since creation or the last [`clear`](Self::clear).
    pub fn max_seq(&self) -> u64 {
        self.max_seq
    }

    /// Drops every entry and resets the size and sequence counters.
    pub fn clear(&mut self) {
        self.map.clear();
        self.approx_size = 0;
        self.max_seq = 0;
    }
}

#[cfg(test)]
mod tests;
