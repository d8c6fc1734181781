//! Read path: `get()` and `scan()`.
//!
//! Point lookups check the memtable first, then L0 tables (newest first, may
//! overlap), then L1. The first match wins and tombstones shadow older values.
//!
//! Range scans merge every source, keep the highest sequence number per key
//! and drop tombstones.
//!
//! `lookup` / `range` read the state as it is. `get` / `scan` first apply the
//! secondary catch-up policy and retry lookups that lost a race with the
//! primary deleting a table.

use config::CatchUpPolicy;
use memtable::ValueEntry;
use std::collections::BTreeMap;
use tracing::debug;

use crate::catchup::MAX_CATCH_UP_ATTEMPTS;
use crate::error::Result;
use crate::Engine;

fn live(entry: ValueEntry) -> Option<(u64, Vec<u8>)> {
    entry.value.map(|v| (entry.seq, v))
}

impl Engine {
    /// Looks up a key, returning `Some((seq, value))` if found and live.
    ///
    /// On a secondary with [`CatchUpPolicy::OnRead`] this refreshes first.
    pub fn get(&mut self, key: &[u8]) -> Result<Option<(u64, Vec<u8>)>> {
        self.refresh_for_read()?;
        self.with_race_retry(|engine| engine.lookup(key))
    }

    /// Live `(key, value)` pairs with `start <= key < end`, ascending. An
    /// empty bound is open.
    pub fn scan(&mut self, start: &[u8], end: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        self.refresh_for_read()?;
        self.with_race_retry(|engine| engine.range(start, end))
    }

    /// Catch-up step taken before a read, according to the policy.
    pub(crate) fn refresh_for_read(&mut self) -> Result<()> {
        if self.is_secondary() && self.config.catch_up == CatchUpPolicy::OnRead {
            self.try_catch_up()?;
        }
        Ok(())
    }

    fn with_race_retry<T, F>(&mut self, mut read: F) -> Result<T>
    where
        F: FnMut(&Engine) -> Result<T>,
    {
        let mut attempts = 1;
        loop {
            match read(&*self) {
                Err(e) if self.is_secondary() && e.is_retryable_race() && attempts < MAX_CATCH_UP_ATTEMPTS => {
                    debug!(target: "tidepool::read", error = %e, attempts, "read raced with the primary, refreshing");
                    attempts += 1;
                    self.try_catch_up()?;
                }
                other => return other,
            }
        }
    }

    /// Point lookup against the current state, without refreshing.
    pub fn lookup(&self, key: &[u8]) -> Result<Option<(u64, Vec<u8>)>> {
        if let Some(entry) = self.mem.get_entry(key) {
            return Ok(entry.value.as_ref().map(|v| (entry.seq, v.clone())));
        }

        // view.tables is L0 newest first, then L1.
        for table in &self.view.tables {
            let reader = self.tables.get(&table.filename)?;
            if let Some(entry) = reader.get(key)? {
                return Ok(live(entry));
            }
        }
        Ok(None)
    }

    /// Range scan against the current state, without refreshing.
    pub fn range(&self, start: &[u8], end: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut merged: BTreeMap<Vec<u8>, ValueEntry> = BTreeMap::new();
        let mut merge_entry = |key: Vec<u8>, entry: ValueEntry| match merged.get(&key) {
            Some(existing) if existing.seq >= entry.seq => {}
            _ => {
                merged.insert(key, entry);
            }
        };

        for (key, entry) in self.mem.iter() {
            let key = key.as_slice();
            if key < start || (!end.is_empty() && key >= end) {
                continue;
            }
            merge_entry(key.to_vec(), entry.clone());
        }

        for table in &self.view.tables {
            let reader = self.tables.get(&table.filename)?;
            for key in reader.keys_in_range(start, end) {
                if let Some(entry) = reader.get(key)? {
                    merge_entry(key.to_vec(), entry);
                }
            }
        }

        Ok(merged
            .into_iter()
            .filter_map(|(key, entry)| entry.value.map(|v| (key, v)))
            .collect())
    }
}
