//! Run-time side of the file-handle budget.
//!
//! Table readers hold one descriptor each for as long as they live, so the
//! number of open readers is the number of table descriptors in use. The
//! cache keeps that number within the budget for bounded instances by closing
//! the least recently used reader; unbounded instances (every secondary) keep
//! each reader until its table leaves the manifest.

use config::MaxOpenFiles;
use parking_lot::Mutex;
use sstable::SSTableReader;
use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::trace;

use crate::error::{Error, Result};

struct Slot {
    reader: Arc<SSTableReader>,
    last_used: u64,
}

#[derive(Default)]
struct Slots {
    by_name: HashMap<String, Slot>,
    tick: u64,
}

pub(crate) struct TableCache {
    dir: PathBuf,
    capacity: Option<usize>,
    slots: Mutex<Slots>,
}

impl TableCache {
    pub(crate) fn new(dir: &Path, budget: MaxOpenFiles) -> Self {
        Self {
            dir: dir.to_path_buf(),
            capacity: budget.table_capacity(),
            slots: Mutex::new(Slots::default()),
        }
    }

    /// Reader for `filename`, opening the table if it is not cached.
    ///
    /// A table that no longer exists is reported as [`Error::NotFound`].
    pub(crate) fn get(&self, filename: &str) -> Result<Arc<SSTableReader>> {
        {
            let mut slots = self.slots.lock();
            slots.tick += 1;
            let tick = slots.tick;
            if let Some(slot) = slots.by_name.get_mut(filename) {
                slot.last_used = tick;
                return Ok(slot.reader.clone());
            }
        }

        // Open outside the lock; concurrent readers may race to open the
        // same table, in which case the first insert wins.
        let path = self.dir.join(filename);
        let reader = match SSTableReader::open(&path) {
            Ok(r) => Arc::new(r),
            Err(e) if is_not_found(&e) => return Err(Error::NotFound(path)),
            Err(e) => return Err(Error::Storage(e)),
        };
        Ok(self.insert(filename, reader))
    }

    /// Caches a reader that was opened elsewhere (right after a flush or a
    /// compaction) and returns the cached instance.
    pub(crate) fn insert(&self, filename: &str, reader: Arc<SSTableReader>) -> Arc<SSTableReader> {
        let mut slots = self.slots.lock();
        slots.tick += 1;
        let tick = slots.tick;
        let reader = slots
            .by_name
            .entry(filename.to_string())
            .or_insert(Slot {
                reader,
                last_used: tick,
            })
            .reader
            .clone();

        if let Some(capacity) = self.capacity {
            while slots.by_name.len() > capacity {
                let victim = slots
                    .by_name
                    .iter()
                    .filter(|(name, _)| name.as_str() != filename)
                    .min_by_key(|(_, slot)| slot.last_used)
                    .map(|(name, _)| name.clone());
                match victim {
                    Some(name) => {
                        trace!(target: "tidepool::budget", table = %name, "closing least recently used table");
                        slots.by_name.remove(&name);
                    }
                    None => break,
                }
            }
        }
        reader
    }

    pub(crate) fn evict(&self, filename: &str) {
        self.slots.lock().by_name.remove(filename);
    }

    /// Closes every reader whose table is not in `live`.
    pub(crate) fn retain_only(&self, live: &HashSet<&str>) {
        self.slots
            .lock()
            .by_name
            .retain(|name, _| live.contains(name.as_str()));
    }

    pub(crate) fn clear(&self) {
        self.slots.lock().by_name.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.lock().by_name.len()
    }

    pub(crate) fn capacity(&self) -> Option<usize> {
        self.capacity
    }
}

fn is_not_found(e: &anyhow::Error) -> bool {
    e.chain().any(|cause| {
        cause
            .downcast_ref::<io::Error>()
            .map_or(false, |io| io.kind() == io::ErrorKind::NotFound)
    })
}
