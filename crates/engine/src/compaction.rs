//! Compaction: merges all L0 + L1 tables into a single L1 table.
//!
//! Uses [`MergeIterator`] for sorted, deduplicated streaming from every
//! table. Since the merge covers every table, nothing older can exist under
//! a tombstone and all tombstones are dropped. The memtable is not part of
//! compaction; its entries are newer than any table entry.
//!
//! Old files are deleted only after the manifest naming the new table has
//! been saved. Secondaries holding a reader on a deleted table keep reading
//! it; secondaries that had not opened it yet see a race and refresh.

use sstable::{MergeIterator, SSTableReader, SSTableWriter};
use std::fs;
use std::io;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::{Engine, RoleState};

impl Engine {
    /// Compacts all tables into one L1 table.
    ///
    /// Runs automatically when the L0 count reaches `l0_compaction_trigger`
    /// after a flush. No-op with one table or fewer.
    ///
    /// # Errors
    ///
    /// `NotImplemented` on a secondary; I/O errors during merge, write or
    /// manifest save. Failing to delete an old file is only logged.
    pub fn compact(&mut self) -> Result<()> {
        self.gate.check()?;
        let inputs = self.view.tables.clone();
        if inputs.len() <= 1 {
            return Ok(());
        }

        let readers: Vec<Arc<SSTableReader>> = inputs
            .iter()
            .map(|t| self.tables.get(&t.filename))
            .collect::<Result<_>>()?;
        let estimated_count: usize = readers.iter().map(|r| r.len()).sum();

        let (sst_name, sst_path) = self.new_table_name()?;
        let (written, merge_error, dropped_tombstones) = {
            let mut merge = MergeIterator::new(&readers);
            let mut merge_error: Option<anyhow::Error> = None;
            let mut dropped = 0usize;
            let live_entries = std::iter::from_fn(|| loop {
                match merge.next_entry() {
                    Ok(Some((_, entry))) if entry.is_tombstone() => dropped += 1,
                    Ok(Some(pair)) => return Some(pair),
                    Ok(None) => return None,
                    Err(e) => {
                        merge_error = Some(e);
                        return None;
                    }
                }
            });
            let written = SSTableWriter::write_from_iterator(&sst_path, estimated_count, live_entries);
            (written, merge_error, dropped)
        };
        if let Some(e) = merge_error {
            let _ = fs::remove_file(&sst_path);
            return Err(Error::Storage(e));
        }
        let footer = written?;

        let RoleState::Primary { manifest, .. } = &mut self.state else {
            return self.gate.check();
        };
        let output = footer.as_ref().map(|_| sst_name.clone());
        manifest.replace_all_with_l1(output.clone());
        manifest.save()?;
        self.view = manifest.view();

        drop(readers);
        for table in &inputs {
            self.tables.evict(&table.filename);
            let path = self.location.join(&table.filename);
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!(target: "tidepool::compaction", table = %table.filename, error = %e, "failed to remove compacted table"),
            }
        }

        if let Some(name) = &output {
            let reader = Arc::new(SSTableReader::open(&sst_path)?);
            self.tables.insert(name, reader);
        }

        info!(
            target: "tidepool::compaction",
            inputs = inputs.len(),
            output = output.as_deref().unwrap_or("<none>"),
            entries = footer.map_or(0, |f| f.entry_count),
            dropped_tombstones,
            "compaction finished"
        );
        Ok(())
    }
}
