//! Write path: `set()`, `del()`, `write()`, `force_flush()` and the internal
//! `flush()`.
//!
//! Every mutation passes the write gate first, then is appended to the WAL
//! and applied to the memtable. When the memtable reaches the flush threshold
//! it is persisted as a new L0 table and the WAL moves to a new generation.

use sstable::{SSTableReader, SSTableWriter};
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};
use wal::{WalRecord, WalWriter, MAX_RECORD_SIZE};

use crate::batch::{BatchOp, WriteBatch};
use crate::error::{Error, Result};
use crate::recovery::apply_record;
use crate::{wal_filename, Engine, RoleState, MAX_KEY_SIZE, MAX_VALUE_SIZE};

pub(crate) fn validate_key(key: &[u8]) -> Result<()> {
    if key.is_empty() {
        return Err(Error::InvalidArgument("key must not be empty".to_string()));
    }
    if key.len() > MAX_KEY_SIZE {
        return Err(Error::InvalidArgument(format!(
            "key too large: {} bytes (max {})",
            key.len(),
            MAX_KEY_SIZE
        )));
    }
    Ok(())
}

fn validate_value(value: &[u8]) -> Result<()> {
    if value.len() > MAX_VALUE_SIZE {
        return Err(Error::InvalidArgument(format!(
            "value too large: {} bytes (max {})",
            value.len(),
            MAX_VALUE_SIZE
        )));
    }
    Ok(())
}

impl Engine {
    /// Inserts a key-value pair (the `SET` command).
    ///
    /// # Errors
    ///
    /// `NotImplemented` on a secondary, `InvalidArgument` for an empty or
    /// oversized key or value, otherwise I/O errors from the WAL or a flush.
    pub fn set(&mut self, key: Vec<u8>, value: Vec<u8>) -> Result<()> {
        self.gate.check()?;
        validate_key(&key)?;
        validate_value(&value)?;

        let seq = self.next_seq()?;
        self.commit(WalRecord::Put { seq, key, value })
    }

    /// Deletes a key by writing a tombstone (the `DEL` command).
    pub fn del(&mut self, key: Vec<u8>) -> Result<()> {
        self.gate.check()?;
        validate_key(&key)?;

        let seq = self.next_seq()?;
        self.commit(WalRecord::Del { seq, key })
    }

    /// Applies every operation of `batch` atomically.
    ///
    /// The whole batch is validated before anything is logged, so an invalid
    /// operation or a batch too large for one WAL frame is rejected with
    /// `InvalidArgument` and no side effects. An empty batch is a no-op.
    pub fn write(&mut self, batch: WriteBatch) -> Result<()> {
        self.gate.check()?;
        for op in batch.iter() {
            validate_key(op.key())?;
            if let BatchOp::Put { value, .. } = op {
                validate_value(value)?;
            }
        }
        if batch.is_empty() {
            return Ok(());
        }

        // Sequence numbers are drawn from a local cursor and only published
        // once the batch is known to fit in one WAL frame.
        let mut seq = self.seq;
        let mut records = Vec::with_capacity(batch.len());
        for op in batch.into_ops() {
            seq = seq
                .checked_add(1)
                .ok_or_else(|| Error::InvalidArgument("sequence number overflow (u64::MAX reached)".to_string()))?;
            records.push(match op {
                BatchOp::Put { key, value } => WalRecord::Put { seq, key, value },
                BatchOp::Delete { key } => WalRecord::Del { seq, key },
            });
        }
        let record = WalRecord::Batch(records);
        let encoded = record.encoded_len();
        if encoded > u64::from(MAX_RECORD_SIZE) {
            return Err(Error::InvalidArgument(format!(
                "batch too large: {} bytes encoded (max {})",
                encoded, MAX_RECORD_SIZE
            )));
        }

        self.seq = seq;
        self.commit(record)
    }

    /// Forces a flush of the memtable to a new table. No-op when empty.
    pub fn force_flush(&mut self) -> Result<()> {
        self.gate.check()?;
        if self.mem.is_empty() {
            return Ok(());
        }
        self.flush()
    }

    fn next_seq(&mut self) -> Result<u64> {
        self.seq = self
            .seq
            .checked_add(1)
            .ok_or_else(|| Error::InvalidArgument("sequence number overflow (u64::MAX reached)".to_string()))?;
        Ok(self.seq)
    }

    /// Logs `record`, applies it and flushes if the memtable is full.
    fn commit(&mut self, record: WalRecord) -> Result<()> {
        let RoleState::Primary { wal, .. } = &mut self.state else {
            return self.gate.check();
        };
        wal.append(&record)?;
        apply_record(&mut self.mem, &record);

        if self.mem.approx_size() >= self.config.flush_threshold {
            self.flush()?;
        }
        Ok(())
    }

    /// Picks a table file name that does not exist yet.
    pub(crate) fn new_table_name(&self) -> Result<(String, PathBuf)> {
        let mut ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| Error::Io(io::Error::new(io::ErrorKind::Other, e)))?
            .as_millis();
        loop {
            let name = format!("sst-{:020}-{}.sst", self.seq, ts);
            let path = self.location.join(&name);
            if !path.exists() && !self.view.contains(&name) {
                return Ok((name, path));
            }
            ts += 1;
        }
    }

    /// Persists the memtable as the newest L0 table.
    ///
    /// # Steps
    ///
    /// 1. Write the table (temp file + rename).
    /// 2. Create the next WAL generation.
    /// 3. Save the manifest naming the table and the new generation.
    /// 4. Switch the writer and delete the previous generation.
    /// 5. Reset the memtable and cache the new table's reader.
    /// 6. Compact if the L0 count reached the trigger.
    ///
    /// A crash before step 3 leaves the old generation authoritative; after
    /// it, the table holds everything the old generation did.
    pub(crate) fn flush(&mut self) -> Result<()> {
        let (sst_name, sst_path) = self.new_table_name()?;
        let seq = self.seq;
        let entries = self.mem.len();
        let RoleState::Primary { manifest, wal, .. } = &mut self.state else {
            return self.gate.check();
        };

        SSTableWriter::write_from_memtable(&sst_path, &self.mem)?;

        let old_generation = manifest.wal_generation;
        let new_generation = old_generation + 1;
        let new_wal = WalWriter::create(self.location.join(wal_filename(new_generation)), self.config.wal_sync)?;

        manifest.add(sst_name.clone(), 0);
        manifest.wal_generation = new_generation;
        manifest.last_seq = manifest.last_seq.max(seq);
        manifest.save()?;
        self.view = manifest.view();

        drop(std::mem::replace(wal, new_wal));
        let old_wal = self.location.join(wal_filename(old_generation));
        match fs::remove_file(&old_wal) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(target: "tidepool::flush", wal = %old_wal.display(), error = %e, "failed to remove old WAL"),
        }

        self.mem.clear();
        let reader = Arc::new(SSTableReader::open(&sst_path)?);
        self.tables.insert(&sst_name, reader);

        info!(
            target: "tidepool::flush",
            table = %sst_name,
            entries,
            seq,
            wal_generation = new_generation,
            "memtable flushed"
        );

        let trigger = self.config.l0_compaction_trigger;
        if trigger > 0 && self.l0_table_count() >= trigger {
            debug!(target: "tidepool::flush", l0 = self.l0_table_count(), trigger, "L0 trigger reached");
            self.compact()?;
        }
        Ok(())
    }
}
