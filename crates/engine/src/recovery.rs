//! Primary open: lock, cleanup of interrupted work, manifest load and WAL
//! replay.

use config::{EngineConfig, MaxOpenFiles, Mode};
use memtable::Memtable;
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use wal::{WalReader, WalRecord, WalWriter};

use crate::error::{Error, Result};
use crate::lock::{LockFile, LOCK_FILENAME};
use crate::manifest::Manifest;
use crate::{parse_wal_filename, wal_filename, Engine, RoleState};

/// What replaying one WAL generation produced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Replayed {
    pub max_seq: u64,
    pub records: usize,
    /// Offset just past the last complete record.
    pub end_offset: u64,
}

/// Applies one logged record (a batch as a whole) to `mem`.
pub(crate) fn apply_record(mem: &mut Memtable, record: &WalRecord) {
    record.for_each_mutation(&mut |op| match op {
        WalRecord::Put { seq, key, value } => mem.put(key.clone(), value.clone(), *seq),
        WalRecord::Del { seq, key } => mem.delete(key.clone(), *seq),
        WalRecord::Batch(_) => {}
    });
}

/// Replays `path` from `offset` into `mem`.
///
/// A missing file is reported as `Error::NotFound` so callers can decide
/// whether that means "fresh start" or "lost a race".
pub(crate) fn replay_wal_into(path: &Path, offset: u64, mem: &mut Memtable) -> Result<Replayed> {
    let mut reader = match WalReader::open_at(path, offset) {
        Ok(r) => r,
        Err(wal::WalError::Io(e)) if e.kind() == io::ErrorKind::NotFound => {
            return Err(Error::NotFound(path.to_path_buf()))
        }
        Err(e) => return Err(e.into()),
    };

    let mut max_seq = 0u64;
    let outcome = reader.replay(|record| {
        max_seq = max_seq.max(record.max_seq());
        apply_record(mem, &record);
    })?;

    Ok(Replayed {
        max_seq,
        records: outcome.records,
        end_offset: outcome.end_offset,
    })
}

impl Engine {
    pub(crate) fn open_primary(location: PathBuf, budget: MaxOpenFiles, config: EngineConfig) -> Result<Self> {
        fs::create_dir_all(&location)?;
        let lock = LockFile::acquire(&location.join(LOCK_FILENAME))?;

        cleanup_tmp_files(&location);
        let mut manifest = Manifest::load_or_create(&location)?;
        remove_orphans(&location, &manifest);

        // Replay before opening the writer.
        let wal_path = location.join(wal_filename(manifest.wal_generation));
        let mut mem = Memtable::new();
        let replayed = match replay_wal_into(&wal_path, 0, &mut mem) {
            Ok(r) => r,
            Err(Error::NotFound(_)) => Replayed::default(),
            Err(e) => return Err(e),
        };
        truncate_torn_tail(&wal_path, replayed.end_offset)?;
        let wal = WalWriter::create(&wal_path, config.wal_sync)?;

        let mut engine = Engine::new_instance(
            location,
            Mode::Primary,
            budget,
            config,
            RoleState::Primary {
                manifest: manifest.clone(),
                wal,
                lock: Some(lock),
            },
        );

        let mut max_table_seq = 0u64;
        for table in &manifest.entries {
            let reader = engine.tables.get(&table.filename)?;
            max_table_seq = max_table_seq.max(reader.max_seq());
        }

        manifest.last_seq = manifest.last_seq.max(max_table_seq);
        manifest.save()?;

        engine.seq = manifest.last_seq.max(replayed.max_seq);
        engine.mem = mem;
        engine.view = manifest.view();
        if let RoleState::Primary { manifest: owned, .. } = &mut engine.state {
            *owned = manifest;
        }

        info!(
            target: "tidepool::engine",
            location = %engine.location.display(),
            seq = engine.seq,
            tables = engine.view.tables.len(),
            wal_records = replayed.records,
            manifest_version = engine.view.version,
            "primary opened"
        );
        Ok(engine)
    }
}

/// Removes leftover `.sst.tmp` files from interrupted flushes or compactions.
pub(crate) fn cleanup_tmp_files(dir: &Path) {
    if let Ok(entries) = fs::read_dir(dir) {
        for entry in entries.flatten() {
            let p = entry.path();
            if let Some(name) = p.file_name().and_then(|n| n.to_str()) {
                if name.ends_with(".sst.tmp") {
                    let _ = fs::remove_file(&p);
                }
            }
        }
    }
}

/// Deletes tables the manifest does not reference and WAL generations other
/// than the live one.
///
/// An unreferenced table comes from a flush that crashed before its manifest
/// save (its data is still in the WAL) or a compaction that crashed before
/// deleting its inputs. A stale WAL comes from a crash between the manifest
/// save of a flush and the removal of the previous generation.
fn remove_orphans(dir: &Path, manifest: &Manifest) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        let orphan = if name.ends_with(".sst") {
            !manifest.entries.iter().any(|t| t.filename == name)
        } else if let Some(generation) = parse_wal_filename(name) {
            generation != manifest.wal_generation
        } else {
            false
        };
        if orphan {
            debug!(target: "tidepool::recovery", file = name, "removing orphan file");
            if let Err(e) = fs::remove_file(entry.path()) {
                warn!(target: "tidepool::recovery", file = name, error = %e, "failed to remove orphan file");
            }
        }
    }
}

/// Cuts a partially written record off the end of the WAL so that new
/// appends start on a record boundary.
fn truncate_torn_tail(path: &Path, end_offset: u64) -> Result<()> {
    let len = match fs::metadata(path) {
        Ok(m) => m.len(),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    if len > end_offset {
        warn!(
            target: "tidepool::recovery",
            wal = %path.display(),
            dropped_bytes = len - end_offset,
            "truncating torn WAL tail"
        );
        let f = OpenOptions::new().write(true).open(path)?;
        f.set_len(end_offset)?;
        f.sync_all()?;
    }
    Ok(())
}

/// Reads the records of `path` from `offset` without applying them.
///
/// Used by secondaries, which must not touch their state until a whole
/// catch-up cycle has succeeded.
pub(crate) fn read_wal_from(path: &Path, offset: u64) -> Result<(Vec<WalRecord>, u64)> {
    let mut reader = match WalReader::open_at(path, offset) {
        Ok(r) => r,
        Err(wal::WalError::Io(e)) if e.kind() == io::ErrorKind::NotFound => {
            return Err(Error::NotFound(path.to_path_buf()))
        }
        Err(e) => return Err(e.into()),
    };
    let mut records = Vec::new();
    let outcome = reader.replay(|record| records.push(record))?;
    Ok((records, outcome.end_offset))
}
