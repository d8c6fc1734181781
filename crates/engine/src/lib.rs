//! # Engine - TidepoolKV storage engine
//!
//! Ties the [`memtable`], [`wal`] and [`sstable`] crates into an LSM-tree
//! key-value store that can be opened either as the single read/write
//! **primary** of a location or as any number of read-only **secondaries**
//! following that primary through the files it writes.
//!
//! ## Architecture
//!
//! ```text
//!           primary                                 secondary
//!   write.rs → WAL append → Memtable        catchup.rs: MANIFEST → tables
//!              |                                        └ WAL tail → Memtable
//!              | (threshold exceeded?)
//!              v                            read.rs → Memtable → L0 → L1
//!           flush() → table + new WAL gen
//!              | (L0 count >= trigger?)
//!              v
//!           compact() → one L1 table
//! ```
//!
//! The primary and its secondaries share nothing but files:
//!
//! - `MANIFEST` names the live tables, the live WAL generation, the number
//!   of saves (`version`) and the highest sequence number in tables;
//! - `wal-<gen>.log` carries the writes not yet flushed;
//! - `sst-*.sst` tables are immutable once their name appears in the manifest.
//!
//! A secondary refreshes by re-reading the manifest, opening the tables it
//! has not seen and replaying the WAL from where it stopped. Files the primary
//! deletes under it are a race, absorbed by retrying with a fresh manifest.
//!
//! ## Module Responsibilities
//!
//! | Module         | Purpose                                                   |
//! |----------------|-----------------------------------------------------------|
//! | `lib.rs`       | `Engine` struct, open, accessors, close, `Debug`, `Drop`  |
//! | [`recovery`]   | primary open: lock, cleanup, manifest load, WAL replay    |
//! | [`catchup`]    | secondary open and refresh                                |
//! | [`write`]      | `set()`, `del()`, `write()`, `force_flush()`, `flush()`    |
//! | [`read`]       | `get()`, `scan()`                                          |
//! | [`compaction`] | `compact()` with streaming merge + tombstone GC           |
//! | [`manifest`]   | the manifest file                                         |
//! | [`db`]         | asynchronous, clonable [`Db`] handle                      |
mod batch;
mod budget;
mod catchup;
mod compaction;
mod db;
mod error;
mod gate;
mod lock;
mod manifest;
mod read;
mod recovery;
mod view;
mod workspace;
mod write;

pub use batch::{BatchOp, WriteBatch};
pub use catchup::{CatchUpOutcome, MAX_CATCH_UP_ATTEMPTS};
pub use config::{CatchUpPolicy, EngineConfig, MaxOpenFiles, Mode, OpenOptions};
pub use db::Db;
pub use error::{Error, Result, SECONDARY_WRITE_MESSAGE};
pub use gate::WriteGate;
pub use lock::LOCK_FILENAME;
pub use manifest::{Manifest, MANIFEST_FILENAME};
pub use view::{ManifestReader, ManifestView, TableRef};

use budget::TableCache;
use lock::LockFile;
use memtable::Memtable;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use wal::WalWriter;
use workspace::SecondaryWorkspace;

/// Maximum allowed key size in bytes (64 KiB).
pub const MAX_KEY_SIZE: usize = 64 * 1024;
/// Maximum allowed value size in bytes (10 MiB).
pub const MAX_VALUE_SIZE: usize = 10 * 1024 * 1024;

/// File name of WAL generation `generation`.
#[must_use]
pub fn wal_filename(generation: u64) -> String {
    format!("wal-{:06}.log", generation)
}

/// Inverse of [`wal_filename`].
#[must_use]
pub fn parse_wal_filename(name: &str) -> Option<u64> {
    name.strip_prefix("wal-")?.strip_suffix(".log")?.parse().ok()
}

/// State only one of the two roles has.
pub(crate) enum RoleState {
    Primary {
        manifest: Manifest,
        wal: WalWriter,
        lock: Option<LockFile>,
    },
    Secondary {
        workspace: SecondaryWorkspace,
        /// Byte offset in the live WAL up to which records are applied.
        wal_offset: u64,
    },
}

/// One opened instance: a primary or a secondary.
///
/// # Write Path (primary)
///
/// 1. Check the write gate.
/// 2. Increment the sequence number.
/// 3. Append the record to the WAL.
/// 4. Apply it to the memtable.
/// 5. Flush when the memtable reaches `flush_threshold`.
///
/// # Read Path
///
/// Memtable first, then L0 tables newest to oldest, then L1. The first entry
/// found wins and a tombstone hides older values. A secondary with the
/// default [`CatchUpPolicy::OnRead`] refreshes before reading.
pub struct Engine {
    pub(crate) location: PathBuf,
    pub(crate) mode: Mode,
    pub(crate) gate: WriteGate,
    pub(crate) budget: MaxOpenFiles,
    pub(crate) config: EngineConfig,
    pub(crate) mem: Memtable,
    /// Tables this instance reads through. For a primary it mirrors the
    /// manifest after every save.
    pub(crate) view: ManifestView,
    pub(crate) tables: TableCache,
    /// Highest sequence number applied.
    pub(crate) seq: u64,
    pub(crate) state: RoleState,
    pub(crate) closed: bool,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("location", &self.location)
            .field("mode", &self.mode)
            .field("budget", &self.budget)
            .field("seq", &self.seq)
            .field("manifest_version", &self.view.version)
            .field("wal_generation", &self.view.wal_generation)
            .field("memtable_entries", &self.mem.len())
            .field("l0_table_count", &self.l0_table_count())
            .field("l1_table_count", &self.l1_table_count())
            .field("open_tables", &self.tables.len())
            .field("closed", &self.closed)
            .finish()
    }
}

impl Engine {
    /// Opens the database at `location`.
    ///
    /// Options are validated before any file is touched. A primary then
    /// creates the location if needed, takes its lock and recovers; a
    /// secondary prepares its workspace and performs a first catch-up.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` for rejected options or an unusable workspace;
    /// - `LockHeld` when another primary (or another secondary, for the
    ///   workspace) holds the lock;
    /// - `Io` for filesystem failures, including a secondary opened on a
    ///   location without a database.
    pub fn open<P: AsRef<Path>>(location: P, options: &OpenOptions, config: &EngineConfig) -> Result<Self> {
        let location = location.as_ref().to_path_buf();
        let mode = options.validate(&location)?;

        match mode {
            Mode::Primary => {
                if let Some(ignored) = &options.secondary_location {
                    debug!(
                        target: "tidepool::engine",
                        secondary_location = %ignored.display(),
                        "secondary_location ignored for a primary"
                    );
                }
                Self::open_primary(location, options.max_open_files, config.clone())
            }
            Mode::Secondary { workspace } => {
                Self::open_secondary(location, workspace, options.max_open_files, config.clone())
            }
        }
    }

    pub(crate) fn new_instance(
        location: PathBuf,
        mode: Mode,
        budget: MaxOpenFiles,
        config: EngineConfig,
        state: RoleState,
    ) -> Self {
        let tables = TableCache::new(&location, budget);
        Self {
            gate: WriteGate::for_mode(&mode),
            location,
            mode,
            budget,
            config,
            mem: Memtable::new(),
            view: ManifestView::default(),
            tables,
            seq: 0,
            state,
            closed: false,
        }
    }

    /// Releases the instance.
    ///
    /// A primary flushes its memtable, syncs the WAL and releases the
    /// location lock. A secondary reclaims its workspace.
    pub fn close(mut self) -> Result<()> {
        self.shutdown()
    }

    pub(crate) fn shutdown(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let result = match &mut self.state {
            RoleState::Primary { .. } => self.shutdown_primary(),
            RoleState::Secondary { workspace, .. } => workspace.close(),
        };
        self.tables.clear();
        info!(target: "tidepool::engine", location = %self.location.display(), mode = self.mode.name(), "closed");
        result
    }

    fn shutdown_primary(&mut self) -> Result<()> {
        let flushed = if self.mem.is_empty() { Ok(()) } else { self.flush() };
        let RoleState::Primary { wal, lock, .. } = &mut self.state else {
            return flushed;
        };
        let synced = wal.sync_to_disk().map_err(Error::from);
        let released = match lock.take() {
            Some(lock) => lock.release(),
            None => Ok(()),
        };
        flushed.and(synced).and(released)
    }

    pub fn location(&self) -> &Path {
        &self.location
    }

    pub fn mode(&self) -> &Mode {
        &self.mode
    }

    #[must_use]
    pub fn is_secondary(&self) -> bool {
        self.mode.is_secondary()
    }

    #[must_use]
    pub fn write_gate(&self) -> WriteGate {
        self.gate
    }

    #[must_use]
    pub fn max_open_files(&self) -> MaxOpenFiles {
        self.budget
    }

    /// Returns the highest sequence number this instance has applied.
    #[must_use]
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// The table set and log cursor this instance currently reads through.
    ///
    /// For a primary `last_seq` is the latest committed write; for a
    /// secondary it is whatever the last catch-up observed.
    #[must_use]
    pub fn current_view(&self) -> ManifestView {
        let mut view = self.view.clone();
        view.last_seq = view.last_seq.max(self.seq);
        view
    }

    /// Workspace directory of a secondary.
    pub fn workspace(&self) -> Option<&Path> {
        match &self.state {
            RoleState::Secondary { workspace, .. } => Some(workspace.dir()),
            RoleState::Primary { .. } => None,
        }
    }

    #[must_use]
    pub fn flush_threshold(&self) -> usize {
        self.config.flush_threshold
    }

    /// Updates the flush threshold. Useful for testing or runtime tuning.
    pub fn set_flush_threshold(&mut self, threshold: usize) {
        self.config.flush_threshold = threshold;
    }

    /// Returns the L0 compaction trigger; `0` means auto-compaction is off.
    #[must_use]
    pub fn l0_compaction_trigger(&self) -> usize {
        self.config.l0_compaction_trigger
    }

    pub fn set_l0_compaction_trigger(&mut self, trigger: usize) {
        self.config.l0_compaction_trigger = trigger;
    }

    #[must_use]
    pub fn catch_up_policy(&self) -> CatchUpPolicy {
        self.config.catch_up
    }

    #[must_use]
    pub fn table_count(&self) -> usize {
        self.view.tables.len()
    }

    #[must_use]
    pub fn l0_table_count(&self) -> usize {
        self.view.l0().count()
    }

    #[must_use]
    pub fn l1_table_count(&self) -> usize {
        self.view.l1().count()
    }

    /// Number of table readers (and so table descriptors) currently open.
    #[must_use]
    pub fn open_table_count(&self) -> usize {
        self.tables.len()
    }

    /// Table readers a bounded budget allows; `None` when unbounded.
    #[must_use]
    pub fn table_capacity(&self) -> Option<usize> {
        self.tables.capacity()
    }

    #[must_use]
    pub fn memtable_len(&self) -> usize {
        self.mem.len()
    }

    #[must_use]
    pub fn memtable_size(&self) -> usize {
        self.mem.approx_size()
    }
}

/// Best-effort close on drop.
///
/// Errors cannot propagate out of `Drop`; unflushed writes of a primary are
/// still in the WAL and are recovered on the next open.
impl Drop for Engine {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!(target: "tidepool::engine", location = %self.location.display(), error = %e, "close on drop failed");
        }
    }
}

#[cfg(test)]
mod tests;
