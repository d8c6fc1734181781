//! Secondary instances: open and catch-up.
//!
//! A catch-up cycle re-reads the primary's manifest, opens tables it has not
//! seen, replays the write-ahead log from where the previous cycle stopped
//! (from the start if the primary moved to a new WAL generation) and only
//! then installs the result. Any file that disappears during the cycle means
//! the primary flushed or compacted concurrently; the cycle is discarded and
//! retried against a fresh manifest.

use config::{EngineConfig, MaxOpenFiles, Mode};
use std::collections::HashSet;
use std::io;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};
use wal::WalRecord;

use crate::error::{Error, Result};
use crate::manifest::{Manifest, MANIFEST_FILENAME};
use crate::recovery::{apply_record, read_wal_from};
use crate::workspace::SecondaryWorkspace;
use crate::{wal_filename, Engine, RoleState};

/// Catch-up cycles attempted before a persistent race is reported.
pub const MAX_CATCH_UP_ATTEMPTS: u32 = 32;

const RETRY_BACKOFF: Duration = Duration::from_millis(2);

/// Result of a successful [`Engine::try_catch_up`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CatchUpOutcome {
    /// Manifest version now installed.
    pub version: u64,
    /// Highest sequence number now visible.
    pub last_seq: u64,
    /// WAL records applied by this catch-up.
    pub replayed_records: usize,
    /// Tables opened for the first time.
    pub tables_opened: usize,
    /// Cycles it took, including the successful one.
    pub attempts: u32,
}

impl Engine {
    pub(crate) fn open_secondary(
        location: PathBuf,
        workspace_dir: PathBuf,
        budget: MaxOpenFiles,
        config: EngineConfig,
    ) -> Result<Self> {
        if !location.join(MANIFEST_FILENAME).is_file() {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no database at {}: {} not found", location.display(), MANIFEST_FILENAME),
            )));
        }

        let workspace = SecondaryWorkspace::open(&workspace_dir)?;
        let mut engine = Engine::new_instance(
            location,
            Mode::Secondary {
                workspace: workspace_dir,
            },
            budget,
            config,
            RoleState::Secondary {
                workspace,
                wal_offset: 0,
            },
        );

        let outcome = engine.try_catch_up()?;
        info!(
            target: "tidepool::engine",
            location = %engine.location.display(),
            workspace = ?engine.workspace(),
            manifest_version = outcome.version,
            last_seq = outcome.last_seq,
            tables = engine.view.tables.len(),
            "secondary opened"
        );
        Ok(engine)
    }

    /// Brings a secondary up to date with the primary.
    ///
    /// Retries internally while the primary deletes files under it; only
    /// after [`MAX_CATCH_UP_ATTEMPTS`] cycles is the last race error
    /// returned. On a primary this does nothing and reports the live cursor.
    pub fn try_catch_up(&mut self) -> Result<CatchUpOutcome> {
        if self.closed {
            return Err(Error::Closed);
        }
        if !self.is_secondary() {
            return Ok(CatchUpOutcome {
                version: self.view.version,
                last_seq: self.seq,
                ..CatchUpOutcome::default()
            });
        }

        let mut attempts = 0;
        loop {
            attempts += 1;
            let raced = match self.catch_up_once() {
                Ok(Some(outcome)) => {
                    return Ok(CatchUpOutcome { attempts, ..outcome });
                }
                Ok(None) => Error::Corruption(format!(
                    "manifest at {} is older than the installed view (version {})",
                    self.location.display(),
                    self.view.version
                )),
                Err(e) if e.is_retryable_race() => e,
                Err(e) => return Err(e),
            };

            if attempts >= MAX_CATCH_UP_ATTEMPTS {
                warn!(target: "tidepool::catchup", attempts, error = %raced, "catch-up kept racing with the primary");
                return Err(raced);
            }
            debug!(target: "tidepool::catchup", attempts, error = %raced, "catch-up raced with the primary, retrying");
            thread::sleep(RETRY_BACKOFF);
        }
    }

    /// One cycle. `Ok(None)` means the manifest read was stale.
    fn catch_up_once(&mut self) -> Result<Option<CatchUpOutcome>> {
        let RoleState::Secondary { wal_offset, .. } = &self.state else {
            return Ok(None);
        };
        let wal_offset = *wal_offset;

        let manifest = Manifest::load(&self.location)?;
        if manifest.version < self.view.version {
            return Ok(None);
        }

        let mut tables_opened = 0;
        for table in &manifest.entries {
            if !self.view.contains(&table.filename) {
                tables_opened += 1;
            }
            self.tables.get(&table.filename)?;
        }

        let new_generation = manifest.wal_generation != self.view.wal_generation;
        let start = if new_generation { 0 } else { wal_offset };
        let wal_path = self.location.join(wal_filename(manifest.wal_generation));
        let (records, end_offset) = read_wal_from(&wal_path, start)?;

        let replayed_max = records.iter().map(WalRecord::max_seq).max().unwrap_or(0);
        let new_seq = self.seq.max(manifest.last_seq).max(replayed_max);
        let mut new_view = manifest.view();
        new_view.last_seq = new_seq;

        // Workspace copy first: if it fails, the previous view stays installed.
        let version_changed = manifest.version != self.view.version;
        if version_changed {
            if let RoleState::Secondary { workspace, .. } = &self.state {
                workspace.record_view(&new_view)?;
            }
        }

        if new_generation {
            self.mem.clear();
        }
        for record in &records {
            apply_record(&mut self.mem, record);
        }
        self.seq = new_seq;
        self.view = new_view;
        if let RoleState::Secondary { wal_offset, .. } = &mut self.state {
            *wal_offset = end_offset;
        }

        let live: HashSet<&str> = self.view.tables.iter().map(|t| t.filename.as_str()).collect();
        self.tables.retain_only(&live);

        if version_changed {
            debug!(
                target: "tidepool::catchup",
                version = self.view.version,
                tables = self.view.tables.len(),
                wal_generation = self.view.wal_generation,
                "installed new manifest"
            );
        }

        Ok(Some(CatchUpOutcome {
            version: self.view.version,
            last_seq: self.seq,
            replayed_records: records.len(),
            tables_opened,
            attempts: 0,
        }))
    }
}
