//! Read-only views of the manifest.

use std::path::Path;

use crate::error::Result;
use crate::manifest::Manifest;

/// One table file referenced by the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableRef {
    /// Basename of the table inside the database location.
    pub filename: String,
    /// 0 for flushed tables, 1 for compaction output.
    pub level: u32,
}

/// Snapshot of the live table set plus the log cursor.
///
/// `tables` is newest first with all L0 tables before L1. For one instance,
/// `version` and `last_seq` never go backwards across refreshes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManifestView {
    /// Number of times the primary has saved the manifest.
    pub version: u64,
    pub tables: Vec<TableRef>,
    /// Highest sequence number visible through this view.
    pub last_seq: u64,
    /// Generation of the live write-ahead log.
    pub wal_generation: u64,
}

impl ManifestView {
    pub fn l0(&self) -> impl Iterator<Item = &TableRef> {
        self.tables.iter().filter(|t| t.level == 0)
    }

    pub fn l1(&self) -> impl Iterator<Item = &TableRef> {
        self.tables.iter().filter(|t| t.level == 1)
    }

    pub fn contains(&self, filename: &str) -> bool {
        self.tables.iter().any(|t| t.filename == filename)
    }
}

/// Reads a primary's manifest without locking or writing anything.
pub struct ManifestReader;

impl ManifestReader {
    /// Parses `location/MANIFEST`.
    ///
    /// # Errors
    ///
    /// `Io` with kind `NotFound` when there is no manifest, `Corruption`
    /// when it cannot be parsed.
    pub fn read(location: &Path) -> Result<ManifestView> {
        Ok(Manifest::load(location)?.view())
    }
}
