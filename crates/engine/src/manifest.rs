//! # Manifest - live table set of a database
//!
//! Records which table files make up the database, their level, how many
//! times the manifest has been saved, the highest sequence number persisted
//! in tables and which write-ahead log generation is live.
//!
//! ## File Format
//!
//! ```text
//! # TidepoolKV Manifest
//! # Format: <level>:<filename>
//! version:12
//! last_seq:4087
//! wal:7
//! L0:sst-00000000000000004087-1708600000000.sst
//! L1:sst-00000000000000003900-1708599999000.sst
//! ```
//!
//! Lines starting with `#` are comments. Empty lines are ignored. Tables are
//! listed newest first within each level.
//!
//! ## Crash Safety
//!
//! The manifest is rewritten atomically: write `MANIFEST.tmp`, fsync, then
//! rename over `MANIFEST`. Secondaries read it concurrently and therefore
//! only ever see a complete file.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::view::{ManifestView, TableRef};

/// Name of the manifest file within a database location.
pub const MANIFEST_FILENAME: &str = "MANIFEST";

const MANIFEST_TMP_FILENAME: &str = "MANIFEST.tmp";

/// In-memory manifest, owned by the primary.
#[derive(Debug, Clone)]
pub struct Manifest {
    dir: PathBuf,
    pub version: u64,
    pub last_seq: u64,
    pub wal_generation: u64,
    /// All tables, L0 newest first, then L1 newest first.
    pub entries: Vec<TableRef>,
}

impl Manifest {
    /// An empty manifest for `dir` that has never been saved.
    pub fn empty(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            version: 0,
            last_seq: 0,
            wal_generation: 1,
            entries: Vec::new(),
        }
    }

    /// Rebuilds a manifest from a view, e.g. to write a secondary's copy.
    pub fn from_view(dir: &Path, view: &ManifestView) -> Self {
        Self {
            dir: dir.to_path_buf(),
            version: view.version,
            last_seq: view.last_seq,
            wal_generation: view.wal_generation,
            entries: view.tables.clone(),
        }
    }

    /// Loads `dir/MANIFEST`. Never writes.
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(MANIFEST_FILENAME);
        let file = File::open(&path)?;
        Self::parse(dir, BufReader::new(file))
    }

    /// Loads `dir/MANIFEST`, or returns an empty manifest if there is none.
    pub fn load_or_create(dir: &Path) -> Result<Self> {
        match Self::load(dir) {
            Err(Error::Io(e)) if e.kind() == io::ErrorKind::NotFound => Ok(Self::empty(dir)),
            other => other,
        }
    }

    fn parse<R: BufRead>(dir: &Path, reader: R) -> Result<Self> {
        let mut manifest = Self::empty(dir);
        let mut saw_version = false;

        for (line_num, line) in reader.lines().enumerate() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            let (key, value) = trimmed.split_once(':').ok_or_else(|| {
                Error::Corruption(format!(
                    "manifest line {}: expected '<key>:<value>', got '{}'",
                    line_num + 1,
                    trimmed
                ))
            })?;

            match key {
                "version" => {
                    manifest.version = parse_u64(line_num, value)?;
                    saw_version = true;
                }
                "last_seq" => manifest.last_seq = parse_u64(line_num, value)?,
                "wal" => manifest.wal_generation = parse_u64(line_num, value)?,
                "L0" | "L1" => {
                    if value.is_empty() || value.contains('/') || value.contains('\\') {
                        return Err(Error::Corruption(format!(
                            "manifest line {}: bad table name '{}'",
                            line_num + 1,
                            value
                        )));
                    }
                    manifest.entries.push(TableRef {
                        filename: value.to_string(),
                        level: if key == "L0" { 0 } else { 1 },
                    });
                }
                other => {
                    return Err(Error::Corruption(format!(
                        "manifest line {}: unknown key '{}'",
                        line_num + 1,
                        other
                    )))
                }
            }
        }

        if !saw_version {
            return Err(Error::Corruption("manifest has no version line".to_string()));
        }
        // Keep L0 ahead of L1 regardless of line order; the sort is stable.
        manifest.entries.sort_by_key(|e| e.level);
        Ok(manifest)
    }

    /// Bumps the version and persists the manifest in its own directory.
    pub fn save(&mut self) -> Result<()> {
        self.version += 1;
        let dir = self.dir.clone();
        self.persist_to(&dir)
    }

    /// Writes the manifest atomically to `dir/MANIFEST` without touching the
    /// version.
    pub fn persist_to(&self, dir: &Path) -> Result<()> {
        let tmp_path = dir.join(MANIFEST_TMP_FILENAME);
        {
            let mut f = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp_path)?;
            self.write_contents(&mut f)?;
            f.flush()?;
            f.sync_all()?;
        }
        fs::rename(&tmp_path, dir.join(MANIFEST_FILENAME))?;
        if let Ok(d) = File::open(dir) {
            let _ = d.sync_all();
        }
        Ok(())
    }

    fn write_contents<W: Write>(&self, f: &mut W) -> io::Result<()> {
        writeln!(f, "# TidepoolKV Manifest")?;
        writeln!(f, "# Format: <level>:<filename>")?;
        writeln!(f, "version:{}", self.version)?;
        writeln!(f, "last_seq:{}", self.last_seq)?;
        writeln!(f, "wal:{}", self.wal_generation)?;
        for entry in &self.entries {
            writeln!(f, "L{}:{}", entry.level, entry.filename)?;
        }
        Ok(())
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(MANIFEST_FILENAME)
    }

    pub fn view(&self) -> ManifestView {
        ManifestView {
            version: self.version,
            tables: self.entries.clone(),
            last_seq: self.last_seq,
            wal_generation: self.wal_generation,
        }
    }

    pub fn l0_filenames(&self) -> Vec<&str> {
        self.filenames_at(0)
    }

    pub fn l1_filenames(&self) -> Vec<&str> {
        self.filenames_at(1)
    }

    fn filenames_at(&self, level: u32) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|e| e.level == level)
            .map(|e| e.filename.as_str())
            .collect()
    }

    /// Adds a table as the newest of its level (does **not** save).
    pub fn add(&mut self, filename: String, level: u32) {
        let insert_pos = self
            .entries
            .iter()
            .position(|e| e.level >= level)
            .unwrap_or(self.entries.len());
        self.entries.insert(insert_pos, TableRef { filename, level });
    }

    /// Replaces every table with the compaction output, or with nothing when
    /// compaction dropped every key.
    pub fn replace_all_with_l1(&mut self, filename: Option<String>) {
        self.entries.clear();
        if let Some(filename) = filename {
            self.entries.push(TableRef { filename, level: 1 });
        }
    }
}

fn parse_u64(line_num: usize, value: &str) -> Result<u64> {
    value.trim().parse().map_err(|_| {
        Error::Corruption(format!(
            "manifest line {}: '{}' is not a number",
            line_num + 1,
            value
        ))
    })
}
