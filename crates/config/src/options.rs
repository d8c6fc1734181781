//! Open options, the file-handle budget and engine tuning.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default file-handle budget for an instance (`Bounded(1000)`).
pub const DEFAULT_MAX_OPEN_FILES: usize = 1000;

/// Descriptors a bounded instance keeps back for non-table files
/// (WAL, manifest, lock file, workspace bookkeeping).
pub const RESERVED_NON_TABLE_FILES: usize = 10;

/// Default memtable size that triggers a flush (4 MiB).
pub const DEFAULT_FLUSH_THRESHOLD: usize = 4 * 1024 * 1024;

/// Default number of L0 tables that triggers a compaction. `0` disables it.
pub const DEFAULT_L0_COMPACTION_TRIGGER: usize = 4;

/// Open-time configuration errors.
///
/// These are always raised before any file is created or opened and are
/// never retryable without changing the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A recognised option has a value the requested mode cannot accept.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

/// Limit on concurrently open file descriptors for one instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaxOpenFiles {
    /// At most `n` descriptors.
    Bounded(usize),
    /// No limit. Required for secondary instances.
    Unbounded,
}

impl Default for MaxOpenFiles {
    fn default() -> Self {
        MaxOpenFiles::Bounded(DEFAULT_MAX_OPEN_FILES)
    }
}

impl MaxOpenFiles {
    /// Parses the numeric form used by callers and the CLI: `-1` means
    /// unbounded, any positive number is a bound.
    pub fn from_raw(raw: i64) -> Result<Self, ConfigError> {
        match raw {
            -1 => Ok(MaxOpenFiles::Unbounded),
            n if n >= 1 => usize::try_from(n)
                .map(MaxOpenFiles::Bounded)
                .map_err(|_| ConfigError::InvalidArgument(format!("max_open_files {} too large", n))),
            n => Err(ConfigError::InvalidArgument(format!(
                "max_open_files must be -1 or a positive number, got {}",
                n
            ))),
        }
    }

    /// Inverse of [`from_raw`](Self::from_raw).
    #[must_use]
    pub fn as_raw(&self) -> i64 {
        match self {
            MaxOpenFiles::Bounded(n) => i64::try_from(*n).unwrap_or(i64::MAX),
            MaxOpenFiles::Unbounded => -1,
        }
    }

    #[must_use]
    pub fn is_unbounded(&self) -> bool {
        matches!(self, MaxOpenFiles::Unbounded)
    }

    /// Number of table readers a bounded budget may keep open at once.
    ///
    /// Returns `None` for an unbounded budget. A bounded budget always
    /// leaves room for at least one table.
    #[must_use]
    pub fn table_capacity(&self) -> Option<usize> {
        match self {
            MaxOpenFiles::Bounded(n) => Some(n.saturating_sub(RESERVED_NON_TABLE_FILES).max(1)),
            MaxOpenFiles::Unbounded => None,
        }
    }
}

/// Whether an instance may write, without the mode-specific payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Primary,
    Secondary,
}

/// Enforces the file-handle budget invariant for `role`.
///
/// A secondary discovers table files lazily as the primary creates and
/// obsoletes them, so it cannot live under a fixed descriptor limit.
pub fn validate(role: Role, budget: MaxOpenFiles) -> Result<(), ConfigError> {
    match (role, budget) {
        (Role::Secondary, MaxOpenFiles::Bounded(_)) => Err(ConfigError::InvalidArgument(
            "require max_open_files to be -1".to_string(),
        )),
        _ => Ok(()),
    }
}

/// The three recognised open-time options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OpenOptions {
    /// Open as a read-only follower of the primary at the same location.
    pub secondary: bool,
    /// Private workspace directory for a secondary. Required iff `secondary`.
    pub secondary_location: Option<PathBuf>,
    /// File-handle budget. Must be [`MaxOpenFiles::Unbounded`] for a secondary.
    pub max_open_files: MaxOpenFiles,
}

impl OpenOptions {
    /// Options for a primary with the default budget.
    pub fn new() -> Self {
        Self::default()
    }

    /// Switches to secondary mode with the given workspace directory.
    ///
    /// The budget is left untouched, so callers must also pass
    /// [`MaxOpenFiles::Unbounded`].
    #[must_use]
    pub fn secondary<P: Into<PathBuf>>(mut self, workspace: P) -> Self {
        self.secondary = true;
        self.secondary_location = Some(workspace.into());
        self
    }

    #[must_use]
    pub fn max_open_files(mut self, budget: MaxOpenFiles) -> Self {
        self.max_open_files = budget;
        self
    }

    /// Validates the options for a database at `location`.
    ///
    /// Checks run in order and the first failure wins:
    ///
    /// 1. a secondary must have an unbounded budget;
    /// 2. a secondary needs a `secondary_location` distinct from `location`.
    ///
    /// No I/O is performed; whether the workspace is actually creatable is
    /// decided by the opener afterwards.
    pub fn validate(&self, location: &Path) -> Result<Mode, ConfigError> {
        if !self.secondary {
            validate(Role::Primary, self.max_open_files)?;
            return Ok(Mode::Primary);
        }

        validate(Role::Secondary, self.max_open_files)?;

        let workspace = match &self.secondary_location {
            Some(p) if !p.as_os_str().is_empty() => p.clone(),
            _ => {
                return Err(ConfigError::InvalidArgument(
                    "secondary_location is required when secondary is true".to_string(),
                ))
            }
        };

        if same_path(&workspace, location) {
            return Err(ConfigError::InvalidArgument(format!(
                "secondary_location {} must differ from the database location",
                workspace.display()
            )));
        }

        Ok(Mode::Secondary { workspace })
    }
}

/// Lexical path comparison (no filesystem access).
fn same_path(a: &Path, b: &Path) -> bool {
    a.components().eq(b.components())
}

/// Validated access mode of an instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    /// Sole read/write owner of the location.
    Primary,
    /// Read-only follower with its own workspace directory.
    Secondary { workspace: PathBuf },
}

impl Mode {
    #[must_use]
    pub fn role(&self) -> Role {
        match self {
            Mode::Primary => Role::Primary,
            Mode::Secondary { .. } => Role::Secondary,
        }
    }

    #[must_use]
    pub fn is_secondary(&self) -> bool {
        matches!(self, Mode::Secondary { .. })
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Mode::Primary => "primary",
            Mode::Secondary { .. } => "secondary",
        }
    }
}

/// When a secondary refreshes its view of the primary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CatchUpPolicy {
    /// Refresh before every `get` / `scan`.
    #[default]
    OnRead,
    /// Refresh only on an explicit catch-up request.
    Manual,
}

/// Engine tuning knobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Memtable byte size that triggers a flush to a new table.
    pub flush_threshold: usize,
    /// `fsync` after every WAL append.
    pub wal_sync: bool,
    /// L0 table count that triggers compaction after a flush (`0` = off).
    pub l0_compaction_trigger: usize,
    /// Secondary refresh policy. Ignored by primaries.
    pub catch_up: CatchUpPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            flush_threshold: DEFAULT_FLUSH_THRESHOLD,
            wal_sync: true,
            l0_compaction_trigger: DEFAULT_L0_COMPACTION_TRIGGER,
            catch_up: CatchUpPolicy::OnRead,
        }
    }
}
