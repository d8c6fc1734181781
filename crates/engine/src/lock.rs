//! Exclusive lock files.
//!
//! The lock is an advisory `flock`-style lock taken through `fs2`, so it is
//! honoured across processes as well as between handles of one process.

use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{Error, Result};

/// Name of the lock file inside a database location or a secondary workspace.
pub const LOCK_FILENAME: &str = "LOCK";

const MAX_RELOCK_ATTEMPTS: u32 = 8;

fn open_lock_file(path: &Path) -> io::Result<File> {
    OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(path)
}

#[cfg(unix)]
fn names_same_file(file: &File, path: &Path) -> io::Result<bool> {
    use std::os::unix::fs::MetadataExt;

    let locked = file.metadata()?;
    match fs::metadata(path) {
        Ok(current) => Ok(current.dev() == locked.dev() && current.ino() == locked.ino()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(not(unix))]
fn names_same_file(_file: &File, path: &Path) -> io::Result<bool> {
    match fs::metadata(path) {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

#[derive(Debug)]
pub(crate) struct LockFile {
    path: PathBuf,
    file: File,
}

impl LockFile {
    /// Creates `path` if needed and locks it without blocking.
    ///
    /// Contention is reported as [`Error::LockHeld`]; anything else as `Io`.
    pub(crate) fn acquire(path: &Path) -> Result<Self> {
        Self::lock_opened(path, open_lock_file(path)?)
    }

    /// Locks `file`, which was opened from `path`. If `path` was unlinked or
    /// replaced in between, the lock is dropped and taken again on the file
    /// `path` names now.
    pub(crate) fn lock_opened(path: &Path, mut file: File) -> Result<Self> {
        for _ in 0..MAX_RELOCK_ATTEMPTS {
            if let Err(e) = file.try_lock_exclusive() {
                if e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
                    || e.kind() == io::ErrorKind::WouldBlock
                {
                    return Err(Error::LockHeld(path.to_path_buf()));
                }
                return Err(Error::Io(e));
            }

            if names_same_file(&file, path)? {
                debug!(target: "tidepool::lock", path = %path.display(), "lock acquired");
                return Ok(Self {
                    path: path.to_path_buf(),
                    file,
                });
            }
            debug!(target: "tidepool::lock", path = %path.display(), "locked file was unlinked, reopening");
            file.unlock()?;
            file = open_lock_file(path)?;
        }
        Err(Error::LockHeld(path.to_path_buf()))
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Unlocks and closes the file. The file itself stays on disk.
    pub(crate) fn release(self) -> Result<()> {
        self.file.unlock()?;
        debug!(target: "tidepool::lock", path = %self.path.display(), "lock released");
        Ok(())
    }
}
