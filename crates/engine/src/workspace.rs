//! Private directory of a secondary instance.
//!
//! Holds the secondary's lock file and its copy of the last manifest it
//! installed. Table data is never copied here: tables are read in place at
//! the primary's location.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::lock::{LockFile, LOCK_FILENAME};
use crate::manifest::{Manifest, MANIFEST_FILENAME};
use crate::view::ManifestView;

#[derive(Debug)]
pub(crate) struct SecondaryWorkspace {
    dir: PathBuf,
    lock: Option<LockFile>,
}

impl SecondaryWorkspace {
    /// Creates `dir` if needed and takes its lock.
    ///
    /// A directory that cannot be created or written is an
    /// `InvalidArgument`; a workspace in use by another secondary is
    /// `LockHeld`.
    pub(crate) fn open(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir).map_err(|e| unusable(dir, &e))?;
        let lock = match LockFile::acquire(&dir.join(LOCK_FILENAME)) {
            Ok(lock) => lock,
            Err(Error::Io(e)) => return Err(unusable(dir, &e)),
            Err(e) => return Err(e),
        };
        debug!(target: "tidepool::workspace", dir = %dir.display(), "workspace ready");
        Ok(Self {
            dir: dir.to_path_buf(),
            lock: Some(lock),
        })
    }

    pub(crate) fn dir(&self) -> &Path {
        &self.dir
    }

    /// Records `view` as the manifest this secondary currently reads through.
    pub(crate) fn record_view(&self, view: &ManifestView) -> Result<()> {
        Manifest::from_view(&self.dir, view).persist_to(&self.dir)
    }

    /// Removes the bookkeeping files and releases the lock. The directory is
    /// removed too when nothing else was put in it.
    pub(crate) fn close(&mut self) -> Result<()> {
        let Some(lock) = self.lock.take() else {
            return Ok(());
        };

        for name in [MANIFEST_FILENAME, "MANIFEST.tmp"] {
            remove_if_present(&self.dir.join(name))?;
        }
        // A secondary that opened this file before the unlink notices the
        // path is gone after locking it and locks a fresh file instead.
        remove_if_present(lock.path())?;
        lock.release()?;

        if let Err(e) = fs::remove_dir(&self.dir) {
            debug!(target: "tidepool::workspace", dir = %self.dir.display(), error = %e, "workspace directory kept");
        }
        Ok(())
    }
}

impl Drop for SecondaryWorkspace {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(target: "tidepool::workspace", dir = %self.dir.display(), error = %e, "failed to reclaim workspace");
        }
    }
}

fn remove_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::Io(e)),
    }
}

fn unusable(dir: &Path, e: &io::Error) -> Error {
    Error::InvalidArgument(format!(
        "secondary_location {} is not usable: {}",
        dir.display(),
        e
    ))
}
