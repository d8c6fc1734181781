//! Error type returned by every public engine operation.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Message carried by [`Error::NotImplemented`] when a secondary is asked to write.
pub const SECONDARY_WRITE_MESSAGE: &str = "Not supported operation in secondary mode.";

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// Open-time misconfiguration or a malformed argument.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The operation is not available on this instance.
    #[error("Not implemented: {0}")]
    NotImplemented(String),

    /// Another process (or handle) owns the lock file.
    #[error("IO error: lock {}: already held by process", .0.display())]
    LockHeld(PathBuf),

    /// The handle has been closed.
    #[error("Database is not open")]
    Closed,

    /// A file referenced by the manifest is gone. Secondaries treat this as
    /// a race with the primary and retry against a fresh manifest.
    #[error("IO error: {}: No such file or directory", .0.display())]
    NotFound(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Corruption: {0}")]
    Corruption(String),

    /// A blocking task on the worker pool panicked or was cancelled.
    #[error("Background task failed: {0}")]
    Background(String),

    /// Failure reported by the table layer.
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl Error {
    /// `true` when the error means the primary deleted a file this instance
    /// expected to find, so retrying with a fresh manifest can succeed.
    #[must_use]
    pub fn is_retryable_race(&self) -> bool {
        match self {
            Error::NotFound(_) => true,
            Error::Io(e) => e.kind() == io::ErrorKind::NotFound,
            Error::Storage(e) => e.chain().any(|cause| {
                cause
                    .downcast_ref::<io::Error>()
                    .map_or(false, |io| io.kind() == io::ErrorKind::NotFound)
            }),
            _ => false,
        }
    }

    /// `true` for the write-rejection error of a secondary.
    #[must_use]
    pub fn is_not_supported(&self) -> bool {
        matches!(self, Error::NotImplemented(_))
    }
}

impl From<config::ConfigError> for Error {
    fn from(e: config::ConfigError) -> Self {
        match e {
            config::ConfigError::InvalidArgument(msg) => Error::InvalidArgument(msg),
        }
    }
}

impl From<wal::WalError> for Error {
    fn from(e: wal::WalError) -> Self {
        match e {
            wal::WalError::Io(io) => Error::Io(io),
            wal::WalError::Corrupt { offset } => {
                Error::Corruption(format!("write-ahead log record at offset {}", offset))
            }
        }
    }
}
