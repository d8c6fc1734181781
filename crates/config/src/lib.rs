//! # Config - TidepoolKV Configuration
//!
//! Typed open-time configuration shared by the engine and the CLI.
//!
//! An instance is opened with an [`OpenOptions`] carrying exactly the three
//! recognised fields (`secondary`, `secondary_location`, `max_open_files`).
//! [`OpenOptions::validate`] checks them in a fixed order before anything
//! touches the filesystem and yields a tagged [`Mode`]. Engine tuning that is
//! not part of that contract (flush threshold, WAL fsync, compaction trigger,
//! catch-up policy) lives in [`EngineConfig`].
//!
//! ```rust
//! use config::{MaxOpenFiles, OpenOptions};
//!
//! let opts = OpenOptions::new().secondary("/tmp/follower");
//! let err = opts.validate("/tmp/db".as_ref()).unwrap_err();
//! assert_eq!(err.to_string(), "Invalid argument: require max_open_files to be -1");
//!
//! let opts = opts.max_open_files(MaxOpenFiles::Unbounded);
//! assert!(opts.validate("/tmp/db".as_ref()).unwrap().is_secondary());
//! ```

mod env;
mod options;

pub use env::{EnvConfig, DEFAULT_LOCATION, DEFAULT_LOG_FILTER};
pub use options::{
    validate, CatchUpPolicy, ConfigError, EngineConfig, MaxOpenFiles, Mode, OpenOptions, Role,
    DEFAULT_FLUSH_THRESHOLD, DEFAULT_L0_COMPACTION_TRIGGER, DEFAULT_MAX_OPEN_FILES,
    RESERVED_NON_TABLE_FILES,
};

#[cfg(test)]
mod tests;
