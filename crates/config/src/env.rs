//! Environment-variable configuration for the `tidepool` CLI.
//!
//! ```text
//! TIDEPOOL_LOCATION            database directory          (default: "data")
//! TIDEPOOL_SECONDARY           open as a secondary         (default: "false")
//! TIDEPOOL_SECONDARY_LOCATION  secondary workspace         (no default)
//! TIDEPOOL_MAX_OPEN_FILES      budget, -1 = unbounded      (default: 1000)
//! TIDEPOOL_FLUSH_KB            flush threshold in KiB      (default: 4096)
//! TIDEPOOL_WAL_SYNC            fsync every WAL append      (default: "true")
//! TIDEPOOL_L0_TRIGGER          L0 compaction trigger       (default: 4, 0 = off)
//! TIDEPOOL_LOG                 tracing filter directive    (default: "warn")
//! ```
//!
//! Mode-related variables are parsed strictly because they feed the
//! validated open contract. Tuning variables fall back to their defaults
//! when unparsable.

use std::path::PathBuf;

use crate::options::{
    ConfigError, EngineConfig, MaxOpenFiles, OpenOptions, DEFAULT_FLUSH_THRESHOLD,
    DEFAULT_L0_COMPACTION_TRIGGER,
};

/// Default database directory when `TIDEPOOL_LOCATION` is unset.
pub const DEFAULT_LOCATION: &str = "data";

/// Default tracing filter when `TIDEPOOL_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "warn";

/// Everything the CLI needs to open an engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvConfig {
    pub location: PathBuf,
    pub options: OpenOptions,
    pub engine: EngineConfig,
    pub log_filter: String,
}

impl EnvConfig {
    /// Reads the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the configuration through an arbitrary lookup function.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let location = lookup("TIDEPOOL_LOCATION")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_LOCATION));

        let secondary = match lookup("TIDEPOOL_SECONDARY") {
            Some(raw) => parse_bool(&raw).ok_or_else(|| {
                ConfigError::InvalidArgument(format!("TIDEPOOL_SECONDARY: not a boolean: {}", raw))
            })?,
            None => false,
        };

        let max_open_files = match lookup("TIDEPOOL_MAX_OPEN_FILES") {
            Some(raw) => {
                let n: i64 = raw.trim().parse().map_err(|_| {
                    ConfigError::InvalidArgument(format!(
                        "TIDEPOOL_MAX_OPEN_FILES: not an integer: {}",
                        raw
                    ))
                })?;
                MaxOpenFiles::from_raw(n)?
            }
            None => MaxOpenFiles::default(),
        };

        let options = OpenOptions {
            secondary,
            secondary_location: lookup("TIDEPOOL_SECONDARY_LOCATION").map(PathBuf::from),
            max_open_files,
        };

        let defaults = EngineConfig::default();
        let flush_kb = lookup("TIDEPOOL_FLUSH_KB")
            .and_then(|v| v.trim().parse::<usize>().ok())
            .unwrap_or(DEFAULT_FLUSH_THRESHOLD / 1024);
        let engine = EngineConfig {
            flush_threshold: flush_kb.saturating_mul(1024),
            wal_sync: lookup("TIDEPOOL_WAL_SYNC")
                .and_then(|v| parse_bool(&v))
                .unwrap_or(defaults.wal_sync),
            l0_compaction_trigger: lookup("TIDEPOOL_L0_TRIGGER")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(DEFAULT_L0_COMPACTION_TRIGGER),
            catch_up: defaults.catch_up,
        };

        let log_filter =
            lookup("TIDEPOOL_LOG").unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());

        Ok(Self {
            location,
            options,
            engine,
            log_filter,
        })
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
