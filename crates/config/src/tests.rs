use super::*;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |key| map.get(key).cloned()
}

// -------------------- MaxOpenFiles --------------------

#[test]
fn max_open_files_from_raw() {
    assert_eq!(MaxOpenFiles::from_raw(-1).unwrap(), MaxOpenFiles::Unbounded);
    assert_eq!(MaxOpenFiles::from_raw(64).unwrap(), MaxOpenFiles::Bounded(64));
    assert!(MaxOpenFiles::from_raw(0).is_err());
    assert!(MaxOpenFiles::from_raw(-2).is_err());
}

#[test]
fn max_open_files_raw_roundtrip_and_default() {
    assert_eq!(MaxOpenFiles::Unbounded.as_raw(), -1);
    assert_eq!(MaxOpenFiles::Bounded(12).as_raw(), 12);
    assert_eq!(MaxOpenFiles::default(), MaxOpenFiles::Bounded(DEFAULT_MAX_OPEN_FILES));
}

#[test]
fn table_capacity_reserves_non_table_files() {
    assert_eq!(MaxOpenFiles::Bounded(100).table_capacity(), Some(90));
    assert_eq!(MaxOpenFiles::Bounded(3).table_capacity(), Some(1));
    assert_eq!(MaxOpenFiles::Unbounded.table_capacity(), None);
}

// -------------------- Budget validation --------------------

#[test]
fn secondary_requires_unbounded_budget() {
    let err = validate(Role::Secondary, MaxOpenFiles::Bounded(1000)).unwrap_err();
    assert_eq!(
        err.to_string(),
        "Invalid argument: require max_open_files to be -1"
    );
    assert!(validate(Role::Secondary, MaxOpenFiles::Unbounded).is_ok());
}

#[test]
fn primary_accepts_any_budget() {
    assert!(validate(Role::Primary, MaxOpenFiles::Bounded(1)).is_ok());
    assert!(validate(Role::Primary, MaxOpenFiles::Unbounded).is_ok());
}

// -------------------- OpenOptions::validate --------------------

#[test]
fn default_options_are_primary() {
    let mode = OpenOptions::new().validate(Path::new("db")).unwrap();
    assert_eq!(mode, Mode::Primary);
    assert_eq!(mode.role(), Role::Primary);
    assert_eq!(mode.name(), "primary");
}

#[test]
fn budget_is_checked_before_location() {
    // Both the budget and the missing workspace are wrong; the budget wins.
    let opts = OpenOptions {
        secondary: true,
        secondary_location: None,
        max_open_files: MaxOpenFiles::Bounded(10),
    };
    let err = opts.validate(Path::new("db")).unwrap_err();
    assert!(err.to_string().contains("require max_open_files to be -1"));
}

#[test]
fn secondary_without_location_is_rejected() {
    let opts = OpenOptions {
        secondary: true,
        secondary_location: None,
        max_open_files: MaxOpenFiles::Unbounded,
    };
    let err = opts.validate(Path::new("db")).unwrap_err();
    assert!(err.to_string().starts_with("Invalid argument:"));
    assert!(err.to_string().contains("secondary_location"));
}

#[test]
fn secondary_location_equal_to_location_is_rejected() {
    let opts = OpenOptions::new()
        .secondary("data/db")
        .max_open_files(MaxOpenFiles::Unbounded);
    assert!(opts.validate(Path::new("data/db")).is_err());
    assert!(opts.validate(Path::new("data/./db")).is_err());
}

#[test]
fn valid_secondary_yields_workspace() {
    let opts = OpenOptions::new()
        .secondary("follower")
        .max_open_files(MaxOpenFiles::Unbounded);
    let mode = opts.validate(Path::new("db")).unwrap();
    assert_eq!(
        mode,
        Mode::Secondary {
            workspace: PathBuf::from("follower")
        }
    );
    assert!(mode.is_secondary());
}

#[test]
fn validate_performs_no_io() {
    let dir = tempfile::tempdir().unwrap();
    let location = dir.path().join("db");
    let workspace = dir.path().join("ws");
    let opts = OpenOptions::new().secondary(&workspace);
    assert!(opts.validate(&location).is_err());

    let opts = opts.max_open_files(MaxOpenFiles::Unbounded);
    assert!(opts.validate(&location).is_ok());

    assert!(!location.exists());
    assert!(!workspace.exists());
}

// -------------------- EnvConfig --------------------

#[test]
fn env_defaults() {
    let cfg = EnvConfig::from_lookup(lookup_from(&[])).unwrap();
    assert_eq!(cfg.location, PathBuf::from(DEFAULT_LOCATION));
    assert_eq!(cfg.options, OpenOptions::default());
    assert_eq!(cfg.engine, EngineConfig::default());
    assert_eq!(cfg.log_filter, DEFAULT_LOG_FILTER);
}

#[test]
fn env_secondary_settings() {
    let cfg = EnvConfig::from_lookup(lookup_from(&[
        ("TIDEPOOL_LOCATION", "/srv/db"),
        ("TIDEPOOL_SECONDARY", "true"),
        ("TIDEPOOL_SECONDARY_LOCATION", "/srv/follower"),
        ("TIDEPOOL_MAX_OPEN_FILES", "-1"),
    ]))
    .unwrap();
    assert_eq!(cfg.location, PathBuf::from("/srv/db"));
    assert!(cfg.options.secondary);
    assert_eq!(
        cfg.options.secondary_location,
        Some(PathBuf::from("/srv/follower"))
    );
    assert_eq!(cfg.options.max_open_files, MaxOpenFiles::Unbounded);
}

#[test]
fn env_tuning_falls_back_on_garbage() {
    let cfg = EnvConfig::from_lookup(lookup_from(&[
        ("TIDEPOOL_FLUSH_KB", "lots"),
        ("TIDEPOOL_WAL_SYNC", "maybe"),
        ("TIDEPOOL_L0_TRIGGER", "2"),
    ]))
    .unwrap();
    assert_eq!(cfg.engine.flush_threshold, DEFAULT_FLUSH_THRESHOLD);
    assert!(cfg.engine.wal_sync);
    assert_eq!(cfg.engine.l0_compaction_trigger, 2);
}

#[test]
fn env_mode_fields_are_strict() {
    assert!(EnvConfig::from_lookup(lookup_from(&[("TIDEPOOL_MAX_OPEN_FILES", "many")])).is_err());
    assert!(EnvConfig::from_lookup(lookup_from(&[("TIDEPOOL_MAX_OPEN_FILES", "0")])).is_err());
    assert!(EnvConfig::from_lookup(lookup_from(&[("TIDEPOOL_SECONDARY", "perhaps")])).is_err());
}
