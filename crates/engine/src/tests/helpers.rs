use crate::*;
use std::fs;
use std::path::Path;

/// Tuning for tests: no fsync, no auto-compaction unless asked for.
pub fn test_config(flush_threshold: usize) -> EngineConfig {
    EngineConfig {
        flush_threshold,
        wal_sync: false,
        l0_compaction_trigger: 0,
        catch_up: CatchUpPolicy::OnRead,
    }
}

pub fn open_primary(dir: &Path) -> Result<Engine> {
    open_primary_with(dir, 1024 * 1024)
}

pub fn open_primary_with(dir: &Path, flush_threshold: usize) -> Result<Engine> {
    Engine::open(dir, &OpenOptions::new(), &test_config(flush_threshold))
}

pub fn secondary_options(workspace: &Path) -> OpenOptions {
    OpenOptions::new()
        .secondary(workspace)
        .max_open_files(MaxOpenFiles::Unbounded)
}

pub fn open_secondary(location: &Path, workspace: &Path) -> Result<Engine> {
    Engine::open(location, &secondary_options(workspace), &test_config(1024 * 1024))
}

pub fn open_secondary_manual(location: &Path, workspace: &Path) -> Result<Engine> {
    let config = EngineConfig {
        catch_up: CatchUpPolicy::Manual,
        ..test_config(1024 * 1024)
    };
    Engine::open(location, &secondary_options(workspace), &config)
}

/// File names in `dir`, sorted. Empty if `dir` does not exist.
pub fn list_files(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = match fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect(),
        Err(_) => Vec::new(),
    };
    names.sort();
    names
}

pub fn count_sst_files(dir: &Path) -> usize {
    list_files(dir).iter().filter(|n| n.ends_with(".sst")).count()
}

pub fn count_wal_files(dir: &Path) -> usize {
    list_files(dir)
        .iter()
        .filter(|n| parse_wal_filename(n).is_some())
        .count()
}

pub fn value_of(engine: &mut Engine, key: &[u8]) -> Option<Vec<u8>> {
    engine.get(key).unwrap().map(|(_, v)| v)
}

/// Drops an engine without the flush and cleanup of a normal close, leaving
/// files as a killed process would. Descriptors and locks are still released.
pub fn crash(mut engine: Engine) {
    engine.closed = true;
    drop(engine);
}
