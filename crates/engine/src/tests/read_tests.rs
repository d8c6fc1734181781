use super::helpers::*;
use anyhow::Result;
use tempfile::tempdir;

fn kv(k: &str, v: &str) -> (Vec<u8>, Vec<u8>) {
    (k.as_bytes().to_vec(), v.as_bytes().to_vec())
}

// --------------------- get ---------------------

#[test]
fn memtable_shadows_tables() -> Result<()> {
    let dir = tempdir()?;
    let mut engine = open_primary(dir.path())?;

    engine.set(b"k".to_vec(), b"old".to_vec())?;
    engine.force_flush()?;
    engine.set(b"k".to_vec(), b"new".to_vec())?;

    let (seq, value) = engine.get(b"k")?.unwrap();
    assert_eq!((seq, value), (2, b"new".to_vec()));
    Ok(())
}

#[test]
fn newer_table_shadows_older_table() -> Result<()> {
    let dir = tempdir()?;
    let mut engine = open_primary(dir.path())?;

    engine.set(b"k".to_vec(), b"v1".to_vec())?;
    engine.force_flush()?;
    engine.set(b"k".to_vec(), b"v2".to_vec())?;
    engine.force_flush()?;

    assert_eq!(engine.l0_table_count(), 2);
    assert_eq!(value_of(&mut engine, b"k"), Some(b"v2".to_vec()));
    Ok(())
}

#[test]
fn tombstone_in_table_hides_older_value() -> Result<()> {
    let dir = tempdir()?;
    let mut engine = open_primary(dir.path())?;

    engine.set(b"k".to_vec(), b"v".to_vec())?;
    engine.force_flush()?;
    engine.del(b"k".to_vec())?;
    engine.force_flush()?;

    assert_eq!(engine.memtable_len(), 0);
    assert!(engine.get(b"k")?.is_none());
    Ok(())
}

#[test]
fn lookup_does_not_need_mut() -> Result<()> {
    let dir = tempdir()?;
    let mut engine = open_primary(dir.path())?;
    engine.set(b"k".to_vec(), b"v".to_vec())?;

    let shared = &engine;
    assert_eq!(shared.lookup(b"k")?.map(|(_, v)| v), Some(b"v".to_vec()));
    assert!(shared.range(b"", b"")?.len() == 1);
    Ok(())
}

// --------------------- scan ---------------------

#[test]
fn scan_merges_all_sources_in_order() -> Result<()> {
    let dir = tempdir()?;
    let mut engine = open_primary(dir.path())?;

    engine.set(b"c".to_vec(), b"3".to_vec())?;
    engine.set(b"a".to_vec(), b"old".to_vec())?;
    engine.force_flush()?;
    engine.set(b"b".to_vec(), b"2".to_vec())?;
    engine.force_flush()?;
    engine.set(b"a".to_vec(), b"1".to_vec())?;

    assert_eq!(
        engine.scan(b"", b"")?,
        vec![kv("a", "1"), kv("b", "2"), kv("c", "3")]
    );
    Ok(())
}

#[test]
fn scan_bounds_are_half_open() -> Result<()> {
    let dir = tempdir()?;
    let mut engine = open_primary(dir.path())?;
    for k in ["a", "b", "c", "d"] {
        engine.set(k.as_bytes().to_vec(), k.as_bytes().to_vec())?;
    }
    engine.force_flush()?;

    assert_eq!(engine.scan(b"b", b"d")?, vec![kv("b", "b"), kv("c", "c")]);
    assert_eq!(engine.scan(b"c", b"")?, vec![kv("c", "c"), kv("d", "d")]);
    assert_eq!(engine.scan(b"", b"b")?, vec![kv("a", "a")]);
    assert!(engine.scan(b"x", b"z")?.is_empty());
    Ok(())
}

#[test]
fn scan_skips_deleted_keys() -> Result<()> {
    let dir = tempdir()?;
    let mut engine = open_primary(dir.path())?;

    engine.set(b"a".to_vec(), b"1".to_vec())?;
    engine.set(b"b".to_vec(), b"2".to_vec())?;
    engine.force_flush()?;
    engine.del(b"a".to_vec())?;

    assert_eq!(engine.scan(b"", b"")?, vec![kv("b", "2")]);
    engine.force_flush()?;
    assert_eq!(engine.scan(b"", b"")?, vec![kv("b", "2")]);
    Ok(())
}

#[test]
fn many_keys_round_trip() -> Result<()> {
    let dir = tempdir()?;
    let mut engine = open_primary_with(dir.path(), 1024)?;
    for i in 0..500u32 {
        engine.set(format!("key{:05}", i).into_bytes(), format!("value{}", i).into_bytes())?;
    }
    assert!(engine.table_count() >= 2, "expected several flushes, got {}", engine.table_count());
    assert_eq!(count_sst_files(dir.path()), engine.table_count());

    for i in (0..500u32).step_by(37) {
        assert_eq!(
            value_of(&mut engine, format!("key{:05}", i).as_bytes()),
            Some(format!("value{}", i).into_bytes())
        );
    }
    assert_eq!(engine.scan(b"", b"")?.len(), 500);
    Ok(())
}
