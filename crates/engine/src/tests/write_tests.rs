use super::helpers::*;
use crate::*;
use anyhow::Result;
use tempfile::tempdir;

// --------------------- Basic set / get / del ---------------------

#[test]
fn set_and_get() -> Result<()> {
    let dir = tempdir()?;
    let mut engine = open_primary(dir.path())?;

    engine.set(b"name".to_vec(), b"alice".to_vec())?;
    let (seq, val) = engine.get(b"name")?.unwrap();
    assert_eq!(seq, 1);
    assert_eq!(val, b"alice");
    Ok(())
}

#[test]
fn get_missing_key() -> Result<()> {
    let dir = tempdir()?;
    let mut engine = open_primary(dir.path())?;
    assert!(engine.get(b"nope")?.is_none());
    Ok(())
}

#[test]
fn del_removes_key() -> Result<()> {
    let dir = tempdir()?;
    let mut engine = open_primary(dir.path())?;

    engine.set(b"k".to_vec(), b"v".to_vec())?;
    engine.del(b"k".to_vec())?;
    assert!(engine.get(b"k")?.is_none());
    Ok(())
}

#[test]
fn overwrite_and_resurrect() -> Result<()> {
    let dir = tempdir()?;
    let mut engine = open_primary(dir.path())?;

    engine.set(b"k".to_vec(), b"v1".to_vec())?;
    engine.set(b"k".to_vec(), b"v2".to_vec())?;
    assert_eq!(value_of(&mut engine, b"k"), Some(b"v2".to_vec()));

    engine.del(b"k".to_vec())?;
    engine.set(b"k".to_vec(), b"v3".to_vec())?;
    assert_eq!(value_of(&mut engine, b"k"), Some(b"v3".to_vec()));
    assert_eq!(engine.seq(), 4);
    Ok(())
}

#[test]
fn empty_value_is_a_value() -> Result<()> {
    let dir = tempdir()?;
    let mut engine = open_primary(dir.path())?;
    engine.set(b"k".to_vec(), Vec::new())?;
    assert_eq!(value_of(&mut engine, b"k"), Some(Vec::new()));
    Ok(())
}

// --------------------- Validation ---------------------

#[test]
fn empty_key_is_invalid_argument() -> Result<()> {
    let dir = tempdir()?;
    let mut engine = open_primary(dir.path())?;

    let err = engine.set(Vec::new(), b"v".to_vec()).unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
    assert!(matches!(engine.del(Vec::new()), Err(Error::InvalidArgument(_))));
    assert_eq!(engine.seq(), 0, "rejected writes must not consume a sequence number");
    Ok(())
}

#[test]
fn oversized_key_and_value_are_rejected() -> Result<()> {
    let dir = tempdir()?;
    let mut engine = open_primary(dir.path())?;

    let err = engine.set(vec![b'k'; MAX_KEY_SIZE + 1], b"v".to_vec()).unwrap_err();
    assert!(err.to_string().starts_with("Invalid argument: key too large"));

    let err = engine.set(b"k".to_vec(), vec![0; MAX_VALUE_SIZE + 1]).unwrap_err();
    assert!(err.to_string().starts_with("Invalid argument: value too large"));

    engine.set(vec![b'k'; MAX_KEY_SIZE], b"v".to_vec())?;
    Ok(())
}

// --------------------- Batches ---------------------

#[test]
fn batch_applies_every_op() -> Result<()> {
    let dir = tempdir()?;
    let mut engine = open_primary(dir.path())?;
    engine.set(b"gone".to_vec(), b"x".to_vec())?;

    let mut batch = WriteBatch::new();
    batch.put("a", "1").put("b", "2").delete("gone");
    assert_eq!(batch.len(), 3);
    engine.write(batch)?;

    assert_eq!(value_of(&mut engine, b"a"), Some(b"1".to_vec()));
    assert_eq!(value_of(&mut engine, b"b"), Some(b"2".to_vec()));
    assert_eq!(value_of(&mut engine, b"gone"), None);
    assert_eq!(engine.seq(), 4);
    Ok(())
}

#[test]
fn later_op_in_batch_wins() -> Result<()> {
    let dir = tempdir()?;
    let mut engine = open_primary(dir.path())?;

    let mut batch = WriteBatch::new();
    batch.put("k", "first").delete("k").put("k", "last");
    engine.write(batch)?;
    assert_eq!(value_of(&mut engine, b"k"), Some(b"last".to_vec()));
    Ok(())
}

#[test]
fn invalid_op_rejects_whole_batch() -> Result<()> {
    let dir = tempdir()?;
    let mut engine = open_primary(dir.path())?;

    let mut batch = WriteBatch::new();
    batch.put("ok", "1").put("", "2");
    assert!(matches!(engine.write(batch), Err(Error::InvalidArgument(_))));
    assert_eq!(value_of(&mut engine, b"ok"), None);
    assert_eq!(engine.seq(), 0);
    Ok(())
}

#[test]
fn batch_larger_than_one_wal_frame_is_invalid_argument() -> Result<()> {
    let dir = tempdir()?;
    let mut engine = open_primary(dir.path())?;
    engine.set(b"before".to_vec(), b"1".to_vec())?;

    let mut batch = WriteBatch::new();
    for i in 0..7 {
        batch.put(format!("big{}", i), vec![b'v'; MAX_VALUE_SIZE]);
    }
    let err = engine.write(batch).unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)), "got {err}");
    assert_eq!(engine.seq(), 1);
    assert_eq!(value_of(&mut engine, b"big0"), None);

    engine.set(b"after".to_vec(), b"2".to_vec())?;
    assert_eq!(engine.seq(), 2);
    drop(engine);

    let mut engine = open_primary(dir.path())?;
    assert_eq!(value_of(&mut engine, b"after"), Some(b"2".to_vec()));
    assert_eq!(engine.seq(), 2);
    Ok(())
}

#[test]
fn empty_batch_is_noop() -> Result<()> {
    let dir = tempdir()?;
    let mut engine = open_primary(dir.path())?;
    engine.write(WriteBatch::new())?;
    assert_eq!(engine.seq(), 0);
    Ok(())
}

#[test]
fn batch_survives_restart() -> Result<()> {
    let dir = tempdir()?;
    {
        let mut engine = open_primary(dir.path())?;
        let mut batch = WriteBatch::new();
        batch.put("x", "1").put("y", "2");
        engine.write(batch)?;
        crash(engine);
    }
    let mut engine = open_primary(dir.path())?;
    assert_eq!(value_of(&mut engine, b"x"), Some(b"1".to_vec()));
    assert_eq!(value_of(&mut engine, b"y"), Some(b"2".to_vec()));
    Ok(())
}

// --------------------- Flush ---------------------

#[test]
fn threshold_triggers_flush_and_wal_rotation() -> Result<()> {
    let dir = tempdir()?;
    let mut engine = open_primary_with(dir.path(), 1)?;
    let first_generation = engine.current_view().wal_generation;

    engine.set(b"k".to_vec(), b"v".to_vec())?;

    assert_eq!(engine.memtable_len(), 0);
    assert_eq!(engine.l0_table_count(), 1);
    assert_eq!(count_sst_files(dir.path()), 1);

    let view = engine.current_view();
    assert_eq!(view.wal_generation, first_generation + 1);
    assert_eq!(count_wal_files(dir.path()), 1, "old WAL generation is deleted");
    assert!(dir.path().join(wal_filename(view.wal_generation)).exists());
    assert_eq!(value_of(&mut engine, b"k"), Some(b"v".to_vec()));
    Ok(())
}

#[test]
fn force_flush_persists_manifest() -> Result<()> {
    let dir = tempdir()?;
    let mut engine = open_primary(dir.path())?;
    let before = engine.current_view().version;

    engine.set(b"a".to_vec(), b"1".to_vec())?;
    engine.set(b"b".to_vec(), b"2".to_vec())?;
    engine.force_flush()?;

    let on_disk = ManifestReader::read(dir.path())?;
    assert_eq!(on_disk.version, before + 1);
    assert_eq!(on_disk.last_seq, 2);
    assert_eq!(on_disk.l0().count(), 1);
    assert_eq!(on_disk.tables, engine.current_view().tables);
    Ok(())
}

#[test]
fn force_flush_on_empty_memtable_is_noop() -> Result<()> {
    let dir = tempdir()?;
    let mut engine = open_primary(dir.path())?;
    let version = engine.current_view().version;
    engine.force_flush()?;
    assert_eq!(engine.current_view().version, version);
    assert_eq!(count_sst_files(dir.path()), 0);
    Ok(())
}

#[test]
fn flushed_tables_are_listed_newest_first() -> Result<()> {
    let dir = tempdir()?;
    let mut engine = open_primary(dir.path())?;
    for i in 0..3u8 {
        engine.set(vec![b'k', i], vec![i])?;
        engine.force_flush()?;
    }
    let names: Vec<String> = engine.current_view().l0().map(|t| t.filename.clone()).collect();
    let mut sorted = names.clone();
    sorted.sort();
    sorted.reverse();
    assert_eq!(names, sorted);
    Ok(())
}

#[test]
fn seq_is_monotonic_across_flushes() -> Result<()> {
    let dir = tempdir()?;
    let mut engine = open_primary_with(dir.path(), 64)?;
    let mut last = 0;
    for i in 0..50u32 {
        engine.set(format!("key{}", i).into_bytes(), vec![b'x'; 16])?;
        assert!(engine.seq() > last);
        last = engine.seq();
    }
    assert!(engine.table_count() > 1);
    assert_eq!(engine.current_view().last_seq, 50);
    Ok(())
}
