use super::helpers::*;
use crate::*;
use anyhow::Result;
use tempfile::tempdir;

fn fill(engine: &mut Engine, n: u64) -> Result<()> {
    for i in 0..n {
        engine.set(format!("k{:04}", i).into_bytes(), b"val".to_vec())?;
    }
    Ok(())
}

// --------------------- Compaction & Levels ---------------------

#[test]
fn flush_goes_to_l0() -> Result<()> {
    let dir = tempdir()?;
    let mut engine = open_primary_with(dir.path(), 64)?;
    fill(&mut engine, 20)?;

    assert!(engine.l0_table_count() > 0, "flushes should go to L0");
    assert_eq!(engine.l1_table_count(), 0, "L1 should be empty before compact");
    Ok(())
}

#[test]
fn compact_moves_everything_to_one_l1_table() -> Result<()> {
    let dir = tempdir()?;
    let mut engine = open_primary_with(dir.path(), 64)?;
    fill(&mut engine, 50)?;
    assert!(engine.l0_table_count() > 1);

    engine.compact()?;
    assert_eq!(engine.l0_table_count(), 0);
    assert_eq!(engine.l1_table_count(), 1);
    assert_eq!(count_sst_files(dir.path()), 1, "inputs are deleted");

    for i in 0..50u64 {
        let key = format!("k{:04}", i).into_bytes();
        assert_eq!(value_of(&mut engine, &key), Some(b"val".to_vec()));
    }
    Ok(())
}

#[test]
fn compaction_keeps_newest_version() -> Result<()> {
    let dir = tempdir()?;
    let mut engine = open_primary(dir.path())?;
    for round in 0..3u8 {
        engine.set(b"k".to_vec(), vec![b'0' + round])?;
        engine.force_flush()?;
    }
    engine.compact()?;
    assert_eq!(value_of(&mut engine, b"k"), Some(b"2".to_vec()));
    Ok(())
}

#[test]
fn compaction_drops_tombstones() -> Result<()> {
    let dir = tempdir()?;
    let mut engine = open_primary(dir.path())?;

    engine.set(b"keep".to_vec(), b"1".to_vec())?;
    engine.set(b"gone".to_vec(), b"2".to_vec())?;
    engine.force_flush()?;
    engine.del(b"gone".to_vec())?;
    engine.force_flush()?;
    engine.compact()?;

    let view = engine.current_view();
    assert_eq!(view.tables.len(), 1);
    let reader = sstable::SSTableReader::open(dir.path().join(&view.tables[0].filename))?;
    assert_eq!(reader.len(), 1, "tombstone and shadowed value are both gone");
    assert!(engine.get(b"gone")?.is_none());
    Ok(())
}

#[test]
fn compacting_only_deletes_leaves_no_tables() -> Result<()> {
    let dir = tempdir()?;
    let mut engine = open_primary(dir.path())?;

    engine.set(b"a".to_vec(), b"1".to_vec())?;
    engine.force_flush()?;
    engine.del(b"a".to_vec())?;
    engine.force_flush()?;
    engine.compact()?;

    assert_eq!(engine.table_count(), 0);
    assert_eq!(count_sst_files(dir.path()), 0);
    assert!(ManifestReader::read(dir.path())?.tables.is_empty());
    assert!(engine.get(b"a")?.is_none());
    Ok(())
}

#[test]
fn compact_with_single_table_is_noop() -> Result<()> {
    let dir = tempdir()?;
    let mut engine = open_primary(dir.path())?;
    engine.set(b"a".to_vec(), b"1".to_vec())?;
    engine.force_flush()?;
    let version = engine.current_view().version;

    engine.compact()?;
    assert_eq!(engine.current_view().version, version);
    assert_eq!(engine.l0_table_count(), 1);
    Ok(())
}

#[test]
fn auto_compaction_at_trigger() -> Result<()> {
    let dir = tempdir()?;
    let mut engine = open_primary(dir.path())?;
    engine.set_l0_compaction_trigger(3);

    for i in 0..3u8 {
        engine.set(vec![b'k', i], vec![i])?;
        engine.force_flush()?;
    }
    assert_eq!(engine.l0_table_count(), 0);
    assert_eq!(engine.l1_table_count(), 1);

    engine.set(b"later".to_vec(), b"x".to_vec())?;
    engine.force_flush()?;
    assert_eq!(engine.l0_table_count(), 1);
    assert_eq!(engine.l1_table_count(), 1);
    Ok(())
}

#[test]
fn memtable_survives_compaction() -> Result<()> {
    let dir = tempdir()?;
    let mut engine = open_primary(dir.path())?;
    engine.set(b"a".to_vec(), b"1".to_vec())?;
    engine.force_flush()?;
    engine.set(b"b".to_vec(), b"2".to_vec())?;
    engine.force_flush()?;
    engine.del(b"a".to_vec())?;

    engine.compact()?;
    assert_eq!(engine.memtable_len(), 1);
    assert!(engine.get(b"a")?.is_none(), "memtable tombstone still shadows");
    Ok(())
}

#[test]
fn compaction_result_survives_restart() -> Result<()> {
    let dir = tempdir()?;
    {
        let mut engine = open_primary_with(dir.path(), 64)?;
        fill(&mut engine, 40)?;
        engine.compact()?;
        engine.close()?;
    }
    let mut engine = open_primary(dir.path())?;
    assert_eq!(engine.scan(b"", b"")?.len(), 40);
    assert_eq!(engine.seq(), 40);
    Ok(())
}
