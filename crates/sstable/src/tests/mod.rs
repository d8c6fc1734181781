
use crate::SSTableWriter;
use anyhow::Result;
use memtable::Memtable;
use std::path::{Path, PathBuf};

/// `(key, Some(value) | None for a tombstone, seq)`
pub(crate) type Row<'a> = (&'a str, Option<&'a str>, u64);

pub(crate) fn memtable_of(rows: &[Row<'_>]) -> Memtable {
    let mut mem = Memtable::new();
    for &(key, val, seq) in rows {
        match val {
            Some(v) => mem.put(key.as_bytes().to_vec(), v.as_bytes().to_vec(), seq),
            None => mem.delete(key.as_bytes().to_vec(), seq),
        }
    }
    mem
}

pub(crate) fn write_table(dir: &Path, name: &str, rows: &[Row<'_>]) -> Result<PathBuf> {
    let path = dir.join(name);
    SSTableWriter::write_from_memtable(&path, &memtable_of(rows))?;
    Ok(path)
}
