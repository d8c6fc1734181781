use anyhow::{bail, Result};
use byteorder::{LittleEndian, WriteBytesExt};
use crc32fast::Hasher as Crc32;
use memtable::{Memtable, ValueEntry};
use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Seek, Write};
use std::path::Path;

use crate::bloom::BloomFilter;
use crate::format::Footer;

/// Target false positive rate of the per-table bloom filter.
const BLOOM_FPR: f64 = 0.01;

/// Builds table files. Stateless; see the two entry points.
///
/// Every table is written to `<path>.tmp`, fsynced, renamed into place and
/// the parent directory is fsynced, so a reader that can see the final name
/// always sees a complete file.
pub struct SSTableWriter;

impl SSTableWriter {
    /// Flushes a memtable (tombstones included) to `path`.
    ///
    /// # Errors
    ///
    /// Refuses an empty memtable; otherwise only I/O errors.
    pub fn write_from_memtable(path: &Path, mem: &Memtable) -> Result<Footer> {
        if mem.is_empty() {
            bail!("refusing to write an empty table (empty memtable)");
        }
        let iter = mem.iter().map(|(k, v)| (k.clone(), v.clone()));
        match Self::write_internal(path, mem.len(), iter)? {
            Some(footer) => Ok(footer),
            None => bail!("memtable yielded no entries"),
        }
    }

    /// Streams `(key, entry)` pairs in ascending key order into `path`.
    ///
    /// `expected_count` only sizes the bloom filter. Returns `Ok(None)` and
    /// leaves nothing on disk when the iterator is empty, which compaction
    /// hits when every input key was a droppable tombstone.
    pub fn write_from_iterator<I>(path: &Path, expected_count: usize, iter: I) -> Result<Option<Footer>>
    where
        I: Iterator<Item = (Vec<u8>, ValueEntry)>,
    {
        Self::write_internal(path, expected_count, iter)
    }

    fn write_internal<I>(path: &Path, expected_count: usize, iter: I) -> Result<Option<Footer>>
    where
        I: Iterator<Item = (Vec<u8>, ValueEntry)>,
    {
        let tmp_path = path.with_extension("sst.tmp");
        let raw = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)?;
        let mut file = BufWriter::new(raw);

        let mut bloom = BloomFilter::new(expected_count, BLOOM_FPR);
        let mut index: Vec<(Vec<u8>, u64)> = Vec::new();
        let mut max_seq = 0u64;
        let mut record = Vec::with_capacity(256);

        for (key, entry) in iter {
            if let Some((prev, _)) = index.last() {
                if prev.as_slice() >= key.as_slice() {
                    drop(file);
                    let _ = fs::remove_file(&tmp_path);
                    bail!("table keys must be strictly ascending");
                }
            }
            max_seq = max_seq.max(entry.seq);

            record.clear();
            record.write_u32::<LittleEndian>(key.len() as u32)?;
            record.extend_from_slice(&key);
            record.write_u64::<LittleEndian>(entry.seq)?;
            match &entry.value {
                Some(v) => {
                    record.write_u8(1)?;
                    record.write_u32::<LittleEndian>(v.len() as u32)?;
                    record.extend_from_slice(v);
                }
                None => record.write_u8(0)?,
            }

            let mut hasher = Crc32::new();
            hasher.update(&record);

            let offset = file.stream_position()?;
            file.write_u32::<LittleEndian>(hasher.finalize())?;
            file.write_all(&record)?;

            bloom.insert(&key);
            index.push((key, offset));
        }

        if index.is_empty() {
            drop(file);
            let _ = fs::remove_file(&tmp_path);
            return Ok(None);
        }

        let bloom_offset = file.stream_position()?;
        bloom.write_to(&mut file)?;

        let index_offset = file.stream_position()?;
        for (key, data_offset) in &index {
            file.write_u32::<LittleEndian>(key.len() as u32)?;
            file.write_all(key)?;
            file.write_u64::<LittleEndian>(*data_offset)?;
        }

        let footer = Footer {
            max_seq,
            entry_count: index.len() as u64,
            bloom_offset,
            index_offset,
        };
        footer.write_to(&mut file)?;

        file.flush()?;
        file.into_inner()?.sync_all()?;
        fs::rename(&tmp_path, path)?;

        // Make the rename itself durable.
        if let Some(parent) = path.parent() {
            if let Ok(dir) = fs::File::open(parent) {
                let _ = dir.sync_all();
            }
        }

        Ok(Some(footer))
    }
}
