use anyhow::{bail, Context, Result};
use byteorder::{LittleEndian, ReadBytesExt};
use crc32fast::Hasher as Crc32;
use memtable::ValueEntry;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::bloom::BloomFilter;
use crate::format::{Footer, FOOTER_BYTES};

/// Largest key we will allocate for while reading (64 KiB).
const MAX_KEY_BYTES: usize = 64 * 1024;
/// Largest value we will allocate for while reading (10 MiB).
const MAX_VALUE_BYTES: usize = 10 * 1024 * 1024;

/// An open table.
///
/// Opening loads the index (`key -> data offset`) and the bloom filter into
/// memory and keeps one file descriptor for the lifetime of the reader, so
/// dropping a reader is what releases its descriptor. Lookups go through a
/// mutex-guarded buffered handle and need only `&self`.
///
/// On Unix an open reader keeps working after the file is unlinked, which
/// secondaries rely on when the primary compacts underneath them.
pub struct SSTableReader {
    path: PathBuf,
    index: BTreeMap<Vec<u8>, u64>,
    bloom: BloomFilter,
    file: Mutex<BufReader<File>>,
    footer: Footer,
}

impl SSTableReader {
    /// Opens a table, validating its footer and loading index and bloom filter.
    ///
    /// # Errors
    ///
    /// A missing file surfaces as an `std::io::Error` of kind `NotFound` in
    /// the error chain, which callers use to detect tables deleted by a
    /// racing compaction. Malformed files fail with a descriptive message.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut f =
            File::open(&path).with_context(|| format!("failed to open table {}", path.display()))?;

        let footer = Footer::read_from(&mut f)
            .with_context(|| format!("invalid table footer in {}", path.display()))?;
        let filesize = f.seek(SeekFrom::End(0))?;
        let index_end = filesize - FOOTER_BYTES;

        f.seek(SeekFrom::Start(footer.bloom_offset))?;
        let bloom = BloomFilter::read_from(&mut f)
            .with_context(|| format!("invalid bloom filter in {}", path.display()))?;

        let mut rdr = BufReader::new(f);
        rdr.seek(SeekFrom::Start(footer.index_offset))?;
        let mut index = BTreeMap::new();
        let mut pos = footer.index_offset;
        while pos < index_end {
            let key_len = rdr.read_u32::<LittleEndian>()? as usize;
            if key_len > MAX_KEY_BYTES {
                bail!(
                    "corrupt index in {}: key_len {} exceeds maximum {}",
                    path.display(),
                    key_len,
                    MAX_KEY_BYTES
                );
            }
            let mut key = vec![0u8; key_len];
            rdr.read_exact(&mut key)?;
            let data_offset = rdr.read_u64::<LittleEndian>()?;
            if data_offset >= footer.bloom_offset {
                bail!("corrupt index in {}: offset {} outside data section", path.display(), data_offset);
            }
            index.insert(key, data_offset);
            pos += 4 + key_len as u64 + 8;
        }

        if index.len() as u64 != footer.entry_count {
            bail!(
                "corrupt table {}: index has {} entries, footer says {}",
                path.display(),
                index.len(),
                footer.entry_count
            );
        }

        Ok(Self {
            path,
            index,
            bloom,
            file: Mutex::new(rdr),
            footer,
        })
    }

    /// Point lookup. `Ok(Some(entry))` may be a tombstone (`value == None`).
    ///
    /// # Errors
    ///
    /// I/O failure, a CRC mismatch, or an index entry pointing at a
    /// different key.
    pub fn get(&self, key: &[u8]) -> Result<Option<ValueEntry>> {
        if !self.bloom.may_contain(key) {
            return Ok(None);
        }
        let offset = match self.index.get(key) {
            Some(&o) => o,
            None => return Ok(None),
        };

        let mut f = self.file.lock();
        f.seek(SeekFrom::Start(offset))?;

        let stored_crc = f.read_u32::<LittleEndian>()?;
        let mut hasher = Crc32::new();

        let key_len = f.read_u32::<LittleEndian>()?;
        if key_len as usize > MAX_KEY_BYTES {
            bail!("corrupt record at offset {}: key_len {}", offset, key_len);
        }
        let mut key_buf = vec![0u8; key_len as usize];
        f.read_exact(&mut key_buf)?;
        if key_buf.as_slice() != key {
            bail!("index of {} points to a mismatching key at offset {}", self.path.display(), offset);
        }
        let seq = f.read_u64::<LittleEndian>()?;
        let present = f.read_u8()?;

        hasher.update(&key_len.to_le_bytes());
        hasher.update(&key_buf);
        hasher.update(&seq.to_le_bytes());
        hasher.update(&[present]);

        let value = match present {
            0 => None,
            1 => {
                let val_len = f.read_u32::<LittleEndian>()?;
                if val_len as usize > MAX_VALUE_BYTES {
                    bail!("corrupt record at offset {}: val_len {}", offset, val_len);
                }
                let mut val = vec![0u8; val_len as usize];
                f.read_exact(&mut val)?;
                hasher.update(&val_len.to_le_bytes());
                hasher.update(&val);
                Some(val)
            }
            other => bail!("corrupt record at offset {}: presence flag {}", offset, other),
        };

        let actual_crc = hasher.finalize();
        if actual_crc != stored_crc {
            bail!(
                "CRC32 mismatch in {} at offset {}: expected {:#010x}, got {:#010x}",
                self.path.display(),
                offset,
                stored_crc,
                actual_crc
            );
        }

        Ok(Some(ValueEntry { seq, value }))
    }

    /// Path the table was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn max_seq(&self) -> u64 {
        self.footer.max_seq
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Keys in ascending order, tombstoned keys included.
    pub fn keys(&self) -> impl Iterator<Item = &[u8]> {
        self.index.keys().map(|k| k.as_slice())
    }

    /// Keys within `[start, end)`; an empty bound is open.
    pub fn keys_in_range<'a>(&'a self, start: &[u8], end: &'a [u8]) -> impl Iterator<Item = &'a [u8]> + 'a {
        self.index
            .range(start.to_vec()..)
            .map(|(k, _)| k.as_slice())
            .take_while(move |k| end.is_empty() || *k < end)
    }
}

impl std::fmt::Debug for SSTableReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SSTableReader")
            .field("path", &self.path)
            .field("entries", &self.index.len())
            .field("max_seq", &self.footer.max_seq)
            .finish()
    }
}
