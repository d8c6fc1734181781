//! Per-table bloom filter.
//!
//! Point lookups consult the filter before the index so that tables which
//! cannot contain a key cost no disk I/O. False positives are possible,
//! false negatives are not.
//!
//! Bit positions use double hashing, `h1 + i * h2`, with two FNV-1a hashes
//! seeded differently.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

/// Hard cap on the serialized bit array (128 MiB).
const MAX_BLOOM_BYTES: u64 = 128 * 1024 * 1024;

const SEED_A: u64 = 0xcbf2_9ce4_8422_2325;
const SEED_B: u64 = 0x517c_c1b7_2722_0a95;

pub struct BloomFilter {
    words: Vec<u64>,
    num_bits: u64,
    num_hashes: u32,
}

impl BloomFilter {
    /// Sizes a filter for `expected_items` keys at the target false positive
    /// rate. `expected_items` of zero is treated as one.
    ///
    /// # Panics
    ///
    /// Panics if `false_positive_rate` is not in `(0, 1)`.
    pub fn new(expected_items: usize, false_positive_rate: f64) -> Self {
        assert!(
            false_positive_rate > 0.0 && false_positive_rate < 1.0,
            "false_positive_rate must be in (0, 1)"
        );

        let n = expected_items.max(1) as f64;
        let ln2 = std::f64::consts::LN_2;
        // m = -n ln(p) / ln(2)^2, k = (m / n) ln(2)
        let num_bits = ((-n * false_positive_rate.ln()) / (ln2 * ln2)).ceil().max(64.0) as u64;
        let num_hashes = ((num_bits as f64 / n) * ln2).round().max(1.0) as u32;

        Self {
            words: vec![0; num_bits.div_ceil(64) as usize],
            num_bits,
            num_hashes,
        }
    }

    pub fn insert(&mut self, key: &[u8]) {
        for bit in self.positions(key) {
            self.words[(bit / 64) as usize] |= 1u64 << (bit % 64);
        }
    }

    /// `false` means the key is definitely absent.
    #[must_use]
    pub fn may_contain(&self, key: &[u8]) -> bool {
        self.positions(key)
            .all(|bit| self.words[(bit / 64) as usize] & (1u64 << (bit % 64)) != 0)
    }

    #[must_use]
    pub fn num_bits(&self) -> u64 {
        self.num_bits
    }

    #[must_use]
    pub fn num_hashes(&self) -> u32 {
        self.num_hashes
    }

    /// `[num_bits: u64][num_hashes: u32][words_len: u32][words: u64 x words_len]`
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u64::<LittleEndian>(self.num_bits)?;
        w.write_u32::<LittleEndian>(self.num_hashes)?;
        w.write_u32::<LittleEndian>(self.words.len() as u32)?;
        for word in &self.words {
            w.write_u64::<LittleEndian>(*word)?;
        }
        Ok(())
    }

    pub fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        let num_bits = r.read_u64::<LittleEndian>()?;
        let num_hashes = r.read_u32::<LittleEndian>()?;
        let words_len = r.read_u32::<LittleEndian>()? as u64;

        if words_len * 8 > MAX_BLOOM_BYTES {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("bloom filter too large: {} words", words_len),
            ));
        }
        if num_bits == 0 || num_bits > words_len * 64 || num_hashes == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "inconsistent bloom header (bits={}, hashes={}, words={})",
                    num_bits, num_hashes, words_len
                ),
            ));
        }

        let mut words = vec![0u64; words_len as usize];
        r.read_u64_into::<LittleEndian>(&mut words)?;

        Ok(Self {
            words,
            num_bits,
            num_hashes,
        })
    }

    fn positions(&self, key: &[u8]) -> impl Iterator<Item = u64> {
        let h1 = fnv1a(key, SEED_A);
        let h2 = fnv1a(key, SEED_B) | 1;
        let num_bits = self.num_bits;
        (0..u64::from(self.num_hashes)).map(move |i| h1.wrapping_add(i.wrapping_mul(h2)) % num_bits)
    }
}

impl std::fmt::Debug for BloomFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BloomFilter")
            .field("num_bits", &self.num_bits)
            .field("num_hashes", &self.num_hashes)
            .finish()
    }
}

fn fnv1a(data: &[u8], seed: u64) -> u64 {
    data.iter().fold(seed, |hash, &byte| {
        (hash ^ u64::from(byte)).wrapping_mul(0x0000_0100_0000_01b3)
    })
}
