//! # SSTable - Sorted String Table
//!
//! Immutable on-disk tables for the TidepoolKV engine.
//!
//! A primary flushes its memtable into a new table and compaction merges
//! tables into one. Tables are written once (temp file + rename) and never
//! modified, which is what lets secondaries open them concurrently without
//! any coordination: a table is either fully present under its final name or
//! absent.
//!
//! ## File layout
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ DATA    crc32 | key_len | key | seq | present | [val_len|val] │
//! │         (one record per key, ascending key order)             │
//! ├──────────────────────────────────────────────────────────────┤
//! │ BLOOM   num_bits | num_hashes | words_len | words             │
//! ├──────────────────────────────────────────────────────────────┤
//! │ INDEX   key_len | key | data_offset                           │
//! ├──────────────────────────────────────────────────────────────┤
//! │ FOOTER  max_seq | entry_count | bloom_offset | index_offset   │
//! │         | magic "TPT1"                       (36 bytes)       │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Integers are little-endian. The record CRC covers everything after it up
//! to the end of the value.

mod bloom;
mod format;
mod merge;
mod reader;
mod writer;

pub use bloom::BloomFilter;
pub use format::{Footer, FOOTER_BYTES, SSTABLE_MAGIC};
pub use merge::MergeIterator;
pub use reader::SSTableReader;
pub use writer::SSTableWriter;

#[cfg(test)]
mod tests;
