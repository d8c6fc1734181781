//! K-way merge over several tables.
//!
//! Yields `(key, ValueEntry)` in ascending key order. A key present in more
//! than one table is emitted once, with the entry carrying the highest
//! sequence number. Values are read from disk only when their key reaches the
//! top of the heap.

use anyhow::Result;
use memtable::ValueEntry;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::Arc;

use crate::SSTableReader;

#[derive(PartialEq, Eq)]
struct Head<'a> {
    key: &'a [u8],
    source: usize,
}

impl Ord for Head<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key
            .cmp(other.key)
            .then_with(|| self.source.cmp(&other.source))
    }
}

impl PartialOrd for Head<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

type KeyCursor<'a> = Box<dyn Iterator<Item = &'a [u8]> + 'a>;

pub struct MergeIterator<'a> {
    readers: &'a [Arc<SSTableReader>],
    cursors: Vec<KeyCursor<'a>>,
    heap: BinaryHeap<Reverse<Head<'a>>>,
}

impl<'a> MergeIterator<'a> {
    /// Sources earlier in `readers` win ties on equal sequence numbers, so
    /// pass them newest first.
    pub fn new(readers: &'a [Arc<SSTableReader>]) -> Self {
        let mut cursors: Vec<KeyCursor<'a>> = Vec::with_capacity(readers.len());
        let mut heap = BinaryHeap::with_capacity(readers.len());
        for (source, reader) in readers.iter().enumerate() {
            let mut keys: KeyCursor<'a> = Box::new(reader.keys());
            if let Some(key) = keys.next() {
                heap.push(Reverse(Head { key, source }));
            }
            cursors.push(keys);
        }
        Self {
            readers,
            cursors,
            heap,
        }
    }

    fn advance(&mut self, source: usize) {
        if let Some(key) = self.cursors[source].next() {
            self.heap.push(Reverse(Head { key, source }));
        }
    }

    /// Next merged entry, or `None` once every source is exhausted.
    pub fn next_entry(&mut self) -> Result<Option<(Vec<u8>, ValueEntry)>> {
        while let Some(Reverse(top)) = self.heap.pop() {
            self.advance(top.source);
            let mut best = self.readers[top.source].get(top.key)?;

            while let Some(Reverse(dup)) = self.heap.peek() {
                if dup.key != top.key {
                    break;
                }
                let source = dup.source;
                self.heap.pop();
                self.advance(source);
                if let Some(candidate) = self.readers[source].get(top.key)? {
                    let newer = best.as_ref().map_or(true, |current| candidate.seq > current.seq);
                    if newer {
                        best = Some(candidate);
                    }
                }
            }

            // Index keys always pass the bloom filter, so `best` is only
            // `None` if every source lost the key, which cannot happen.
            if let Some(entry) = best {
                return Ok(Some((top.key.to_vec(), entry)));
            }
        }
        Ok(None)
    }

    /// Drains the iterator into a `Vec`.
    pub fn collect_all(&mut self) -> Result<Vec<(Vec<u8>, ValueEntry)>> {
        let mut out = Vec::new();
        while let Some(pair) = self.next_entry()? {
            out.push(pair);
        }
        Ok(out)
    }
}
