//! # WAL - Write-Ahead Log
//!
//! Crash-safe, append-only log of mutations for the TidepoolKV engine.
//!
//! A primary appends every mutation here **before** touching its memtable.
//! The same file is the channel through which secondaries observe writes that
//! have not been flushed to a table yet: a secondary replays the log from the
//! last byte offset it consumed, so the reader side must cope with a writer
//! appending concurrently.
//!
//! ## Frame Format
//!
//! ```text
//! [record_len: u32 LE][crc32: u32 LE][body ...]
//! ```
//!
//! `record_len` covers the CRC and the body, not itself.
//!
//! Body (Put):   `[seq: u64][op=0: u8][key_len: u32][key][val_len: u32][value]`
//! Body (Del):   `[seq: u64][op=1: u8][key_len: u32][key]`
//! Body (Batch): `[seq: u64][op=2: u8][count: u32][count x Put/Del body]`
//!
//! A batch is one frame under one CRC, so replay applies it entirely or not
//! at all.
//!
//! ## Tailing
//!
//! A frame whose header or body is cut short by end-of-file is a torn tail:
//! replay stops there, reports the offset just past the last complete frame
//! and leaves the partial bytes for the next call.
//!
//! ```rust,no_run
//! use wal::{WalReader, WalRecord, WalWriter};
//!
//! let mut w = WalWriter::create("wal-000001.log", true).unwrap();
//! w.append(&WalRecord::Put { seq: 1, key: b"k".to_vec(), value: b"v".to_vec() }).unwrap();
//!
//! let mut r = WalReader::open_at("wal-000001.log", 0).unwrap();
//! let outcome = r.replay(|rec| println!("{:?}", rec)).unwrap();
//! assert_eq!(outcome.records, 1);
//! ```

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use crc32fast::Hasher as Crc32;
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::Path;

use thiserror::Error;

/// Frame header size: `record_len` + `crc32`.
pub const FRAME_HEADER_BYTES: u64 = 8;

/// Upper bound on `record_len`; anything larger is treated as corruption.
pub const MAX_RECORD_SIZE: u32 = 64 * 1024 * 1024;

const OP_PUT: u8 = 0;
const OP_DEL: u8 = 1;
const OP_BATCH: u8 = 2;

/// A logged mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalRecord {
    /// A key-value insertion.
    Put { seq: u64, key: Vec<u8>, value: Vec<u8> },
    /// A key deletion (tombstone).
    Del { seq: u64, key: Vec<u8> },
    /// Several puts/deletes committed atomically. Nested batches are invalid.
    Batch(Vec<WalRecord>),
}

impl WalRecord {
    /// Highest sequence number carried by this record (0 for an empty batch).
    #[must_use]
    pub fn max_seq(&self) -> u64 {
        match self {
            WalRecord::Put { seq, .. } | WalRecord::Del { seq, .. } => *seq,
            WalRecord::Batch(ops) => ops.iter().map(WalRecord::max_seq).max().unwrap_or(0),
        }
    }

    /// Value the frame's `record_len` field would carry: the encoded body plus
    /// the CRC. Writers reject anything above [`MAX_RECORD_SIZE`].
    #[must_use]
    pub fn encoded_len(&self) -> u64 {
        let body = match self {
            WalRecord::Put { key, value, .. } => 8 + 1 + 4 + key.len() as u64 + 4 + value.len() as u64,
            WalRecord::Del { key, .. } => 8 + 1 + 4 + key.len() as u64,
            WalRecord::Batch(ops) => 8 + 1 + 4 + ops.iter().map(|op| op.encoded_len() - 4).sum::<u64>(),
        };
        body + 4
    }

    /// Calls `f` for every single put/delete in the record, in order.
    pub fn for_each_mutation<F: FnMut(&WalRecord)>(&self, f: &mut F) {
        match self {
            WalRecord::Batch(ops) => ops.iter().for_each(|op| op.for_each_mutation(f)),
            single => f(single),
        }
    }
}

/// Errors that can occur during WAL operations.
#[derive(Debug, Error)]
pub enum WalError {
    /// An underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// A record failed CRC validation or could not be parsed.
    #[error("corrupt record at offset {offset}")]
    Corrupt { offset: u64 },
}

/// Append-only WAL writer.
///
/// Each record is encoded into a reusable buffer and written with a single
/// `write_all`, so a concurrent reader sees either nothing of the frame or a
/// prefix of it (a torn tail), never interleaved bytes.
pub struct WalWriter {
    file: File,
    sync: bool,
    buf: Vec<u8>,
}

impl WalWriter {
    /// Opens (or creates) a WAL file in append mode.
    pub fn create<P: AsRef<Path>>(path: P, sync: bool) -> Result<Self, WalError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(path)?;
        Ok(Self {
            file,
            sync,
            buf: Vec::with_capacity(256),
        })
    }

    /// Encodes `record` and appends it as one frame.
    pub fn append(&mut self, record: &WalRecord) -> Result<(), WalError> {
        self.buf.clear();
        self.buf.extend_from_slice(&[0u8; FRAME_HEADER_BYTES as usize]);

        match record {
            WalRecord::Batch(ops) => {
                self.buf.write_u64::<LittleEndian>(record.max_seq())?;
                self.buf.write_u8(OP_BATCH)?;
                self.buf.write_u32::<LittleEndian>(len_u32(ops.len())?)?;
                for op in ops {
                    if matches!(op, WalRecord::Batch(_)) {
                        return Err(WalError::Io(io::Error::new(
                            io::ErrorKind::InvalidInput,
                            "nested WAL batches are not supported",
                        )));
                    }
                    encode_single(&mut self.buf, op)?;
                }
            }
            single => encode_single(&mut self.buf, single)?,
        }

        let body = &self.buf[FRAME_HEADER_BYTES as usize..];
        let mut hasher = Crc32::new();
        hasher.update(body);
        let crc = hasher.finalize();

        let record_len = (body.len() as u64) + 4;
        debug_assert_eq!(record_len, record.encoded_len());
        if record_len > u64::from(MAX_RECORD_SIZE) {
            return Err(WalError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "WAL record too large",
            )));
        }

        self.buf[0..4].copy_from_slice(&(record_len as u32).to_le_bytes());
        self.buf[4..8].copy_from_slice(&crc.to_le_bytes());

        self.file.write_all(&self.buf)?;
        self.file.flush()?;

        if self.sync {
            self.file.sync_all()?;
        }

        Ok(())
    }

    /// Forces buffered data to disk regardless of the `sync` setting.
    pub fn sync_to_disk(&mut self) -> Result<(), WalError> {
        self.file.flush()?;
        self.file.sync_all()?;
        Ok(())
    }
}

fn len_u32(n: usize) -> io::Result<u32> {
    u32::try_from(n).map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "length exceeds u32"))
}

fn encode_single(buf: &mut Vec<u8>, record: &WalRecord) -> io::Result<()> {
    match record {
        WalRecord::Put { seq, key, value } => {
            buf.write_u64::<LittleEndian>(*seq)?;
            buf.write_u8(OP_PUT)?;
            buf.write_u32::<LittleEndian>(len_u32(key.len())?)?;
            buf.extend_from_slice(key);
            buf.write_u32::<LittleEndian>(len_u32(value.len())?)?;
            buf.extend_from_slice(value);
        }
        WalRecord::Del { seq, key } => {
            buf.write_u64::<LittleEndian>(*seq)?;
            buf.write_u8(OP_DEL)?;
            buf.write_u32::<LittleEndian>(len_u32(key.len())?)?;
            buf.extend_from_slice(key);
        }
        WalRecord::Batch(_) => unreachable!("batches are encoded by WalWriter::append"),
    }
    Ok(())
}

/// Result of a replay pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReplayOutcome {
    /// Number of frames applied (a batch counts once).
    pub records: usize,
    /// Absolute offset just past the last complete frame. Passing it to
    /// [`WalReader::open_at`] resumes exactly where this pass stopped.
    pub end_offset: u64,
}

/// Sequential WAL reader.
///
/// Generic over any `Read` so tests can feed in-memory buffers.
pub struct WalReader<R: Read> {
    rdr: BufReader<R>,
    offset: u64,
}

impl WalReader<File> {
    /// Opens a WAL file for replay from the beginning.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<WalReader<File>, WalError> {
        Self::open_at(path, 0)
    }

    /// Opens a WAL file and positions the reader at `offset`, which must be
    /// a frame boundary previously reported by [`ReplayOutcome::end_offset`].
    pub fn open_at<P: AsRef<Path>>(path: P, offset: u64) -> Result<WalReader<File>, WalError> {
        let mut f = File::open(path)?;
        if offset > 0 {
            f.seek(SeekFrom::Start(offset))?;
        }
        Ok(WalReader {
            rdr: BufReader::new(f),
            offset,
        })
    }
}

impl<R: Read> WalReader<R> {
    /// Wraps any reader; offsets are reported relative to its current position.
    pub fn from_reader(reader: R) -> Self {
        WalReader {
            rdr: BufReader::new(reader),
            offset: 0,
        }
    }

    /// Replays every complete frame, calling `apply` for each record.
    ///
    /// - clean EOF or torn tail → `Ok` with the offset of the last complete frame;
    /// - CRC mismatch, absurd length or unknown op → [`WalError::Corrupt`];
    /// - other read failures → [`WalError::Io`].
    pub fn replay<F>(&mut self, mut apply: F) -> Result<ReplayOutcome, WalError>
    where
        F: FnMut(WalRecord),
    {
        let mut body = Vec::with_capacity(256);
        let mut records = 0usize;

        loop {
            let frame_start = self.offset;

            let record_len = match self.rdr.read_u32::<LittleEndian>() {
                Ok(v) => v,
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(WalError::Io(e)),
            };

            if record_len <= 4 || record_len > MAX_RECORD_SIZE {
                return Err(WalError::Corrupt { offset: frame_start });
            }

            let crc = match self.rdr.read_u32::<LittleEndian>() {
                Ok(v) => v,
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(WalError::Io(e)),
            };

            body.clear();
            body.resize((record_len - 4) as usize, 0);
            match self.rdr.read_exact(&mut body) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(WalError::Io(e)),
            }

            let mut hasher = Crc32::new();
            hasher.update(&body);
            if hasher.finalize() != crc {
                return Err(WalError::Corrupt { offset: frame_start });
            }

            let record = decode_body(&body).map_err(|_| WalError::Corrupt { offset: frame_start })?;
            apply(record);
            records += 1;
            self.offset = frame_start + FRAME_HEADER_BYTES + u64::from(record_len - 4);
        }

        Ok(ReplayOutcome {
            records,
            end_offset: self.offset,
        })
    }
}

/// Parses a frame body. Any structural problem is reported as `InvalidData`.
fn decode_body(body: &[u8]) -> io::Result<WalRecord> {
    let mut br = body;
    let seq = br.read_u64::<LittleEndian>()?;
    let op = br.read_u8()?;

    let record = if op == OP_BATCH {
        let count = br.read_u32::<LittleEndian>()? as usize;
        // Each nested op needs at least seq + op + key_len bytes.
        if count > body.len() / 13 {
            return Err(invalid("batch count exceeds body"));
        }
        let mut ops = Vec::with_capacity(count);
        for _ in 0..count {
            let seq = br.read_u64::<LittleEndian>()?;
            let op = br.read_u8()?;
            ops.push(decode_single(&mut br, seq, op)?);
        }
        WalRecord::Batch(ops)
    } else {
        decode_single(&mut br, seq, op)?
    };

    if !br.is_empty() {
        return Err(invalid("trailing bytes after record"));
    }
    Ok(record)
}

fn decode_single(br: &mut &[u8], seq: u64, op: u8) -> io::Result<WalRecord> {
    let key = read_chunk(br)?;
    match op {
        OP_PUT => {
            let value = read_chunk(br)?;
            Ok(WalRecord::Put { seq, key, value })
        }
        OP_DEL => Ok(WalRecord::Del { seq, key }),
        _ => Err(invalid("unknown op code")),
    }
}

fn read_chunk(br: &mut &[u8]) -> io::Result<Vec<u8>> {
    let len = br.read_u32::<LittleEndian>()? as usize;
    if len > br.len() {
        return Err(invalid("length prefix exceeds body"));
    }
    let (chunk, rest) = br.split_at(len);
    *br = rest;
    Ok(chunk.to_vec())
}

fn invalid(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.to_string())
}
