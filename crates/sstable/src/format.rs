//! Footer layout and helpers.
//!
//! ```text
//! [max_seq: u64][entry_count: u64][bloom_offset: u64][index_offset: u64][magic: u32]
//! ```

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Seek, SeekFrom, Write};

/// Magic number identifying a table file (ASCII "TPT1").
pub const SSTABLE_MAGIC: u32 = 0x5450_5431;

/// Footer size in bytes.
pub const FOOTER_BYTES: u64 = 8 + 8 + 8 + 8 + 4;

/// Parsed table footer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Footer {
    /// Highest sequence number stored in the table.
    pub max_seq: u64,
    /// Number of records (tombstones included).
    pub entry_count: u64,
    pub bloom_offset: u64,
    pub index_offset: u64,
}

impl Footer {
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u64::<LittleEndian>(self.max_seq)?;
        w.write_u64::<LittleEndian>(self.entry_count)?;
        w.write_u64::<LittleEndian>(self.bloom_offset)?;
        w.write_u64::<LittleEndian>(self.index_offset)?;
        w.write_u32::<LittleEndian>(SSTABLE_MAGIC)?;
        Ok(())
    }

    /// Reads and sanity-checks the footer at the end of `r`.
    ///
    /// Offsets must be ordered `bloom_offset <= index_offset <= footer start`.
    pub fn read_from<R: Read + Seek>(r: &mut R) -> io::Result<Self> {
        let filesize = r.seek(SeekFrom::End(0))?;
        if filesize < FOOTER_BYTES {
            return Err(invalid_data(format!(
                "file too small for table footer ({} bytes)",
                filesize
            )));
        }

        r.seek(SeekFrom::End(-(FOOTER_BYTES as i64)))?;
        let footer = Footer {
            max_seq: r.read_u64::<LittleEndian>()?,
            entry_count: r.read_u64::<LittleEndian>()?,
            bloom_offset: r.read_u64::<LittleEndian>()?,
            index_offset: r.read_u64::<LittleEndian>()?,
        };
        let magic = r.read_u32::<LittleEndian>()?;
        if magic != SSTABLE_MAGIC {
            return Err(invalid_data(format!("unknown table magic: {:#x}", magic)));
        }

        let footer_start = filesize - FOOTER_BYTES;
        if footer.bloom_offset > footer.index_offset || footer.index_offset > footer_start {
            return Err(invalid_data(format!(
                "footer offsets out of range (bloom={}, index={}, footer={})",
                footer.bloom_offset, footer.index_offset, footer_start
            )));
        }

        Ok(footer)
    }
}

fn invalid_data(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}
