//! Table Module
//!
//! Immutable sorted tables of refs and reflog entries, and the merged view
//! over a stack of them.
//!
//! ## File Format
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │ Header (24 bytes)                                                    │
//! │   Magic "REFT" (4) | Version (1) | BlockSize u24 (3)                 │
//! │   MinUpdateIndex u64 (8) | MaxUpdateIndex u64 (8)                    │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │ Ref blocks ('r')                                                     │
//! │ Ref index blocks ('i')      only with more than one ref block        │
//! │ Obj blocks ('o')            object id prefix → ref block offsets     │
//! │ Log blocks ('g')                                                     │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │ Footer (52 bytes)                                                    │
//! │   Header copy (24) | RefIndexOffset u64 (8)                          │
//! │   (ObjOffset << 5 | ObjIdLen) u64 (8) | LogOffset u64 (8) | CRC32 (4)│
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//! All integers are big-endian. A zero section offset means the section is
//! absent. Ref records store their update index relative to the table's
//! minimum.

mod block;
mod merged;
mod reader;
mod source;
mod writer;

pub use block::{BlockIter, BlockReader, BlockWriter};
pub use merged::{Merged, MergedIter};
pub(crate) use merged::merge_iter;
pub use reader::{Reader, TableIter};
pub use source::{BlockSource, ByteBlockSource, FileBlockSource};
pub use writer::{Writer, WriterStats};

use crate::error::Result;
use crate::record::{LogRecord, Record, RefRecord};

// =============================================================================
// Shared Constants
// =============================================================================

/// Magic bytes identifying a table
pub(crate) const MAGIC: &[u8; 4] = b"REFT";

/// Current table format version
pub(crate) const VERSION: u8 = 1;

/// Magic (4) + Version (1) + BlockSize (3) + Min (8) + Max (8)
pub const HEADER_SIZE: usize = 24;

/// Header copy (24) + three section offsets (24) + CRC (4)
pub const FOOTER_SIZE: usize = 52;

/// Size of a table holding no records
pub const TABLE_OVERHEAD: u64 = (HEADER_SIZE + FOOTER_SIZE) as u64;

// =============================================================================
// Table Abstraction
// =============================================================================

/// Ref records from a seek position onward
pub type RefIter<'a> = Box<dyn Iterator<Item = Result<RefRecord>> + 'a>;

/// Log records from a seek position onward
pub type LogIter<'a> = Box<dyn Iterator<Item = Result<LogRecord>> + 'a>;

/// Read access shared by a single table and the merged stack view
pub trait Table {
    /// Refs with a name `>= name`, in name order
    fn seek_ref(&self, name: &str) -> Result<RefIter<'_>>;

    /// Log entries starting at `name`'s newest entry with an update index
    /// `<= update_index`
    fn seek_log(&self, name: &str, update_index: u64) -> Result<LogIter<'_>>;

    fn min_update_index(&self) -> u64;

    fn max_update_index(&self) -> u64;
}

/// Current value of `name`. A deleted ref reads as absent.
pub fn read_ref<T: Table + ?Sized>(table: &T, name: &str) -> Result<Option<RefRecord>> {
    match table.seek_ref(name)?.next().transpose()? {
        Some(rec) if rec.ref_name == name && !rec.is_deletion() => Ok(Some(rec)),
        _ => Ok(None),
    }
}

/// Newest log entry of `name` at or before `update_index`
pub fn read_log_at<T: Table + ?Sized>(table: &T, name: &str, update_index: u64) -> Result<Option<LogRecord>> {
    match table.seek_log(name, update_index)?.next().transpose()? {
        Some(rec) if rec.ref_name == name => Ok(Some(rec)),
        _ => Ok(None),
    }
}

/// Narrow a record iterator to ref records
pub(crate) fn refs_only<'a, I>(iter: I) -> RefIter<'a>
where
    I: Iterator<Item = Result<Record>> + 'a,
{
    Box::new(iter.filter_map(|rec| match rec {
        Ok(Record::Ref(r)) => Some(Ok(r)),
        Ok(_) => None,
        Err(e) => Some(Err(e)),
    }))
}

/// Narrow a record iterator to log records
pub(crate) fn logs_only<'a, I>(iter: I) -> LogIter<'a>
where
    I: Iterator<Item = Result<Record>> + 'a,
{
    Box::new(iter.filter_map(|rec| match rec {
        Ok(Record::Log(r)) => Some(Ok(r)),
        Ok(_) => None,
        Err(e) => Some(Err(e)),
    }))
}

// =============================================================================
// Header / Footer
// =============================================================================

pub(crate) fn encode_header(block_size: u32, min: u64, max: u64) -> [u8; HEADER_SIZE] {
    let mut h = [0u8; HEADER_SIZE];
    h[0..4].copy_from_slice(MAGIC);
    h[4] = VERSION;
    put_u24(&mut h[5..8], block_size);
    h[8..16].copy_from_slice(&min.to_be_bytes());
    h[16..24].copy_from_slice(&max.to_be_bytes());
    h
}

pub(crate) fn encode_footer(
    header: &[u8; HEADER_SIZE],
    ref_index_offset: u64,
    obj_field: u64,
    log_offset: u64,
) -> [u8; FOOTER_SIZE] {
    let mut f = [0u8; FOOTER_SIZE];
    f[..HEADER_SIZE].copy_from_slice(header);
    f[24..32].copy_from_slice(&ref_index_offset.to_be_bytes());
    f[32..40].copy_from_slice(&obj_field.to_be_bytes());
    f[40..48].copy_from_slice(&log_offset.to_be_bytes());
    let crc = crc32fast::hash(&f[..48]);
    f[48..52].copy_from_slice(&crc.to_be_bytes());
    f
}

// =============================================================================
// Fixed-width integers
// =============================================================================

pub(crate) fn put_u24(buf: &mut [u8], v: u32) {
    buf[0] = (v >> 16) as u8;
    buf[1] = (v >> 8) as u8;
    buf[2] = v as u8;
}

pub(crate) fn get_u24(buf: &[u8]) -> u32 {
    (u32::from(buf[0]) << 16) | (u32::from(buf[1]) << 8) | u32::from(buf[2])
}

pub(crate) fn get_u16(buf: &[u8]) -> u16 {
    u16::from_be_bytes([buf[0], buf[1]])
}

pub(crate) fn get_u64(buf: &[u8]) -> u64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&buf[..8]);
    u64::from_be_bytes(b)
}
