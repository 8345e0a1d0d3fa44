//! Table Reader
//!
//! Validates a table's header and footer on open, keeps the ref index in
//! memory, and serves seeks by reading blocks from its source on demand.
//! Sections without an index are located by the first key of each block,
//! read once on the first seek into the section.

use std::path::Path;
use std::sync::OnceLock;

use crate::error::{ReftableError, Result};
use crate::record::{
    log_key, IndexRecord, Record, RefRecord, BLOCK_TYPE_INDEX, BLOCK_TYPE_LOG, BLOCK_TYPE_OBJ, BLOCK_TYPE_REF,
};

use super::block::{BlockIter, BlockReader, BLOCK_HEADER_SIZE};
use super::source::{BlockSource, FileBlockSource};
use super::{
    get_u24, get_u64, logs_only, refs_only, LogIter, RefIter, Table, FOOTER_SIZE, HEADER_SIZE, MAGIC,
    TABLE_OVERHEAD, VERSION,
};

/// Byte range `[start, end)` of one section
#[derive(Debug, Clone, Copy, Default)]
struct Span {
    start: u64,
    end: u64,
}

impl Span {
    fn is_empty(&self) -> bool {
        self.start >= self.end
    }
}

/// Reader for one table
pub struct Reader {
    name: String,
    source: Box<dyn BlockSource>,
    size: u64,
    block_size: u32,
    min_update_index: u64,
    max_update_index: u64,

    refs: Span,
    objs: Span,
    logs: Span,
    obj_id_len: usize,

    /// Last key and offset of each ref block; `None` for single-block tables
    ref_index: Option<Vec<IndexRecord>>,

    /// First key and offset of each block of the sections seeks cannot find
    /// through an index, collected by the first seek into the section
    ref_starts: OnceLock<Vec<BlockStart>>,
    obj_starts: OnceLock<Vec<BlockStart>>,
    log_starts: OnceLock<Vec<BlockStart>>,
}

/// First key of a block and its offset
type BlockStart = (Vec<u8>, u64);

impl Reader {
    /// Open a table served by `source`
    pub fn open(source: Box<dyn BlockSource>, name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let size = source.size();
        if size < TABLE_OVERHEAD {
            return Err(ReftableError::format(format!("{}: too short ({} bytes)", name, size)));
        }

        let header = source.read_block(0, HEADER_SIZE)?;
        if &header[0..4] != MAGIC {
            return Err(ReftableError::format(format!(
                "{}: invalid magic, expected REFT, got {:?}",
                name,
                &header[0..4]
            )));
        }
        if header[4] != VERSION {
            return Err(ReftableError::format(format!("{}: unsupported version {}", name, header[4])));
        }

        let footer_start = size - FOOTER_SIZE as u64;
        let footer = source.read_block(footer_start, FOOTER_SIZE)?;
        if footer[..HEADER_SIZE] != header[..] {
            return Err(ReftableError::format(format!("{}: footer does not match header", name)));
        }
        let crc = u32::from_be_bytes([footer[48], footer[49], footer[50], footer[51]]);
        if crc != crc32fast::hash(&footer[..48]) {
            return Err(ReftableError::format(format!("{}: footer checksum mismatch", name)));
        }

        let ref_index_offset = get_u64(&footer[24..32]);
        let obj_field = get_u64(&footer[32..40]);
        let obj_offset = obj_field >> 5;
        let obj_id_len = (obj_field & 0x1f) as usize;
        let log_offset = get_u64(&footer[40..48]);

        // Present sections must appear in file order between header and footer
        let mut prev = HEADER_SIZE as u64;
        for off in [ref_index_offset, obj_offset, log_offset] {
            if off == 0 {
                continue;
            }
            if off < prev || off > footer_start {
                return Err(ReftableError::format(format!("{}: section offset {} out of range", name, off)));
            }
            prev = off;
        }

        // A section ends where the next present one starts
        let end_after = |candidates: &[u64]| {
            candidates.iter().copied().find(|&o| o != 0).unwrap_or(footer_start)
        };
        let refs = Span {
            start: HEADER_SIZE as u64,
            end: end_after(&[ref_index_offset, obj_offset, log_offset]),
        };
        let ref_index_span = Span {
            start: ref_index_offset,
            end: if ref_index_offset == 0 { 0 } else { end_after(&[obj_offset, log_offset]) },
        };
        let objs = Span {
            start: obj_offset,
            end: if obj_offset == 0 { 0 } else { end_after(&[log_offset]) },
        };
        let logs = Span {
            start: log_offset,
            end: if log_offset == 0 { 0 } else { footer_start },
        };

        let mut reader = Self {
            name,
            source,
            size,
            block_size: get_u24(&header[5..8]),
            min_update_index: get_u64(&header[8..16]),
            max_update_index: get_u64(&header[16..24]),
            refs,
            objs,
            logs,
            obj_id_len,
            ref_index: None,
            ref_starts: OnceLock::new(),
            obj_starts: OnceLock::new(),
            log_starts: OnceLock::new(),
        };

        if !ref_index_span.is_empty() {
            let mut index = Vec::new();
            for rec in reader.section_iter(ref_index_span, BLOCK_TYPE_INDEX, None) {
                match rec? {
                    Record::Index(r) => index.push(r),
                    other => {
                        return Err(ReftableError::format(format!("{}: {} in ref index", reader.name, other)));
                    }
                }
            }
            reader.ref_index = Some(index);
        }

        tracing::debug!(
            table = %reader.name,
            size = reader.size,
            min = reader.min_update_index,
            max = reader.max_update_index,
            "opened table"
        );
        Ok(reader)
    }

    /// Open a table file; the reader is named after the file
    pub fn open_file(path: &Path) -> Result<Self> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self::open(Box::new(FileBlockSource::open(path)?), name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Size of the table in bytes
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    pub fn min_update_index(&self) -> u64 {
        self.min_update_index
    }

    pub fn max_update_index(&self) -> u64 {
        self.max_update_index
    }

    pub fn has_ref_index(&self) -> bool {
        self.ref_index.is_some()
    }

    pub fn has_obj_index(&self) -> bool {
        !self.objs.is_empty()
    }

    /// Iterate all records of a type from the start of its section
    pub fn iter(&self, block_type: u8) -> TableIter<'_> {
        let span = self.span(block_type);
        self.section_iter(span, block_type, None)
    }

    /// Iterate records of a type from the first key `>= key`
    pub fn seek_record(&self, block_type: u8, key: &[u8]) -> Result<TableIter<'_>> {
        let span = self.span(block_type);
        if span.is_empty() {
            return Ok(self.section_iter(span, block_type, None));
        }

        let offset = match (&self.ref_index, block_type) {
            (Some(index), BLOCK_TYPE_REF) => {
                let i = index.partition_point(|r| r.last_key.as_slice() < key);
                match index.get(i) {
                    Some(r) => r.offset,
                    // Past the last ref
                    None => return Ok(self.section_iter(Span::default(), block_type, None)),
                }
            }
            _ => self.find_block(block_type, span, key)?,
        };

        let block = self.read_block_at(offset, span.end)?;
        if block.block_type() != block_type {
            return Err(ReftableError::format(format!(
                "{}: expected {} block at {}",
                self.name, block_type as char, offset
            )));
        }
        let rest = Span {
            start: offset + block.len() as u64,
            end: span.end,
        };
        let first = block.seek(key)?;
        Ok(self.section_iter(rest, block_type, Some(first)))
    }

    /// Refs whose value or peeled value is `oid`
    pub fn refs_for(&self, oid: &[u8]) -> Result<Vec<RefRecord>> {
        if !self.has_obj_index() || self.obj_id_len == 0 {
            return self.scan_refs_for(oid);
        }

        let prefix = &oid[..self.obj_id_len.min(oid.len())];
        let offsets = match self.seek_record(BLOCK_TYPE_OBJ, prefix)?.next().transpose()? {
            Some(Record::Obj(obj)) if obj.hash_prefix == prefix => obj.offsets,
            _ => return Ok(Vec::new()),
        };

        let mut refs = Vec::new();
        for offset in offsets {
            let block = self.read_block_at(offset, self.refs.end)?;
            if block.block_type() != BLOCK_TYPE_REF {
                return Err(ReftableError::format(format!(
                    "{}: object index points at a non-ref block at {}",
                    self.name, offset
                )));
            }
            for rec in self.section_iter(Span::default(), BLOCK_TYPE_REF, Some(block.iter())) {
                if let Record::Ref(r) = rec? {
                    if r.points_to(oid) {
                        refs.push(r);
                    }
                }
            }
        }
        Ok(refs)
    }

    fn scan_refs_for(&self, oid: &[u8]) -> Result<Vec<RefRecord>> {
        let mut refs = Vec::new();
        for rec in self.iter(BLOCK_TYPE_REF) {
            if let Record::Ref(r) = rec? {
                if r.points_to(oid) {
                    refs.push(r);
                }
            }
        }
        Ok(refs)
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn span(&self, block_type: u8) -> Span {
        match block_type {
            BLOCK_TYPE_REF => self.refs,
            BLOCK_TYPE_OBJ => self.objs,
            BLOCK_TYPE_LOG => self.logs,
            _ => Span::default(),
        }
    }

    fn section_iter(&self, span: Span, block_type: u8, first: Option<BlockIter>) -> TableIter<'_> {
        TableIter {
            reader: self,
            block_type,
            block: first,
            next_offset: span.start,
            end: span.end,
        }
    }

    /// Read the block starting at `offset`, which must end by `end`
    fn read_block_at(&self, offset: u64, end: u64) -> Result<BlockReader> {
        let head = self.source.read_block(offset, BLOCK_HEADER_SIZE)?;
        let len = get_u24(&head[1..4]) as u64;
        if len < BLOCK_HEADER_SIZE as u64 || offset + len > end {
            return Err(ReftableError::format(format!(
                "{}: block at {} of {} bytes overruns its section",
                self.name, offset, len
            )));
        }
        BlockReader::new(self.source.read_block(offset, len as usize)?)
    }

    /// Offset of the last block in `span` whose first key is `<= key`, or
    /// of the first block if there is none
    fn find_block(&self, block_type: u8, span: Span, key: &[u8]) -> Result<u64> {
        let starts = self.block_starts(block_type, span)?;
        let i = starts.partition_point(|(first, _)| first.as_slice() <= key);
        Ok(starts.get(i.saturating_sub(1)).map_or(span.start, |&(_, offset)| offset))
    }

    fn block_starts(&self, block_type: u8, span: Span) -> Result<&[BlockStart]> {
        let cell = match block_type {
            BLOCK_TYPE_REF => &self.ref_starts,
            BLOCK_TYPE_OBJ => &self.obj_starts,
            _ => &self.log_starts,
        };
        if let Some(starts) = cell.get() {
            return Ok(starts);
        }

        let mut starts = Vec::new();
        let mut offset = span.start;
        while offset < span.end {
            let block = self.read_block_at(offset, span.end)?;
            starts.push((block.first_key()?, offset));
            offset += block.len() as u64;
        }
        Ok(cell.get_or_init(|| starts))
    }
}

impl Table for Reader {
    fn seek_ref(&self, name: &str) -> Result<RefIter<'_>> {
        Ok(refs_only(self.seek_record(BLOCK_TYPE_REF, name.as_bytes())?))
    }

    fn seek_log(&self, name: &str, update_index: u64) -> Result<LogIter<'_>> {
        Ok(logs_only(self.seek_record(BLOCK_TYPE_LOG, &log_key(name, update_index))?))
    }

    fn min_update_index(&self) -> u64 {
        self.min_update_index
    }

    fn max_update_index(&self) -> u64 {
        self.max_update_index
    }
}

// =============================================================================
// Table Iterator
// =============================================================================

/// Records of one section, block after block.
///
/// Ref update indexes are rebased onto the table minimum. The iterator stops
/// after the first error.
pub struct TableIter<'a> {
    reader: &'a Reader,
    block_type: u8,
    block: Option<BlockIter>,
    next_offset: u64,
    end: u64,
}

impl TableIter<'_> {
    fn next_record(&mut self) -> Result<Option<Record>> {
        loop {
            if let Some(block) = self.block.as_mut() {
                if let Some(mut rec) = block.next_record()? {
                    if let Record::Ref(r) = &mut rec {
                        r.update_index += self.reader.min_update_index;
                    }
                    return Ok(Some(rec));
                }
                self.block = None;
            }

            if self.next_offset >= self.end {
                return Ok(None);
            }
            let block = self.reader.read_block_at(self.next_offset, self.end)?;
            if block.block_type() != self.block_type {
                return Err(ReftableError::format(format!(
                    "{}: expected {} block at {}, found {}",
                    self.reader.name,
                    self.block_type as char,
                    self.next_offset,
                    block.block_type() as char
                )));
            }
            self.next_offset += block.len() as u64;
            self.block = Some(block.iter());
        }
    }
}

impl Iterator for TableIter<'_> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_record() {
            Ok(rec) => rec.map(Ok),
            Err(e) => {
                self.block = None;
                self.next_offset = self.end;
                Some(Err(e))
            }
        }
    }
}
