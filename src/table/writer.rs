//! Table Writer
//!
//! Streams sorted ref and log records into a new table. Refs must all be
//! added before the first log; the ref index and object index sections are
//! written when the ref section closes.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};

use crate::codec::common_prefix_len;
use crate::config::Config;
use crate::error::{ReftableError, Result};
use crate::record::{IndexRecord, LogRecord, ObjRecord, Record, RefRecord, BLOCK_TYPE_REF, HASH_SIZE};

use super::block::BlockWriter;
use super::{encode_footer, encode_header, HEADER_SIZE};

/// Shortest object id prefix written to the object index
const MIN_OBJ_ID_LEN: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Refs,
    Logs,
    Closed,
}

/// Counters describing a written table
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterStats {
    pub refs: u64,
    pub logs: u64,
    pub ref_blocks: u64,
    pub blocks: u64,
    /// Object id prefix length used by the object index, 0 if none
    pub obj_id_len: usize,
}

/// Writer for a single table
pub struct Writer<W: Write = BufWriter<File>> {
    out: W,
    block_size: u32,
    restart_interval: usize,
    index_objects: bool,

    min_update_index: u64,
    max_update_index: u64,
    /// Lowest update index of any record offered, even a rejected one
    observed_min: Option<u64>,

    /// Next write position
    offset: u64,
    header_written: bool,
    section: Section,
    block: Option<BlockWriter>,
    last_key: Vec<u8>,

    /// Last key and offset of every ref block
    ref_index: Vec<IndexRecord>,
    /// Object id → offsets of the ref blocks mentioning it
    obj_offsets: BTreeMap<Vec<u8>, Vec<u64>>,

    ref_index_offset: u64,
    obj_offset: u64,
    log_offset: u64,
    stats: WriterStats,
}

impl<W: Write> Writer<W> {
    pub fn new(out: W, config: &Config) -> Self {
        Self {
            out,
            block_size: config.block_size,
            restart_interval: config.restart_interval,
            index_objects: config.index_objects,
            min_update_index: 0,
            max_update_index: 0,
            observed_min: None,
            offset: HEADER_SIZE as u64,
            header_written: false,
            section: Section::Refs,
            block: None,
            last_key: Vec::new(),
            ref_index: Vec::new(),
            obj_offsets: BTreeMap::new(),
            ref_index_offset: 0,
            obj_offset: 0,
            log_offset: 0,
            stats: WriterStats::default(),
        }
    }

    /// Set the update index range of the table.
    ///
    /// Must be called before any record is added.
    pub fn set_limits(&mut self, min: u64, max: u64) -> Result<()> {
        if self.stats.refs > 0 || self.stats.logs > 0 {
            return Err(ReftableError::Api("set_limits after records were added".into()));
        }
        if max < min {
            return Err(ReftableError::Api(format!("limits out of order: {} > {}", min, max)));
        }
        self.min_update_index = min;
        self.max_update_index = max;
        Ok(())
    }

    pub fn min_update_index(&self) -> u64 {
        self.min_update_index
    }

    pub fn max_update_index(&self) -> u64 {
        self.max_update_index
    }

    /// Lowest update index seen by `add_ref` or `add_log`, including records
    /// rejected for falling outside the limits. `None` before the first add.
    ///
    /// A caller that picked its update index from a stale view of a stack
    /// shows up here even though its records were refused.
    pub fn observed_min_update_index(&self) -> Option<u64> {
        self.observed_min
    }

    pub fn stats(&self) -> WriterStats {
        self.stats
    }

    /// Add a ref. Names must be strictly increasing and the update index
    /// must lie within the limits.
    pub fn add_ref(&mut self, rec: &RefRecord) -> Result<()> {
        self.observe(rec.update_index);
        if self.section != Section::Refs {
            return Err(ReftableError::Api(format!("{}: refs must precede logs", rec)));
        }
        if rec.update_index < self.min_update_index || rec.update_index > self.max_update_index {
            return Err(ReftableError::Api(format!(
                "{}: update index outside [{}, {}]",
                rec, self.min_update_index, self.max_update_index
            )));
        }
        let key = rec.key();
        if self.stats.refs > 0 && key <= self.last_key {
            return Err(ReftableError::Api(format!("{}: out of order", rec)));
        }

        let mut stored = rec.clone();
        stored.update_index -= self.min_update_index;
        let block_offset = self.add_record(Record::Ref(stored))?;

        if self.index_objects {
            for oid in [rec.value(), rec.target_value()].into_iter().flatten() {
                let offsets = self.obj_offsets.entry(oid.to_vec()).or_default();
                if offsets.last() != Some(&block_offset) {
                    offsets.push(block_offset);
                }
            }
        }

        self.last_key = key;
        self.stats.refs += 1;
        Ok(())
    }

    /// Add a log entry. Keys must be strictly increasing, so entries of one
    /// ref go newest first.
    pub fn add_log(&mut self, rec: &LogRecord) -> Result<()> {
        self.observe(rec.update_index);
        match self.section {
            Section::Refs => self.finish_refs()?,
            Section::Logs => {}
            Section::Closed => return Err(ReftableError::Api("writer is closed".into())),
        }

        let key = rec.key();
        if self.stats.logs > 0 && key <= self.last_key {
            return Err(ReftableError::Api(format!("{}: out of order", rec)));
        }
        if self.log_offset == 0 {
            self.log_offset = self.offset;
        }

        self.add_record(Record::Log(rec.clone()))?;
        self.last_key = key;
        self.stats.logs += 1;
        Ok(())
    }

    /// Write the remaining sections and the footer, then flush
    pub fn close(&mut self) -> Result<()> {
        match self.section {
            Section::Refs => self.finish_refs()?,
            Section::Logs => {}
            Section::Closed => return Err(ReftableError::Api("writer is closed".into())),
        }
        self.flush_block()?;
        self.write_header()?;

        let footer = encode_footer(
            &self.header(),
            self.ref_index_offset,
            (self.obj_offset << 5) | self.stats.obj_id_len as u64,
            self.log_offset,
        );
        self.out.write_all(&footer)?;
        self.out.flush()?;
        self.offset += footer.len() as u64;
        self.section = Section::Closed;

        tracing::debug!(
            refs = self.stats.refs,
            logs = self.stats.logs,
            blocks = self.stats.blocks,
            bytes = self.offset,
            "table written"
        );
        Ok(())
    }

    /// Unwrap the output, e.g. the bytes of an in-memory table
    pub fn into_inner(self) -> W {
        self.out
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn observe(&mut self, update_index: u64) {
        self.observed_min = Some(self.observed_min.map_or(update_index, |m| m.min(update_index)));
    }

    fn header(&self) -> [u8; HEADER_SIZE] {
        encode_header(self.block_size, self.min_update_index, self.max_update_index)
    }

    fn write_header(&mut self) -> Result<()> {
        if !self.header_written {
            let header = self.header();
            self.out.write_all(&header)?;
            self.header_written = true;
        }
        Ok(())
    }

    /// Add a record to the current block, starting a new block when the
    /// type changes or the block is full. Returns the block's offset.
    fn add_record(&mut self, mut rec: Record) -> Result<u64> {
        if self.block.as_ref().map(BlockWriter::block_type) != Some(rec.block_type()) {
            self.flush_block()?;
        }

        let block_type = rec.block_type();
        let (block_size, restart_interval) = (self.block_size, self.restart_interval);
        let block = self
            .block
            .get_or_insert_with(|| BlockWriter::new(block_type, block_size, restart_interval));
        if block.add(&mut rec)? {
            return Ok(self.offset);
        }

        self.flush_block()?;
        let mut block = BlockWriter::new(block_type, block_size, restart_interval);
        if !block.add(&mut rec)? {
            return Err(ReftableError::Api(format!("{} does not fit in an empty block", rec)));
        }
        self.block = Some(block);
        Ok(self.offset)
    }

    fn flush_block(&mut self) -> Result<()> {
        let Some(block) = self.block.take() else {
            return Ok(());
        };
        if block.is_empty() {
            return Ok(());
        }

        let block_type = block.block_type();
        let last_key = block.last_key().to_vec();
        let data = block.finish();

        self.write_header()?;
        self.out.write_all(&data)?;

        if block_type == BLOCK_TYPE_REF {
            self.ref_index.push(IndexRecord {
                last_key,
                offset: self.offset,
            });
            self.stats.ref_blocks += 1;
        }
        self.offset += data.len() as u64;
        self.stats.blocks += 1;
        Ok(())
    }

    /// Close the ref section and write its indexes
    fn finish_refs(&mut self) -> Result<()> {
        self.flush_block()?;
        self.section = Section::Logs;

        if self.ref_index.len() > 1 {
            self.ref_index_offset = self.offset;
            for rec in std::mem::take(&mut self.ref_index) {
                self.add_record(Record::Index(rec))?;
            }
            self.flush_block()?;
        }

        if self.index_objects && !self.obj_offsets.is_empty() {
            self.write_obj_index()?;
        }
        Ok(())
    }

    fn write_obj_index(&mut self) -> Result<()> {
        let obj_offsets = std::mem::take(&mut self.obj_offsets);

        // Shortest prefix telling adjacent ids apart
        let mut id_len = MIN_OBJ_ID_LEN;
        let mut prev: Option<&Vec<u8>> = None;
        for oid in obj_offsets.keys() {
            if let Some(p) = prev {
                id_len = id_len.max(common_prefix_len(p, oid) + 1);
            }
            prev = Some(oid);
        }
        let id_len = id_len.min(HASH_SIZE);

        self.obj_offset = self.offset;
        self.stats.obj_id_len = id_len;
        for (oid, offsets) in obj_offsets {
            self.add_record(Record::Obj(ObjRecord {
                hash_prefix: oid[..id_len.min(oid.len())].to_vec(),
                offsets,
            }))?;
        }
        self.flush_block()
    }
}

impl Writer<Vec<u8>> {
    /// Writer producing an in-memory table
    pub fn in_memory(config: &Config) -> Self {
        Self::new(Vec::new(), config)
    }
}

