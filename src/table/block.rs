//! Blocks
//!
//! ## Layout
//! ```text
//! ┌──────────┬────────────┬───────────────────────┬──────────────────┬─────────────┐
//! │ type (1) │ length (3) │ records               │ restarts (3 each)│ count (2)   │
//! └──────────┴────────────┴───────────────────────┴──────────────────┴─────────────┘
//! ```
//! `length` covers the whole block. Every record is a prefix-compressed key
//! followed by its payload. Restart offsets point at records whose key is
//! stored in full; readers binary search them before scanning linearly.

use bytes::Bytes;

use crate::codec::{decode_key, decode_restart_key, encode_key, encoded_key_len};
use crate::config::MAX_BLOCK_SIZE;
use crate::error::{ReftableError, Result};
use crate::record::{is_block_type, Record};

use super::{get_u16, get_u24, put_u24};

/// Type byte plus the u24 block length
pub(crate) const BLOCK_HEADER_SIZE: usize = 4;

const RESTART_ENTRY_SIZE: usize = 3;
const RESTART_COUNT_SIZE: usize = 2;

// =============================================================================
// Block Writer
// =============================================================================

/// Accumulates records of one type into a single block
pub struct BlockWriter {
    buf: Vec<u8>,
    block_type: u8,
    block_size: usize,
    restart_interval: usize,
    restarts: Vec<u32>,
    last_key: Vec<u8>,
    entries: usize,
    since_restart: usize,
}

impl BlockWriter {
    pub fn new(block_type: u8, block_size: u32, restart_interval: usize) -> Self {
        let mut buf = Vec::with_capacity(block_size as usize);
        buf.push(block_type);
        buf.extend_from_slice(&[0; 3]);

        Self {
            buf,
            block_type,
            block_size: block_size as usize,
            restart_interval: restart_interval.max(1),
            restarts: Vec::new(),
            last_key: Vec::new(),
            entries: 0,
            since_restart: 0,
        }
    }

    pub fn block_type(&self) -> u8 {
        self.block_type
    }

    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }

    /// Key of the most recently added record
    pub fn last_key(&self) -> &[u8] {
        &self.last_key
    }

    /// Size of the block if it were finished now
    pub fn len(&self) -> usize {
        self.buf.len() + self.restarts.len() * RESTART_ENTRY_SIZE + RESTART_COUNT_SIZE
    }

    /// Append `rec`.
    ///
    /// Returns `Ok(false)` without changing the block if the record does not
    /// fit. An empty block accepts a record larger than the block size, up
    /// to the largest length the block header can express.
    pub fn add(&mut self, rec: &mut Record) -> Result<bool> {
        let key = rec.key();
        let force_restart = self.since_restart == 0 || self.since_restart >= self.restart_interval;
        let prev: &[u8] = if force_restart { &[] } else { &self.last_key };

        let key_len = encoded_key_len(prev, &key);
        let mut entry = vec![0u8; key_len + rec.encoded_len()];

        let (n, is_restart) = encode_key(&mut entry, prev, &key, rec.val_type())
            .ok_or_else(|| ReftableError::format("value type does not fit in a key"))?;
        let m = rec
            .encode(&mut entry[n..])
            .ok_or_else(|| ReftableError::format(format!("cannot encode {}", rec)))?;
        entry.truncate(n + m);

        let register = is_restart && self.restarts.len() < usize::from(u16::MAX);
        let new_restarts = self.restarts.len() + usize::from(register);
        let total = self.buf.len() + entry.len() + new_restarts * RESTART_ENTRY_SIZE + RESTART_COUNT_SIZE;

        if total > self.block_size {
            if self.entries > 0 {
                return Ok(false);
            }
            if total > MAX_BLOCK_SIZE as usize {
                return Err(ReftableError::Api(format!(
                    "{} needs {} bytes, more than a block can hold",
                    rec, total
                )));
            }
        }

        if register {
            self.restarts.push(self.buf.len() as u32);
            self.since_restart = 0;
        }
        self.buf.extend_from_slice(&entry);
        self.last_key = key;
        self.entries += 1;
        self.since_restart += 1;
        Ok(true)
    }

    /// Append the restart table and patch the block length
    pub fn finish(mut self) -> Vec<u8> {
        for &offset in &self.restarts {
            let mut b = [0u8; 3];
            put_u24(&mut b, offset);
            self.buf.extend_from_slice(&b);
        }
        self.buf.extend_from_slice(&(self.restarts.len() as u16).to_be_bytes());

        let len = self.buf.len() as u32;
        put_u24(&mut self.buf[1..4], len);
        self.buf
    }
}

// =============================================================================
// Block Reader
// =============================================================================

/// A validated block, cheap to clone
#[derive(Clone)]
pub struct BlockReader {
    data: Bytes,
    block_type: u8,
    /// End of the record area, start of the restart table
    records_end: usize,
    restart_count: usize,
}

impl BlockReader {
    pub fn new(data: Bytes) -> Result<Self> {
        if data.len() < BLOCK_HEADER_SIZE + RESTART_COUNT_SIZE {
            return Err(ReftableError::format(format!("block too short ({} bytes)", data.len())));
        }

        let block_type = data[0];
        if !is_block_type(block_type) {
            return Err(ReftableError::format(format!("unknown block type {:#04x}", block_type)));
        }

        let len = get_u24(&data[1..4]) as usize;
        if len != data.len() {
            return Err(ReftableError::format(format!(
                "block length {} does not match {} bytes read",
                len,
                data.len()
            )));
        }

        let restart_count = usize::from(get_u16(&data[len - RESTART_COUNT_SIZE..]));
        let records_end = (len - RESTART_COUNT_SIZE)
            .checked_sub(restart_count * RESTART_ENTRY_SIZE)
            .filter(|&end| end >= BLOCK_HEADER_SIZE)
            .ok_or_else(|| ReftableError::format("restart table overruns block"))?;

        let reader = Self {
            data,
            block_type,
            records_end,
            restart_count,
        };
        for i in 0..restart_count {
            let offset = reader.restart_offset(i);
            if offset < BLOCK_HEADER_SIZE || offset >= records_end {
                return Err(ReftableError::format(format!("restart offset {} out of range", offset)));
            }
        }
        Ok(reader)
    }

    pub fn block_type(&self) -> u8 {
        self.block_type
    }

    /// Full length of the block, header included
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records_end == BLOCK_HEADER_SIZE
    }

    /// Key of the first record; always stored in full
    pub fn first_key(&self) -> Result<Vec<u8>> {
        if self.is_empty() {
            return Err(ReftableError::format("empty block has no first key"));
        }
        decode_restart_key(&self.data[..self.records_end], BLOCK_HEADER_SIZE)
    }

    fn restart_offset(&self, i: usize) -> usize {
        let at = self.records_end + i * RESTART_ENTRY_SIZE;
        get_u24(&self.data[at..at + RESTART_ENTRY_SIZE]) as usize
    }

    fn restart_key(&self, i: usize) -> Result<Vec<u8>> {
        decode_restart_key(&self.data[..self.records_end], self.restart_offset(i))
    }

    /// Iterate from the first record
    pub fn iter(&self) -> BlockIter {
        self.iter_at(BLOCK_HEADER_SIZE)
    }

    fn iter_at(&self, offset: usize) -> BlockIter {
        BlockIter {
            data: self.data.clone(),
            block_type: self.block_type,
            end: self.records_end,
            offset,
            last_key: Vec::new(),
        }
    }

    /// Iterate from the first record whose key is `>= key`
    pub fn seek(&self, key: &[u8]) -> Result<BlockIter> {
        // Find the last restart whose key is <= `key`
        let (mut lo, mut hi) = (0, self.restart_count);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.restart_key(mid)?.as_slice() <= key {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }

        let start = match lo {
            0 => BLOCK_HEADER_SIZE,
            i => self.restart_offset(i - 1),
        };
        let mut iter = self.iter_at(start);
        iter.skip_to(key)?;
        Ok(iter)
    }
}

// =============================================================================
// Block Iterator
// =============================================================================

/// Sequential decoder over the records of one block
#[derive(Clone)]
pub struct BlockIter {
    data: Bytes,
    block_type: u8,
    end: usize,
    offset: usize,
    last_key: Vec<u8>,
}

impl BlockIter {
    /// Decode the next record, `Ok(None)` at the end of the block
    pub fn next_record(&mut self) -> Result<Option<Record>> {
        if self.offset >= self.end {
            return Ok(None);
        }

        let buf = &self.data[self.offset..self.end];
        let (n, key, val_type) = decode_key(buf, &self.last_key)
            .ok_or_else(|| ReftableError::format(format!("bad key at offset {}", self.offset)))?;
        let (rec, m) = Record::decode(self.block_type, &buf[n..], &key, val_type).ok_or_else(|| {
            ReftableError::format(format!(
                "bad {} record at offset {}",
                self.block_type as char, self.offset
            ))
        })?;

        self.offset += n + m;
        self.last_key = key;
        Ok(Some(rec))
    }

    /// Advance past every record whose key is `< key`
    fn skip_to(&mut self, key: &[u8]) -> Result<()> {
        loop {
            let saved = (self.offset, self.last_key.clone());
            match self.next_record()? {
                Some(rec) if rec.key().as_slice() < key => continue,
                Some(_) => {
                    (self.offset, self.last_key) = saved;
                    return Ok(());
                }
                None => return Ok(()),
            }
        }
    }
}

impl Iterator for BlockIter {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_record() {
            Ok(rec) => rec.map(Ok),
            Err(e) => {
                self.offset = self.end;
                Some(Err(e))
            }
        }
    }
}
