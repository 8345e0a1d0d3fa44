//! Merged View
//!
//! Presents an ordered list of tables (oldest first) as one sorted table.
//! When several tables hold the same key, the newest one wins and the
//! shadowed records are skipped.

use std::cmp::Ordering;
use std::collections::{BTreeSet, BinaryHeap};

use crate::error::Result;
use crate::record::{log_key, Record, RefRecord, BLOCK_TYPE_LOG, BLOCK_TYPE_REF};

use super::reader::{Reader, TableIter};
use super::{logs_only, read_ref, refs_only, LogIter, RefIter, Table};

/// Stack of tables read as one
#[derive(Default)]
pub struct Merged {
    readers: Vec<Reader>,
}

impl Merged {
    /// `readers` must be ordered oldest first
    pub fn new(readers: Vec<Reader>) -> Self {
        Self { readers }
    }

    pub fn readers(&self) -> &[Reader] {
        &self.readers
    }

    pub fn into_readers(self) -> Vec<Reader> {
        self.readers
    }

    pub fn len(&self) -> usize {
        self.readers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readers.is_empty()
    }

    /// Every visible record of a type, tombstones included
    pub fn iter(&self, block_type: u8) -> Result<MergedIter<'_>> {
        merge_iter(&self.readers, block_type)
    }

    /// Visible records of a type from the first key `>= key`
    pub fn seek_record(&self, block_type: u8, key: &[u8]) -> Result<MergedIter<'_>> {
        let iters = self
            .readers
            .iter()
            .map(|r| r.seek_record(block_type, key))
            .collect::<Result<Vec<_>>>()?;
        MergedIter::new(iters)
    }

    /// Refs whose current value or peeled value is `oid`
    pub fn refs_for(&self, oid: &[u8]) -> Result<Vec<RefRecord>> {
        let mut names = BTreeSet::new();
        for reader in &self.readers {
            names.extend(reader.refs_for(oid)?.into_iter().map(|r| r.ref_name));
        }

        let mut refs = Vec::new();
        for name in names {
            // A newer table may have moved or deleted the ref
            if let Some(rec) = read_ref(self, &name)? {
                if rec.points_to(oid) {
                    refs.push(rec);
                }
            }
        }
        Ok(refs)
    }
}

impl Table for Merged {
    fn seek_ref(&self, name: &str) -> Result<RefIter<'_>> {
        Ok(refs_only(self.seek_record(BLOCK_TYPE_REF, name.as_bytes())?))
    }

    fn seek_log(&self, name: &str, update_index: u64) -> Result<LogIter<'_>> {
        Ok(logs_only(self.seek_record(BLOCK_TYPE_LOG, &log_key(name, update_index))?))
    }

    fn min_update_index(&self) -> u64 {
        self.readers.first().map_or(0, Reader::min_update_index)
    }

    fn max_update_index(&self) -> u64 {
        self.readers.last().map_or(0, Reader::max_update_index)
    }
}

/// Merge whole sections of `readers`, which are ordered oldest first
pub(crate) fn merge_iter(readers: &[Reader], block_type: u8) -> Result<MergedIter<'_>> {
    MergedIter::new(readers.iter().map(|r| r.iter(block_type)).collect())
}

// =============================================================================
// Merged Iterator
// =============================================================================

/// Head record of one sub-iterator
struct HeapEntry {
    key: Vec<u8>,
    /// Position of the source table; higher is newer
    index: usize,
    record: Record,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    // BinaryHeap pops the greatest entry: smallest key, then newest table
    fn cmp(&self, other: &Self) -> Ordering {
        other.key.cmp(&self.key).then(self.index.cmp(&other.index))
    }
}

/// K-way merge over per-table iterators
pub struct MergedIter<'a> {
    iters: Vec<TableIter<'a>>,
    heap: BinaryHeap<HeapEntry>,
}

impl<'a> MergedIter<'a> {
    fn new(iters: Vec<TableIter<'a>>) -> Result<Self> {
        let mut merged = Self {
            heap: BinaryHeap::with_capacity(iters.len()),
            iters,
        };
        for i in 0..merged.iters.len() {
            merged.advance(i)?;
        }
        Ok(merged)
    }

    fn advance(&mut self, index: usize) -> Result<()> {
        if let Some(record) = self.iters[index].next().transpose()? {
            self.heap.push(HeapEntry {
                key: record.key(),
                index,
                record,
            });
        }
        Ok(())
    }

    fn next_record(&mut self) -> Result<Option<Record>> {
        let Some(top) = self.heap.pop() else {
            return Ok(None);
        };
        self.advance(top.index)?;

        // Drop older records shadowed by `top`
        while self.heap.peek().is_some_and(|e| e.key == top.key) {
            if let Some(shadowed) = self.heap.pop() {
                self.advance(shadowed.index)?;
            }
        }
        Ok(Some(top.record))
    }
}

impl Iterator for MergedIter<'_> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_record() {
            Ok(rec) => rec.map(Ok),
            Err(e) => {
                self.heap.clear();
                self.iters.clear();
                Some(Err(e))
            }
        }
    }
}
