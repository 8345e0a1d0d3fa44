//! Compaction
//!
//! ## Heuristic
//! Segment sizes are grouped into contiguous runs that share
//! `floor(log2(size))`. The run of two or more segments with the smallest
//! bucket is picked, then extended left over any preceding segment whose
//! bucket does not exceed the bucket of the run's total. The number of
//! segments then stays logarithmic in the total size.
//!
//! ## Range Compaction
//! ```text
//! manifest lock ─► up to date? ─► segment locks ─► release manifest lock
//!      ─► merge into temp file ─► manifest lock ─► splice names ─► publish
//!      ─► delete replaced segments ─► release segment locks ─► reload
//! ```
//! Contention at any lock aborts the attempt without touching any segment.

use std::fs;
use std::io::BufWriter;

use tempfile::NamedTempFile;

use crate::config::LogExpiration;
use crate::error::Result;
use crate::record::{Record, BLOCK_TYPE_LOG, BLOCK_TYPE_REF};
use crate::table::{merge_iter, Writer, TABLE_OVERHEAD};

use super::lock::{LockFile, PendingFile};
use super::{segment_name, segment_stem, Stack, SEGMENT_SUFFIX};

/// Compaction counters over the lifetime of a stack
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompactionStats {
    /// Bytes of segments replaced by compactions
    pub bytes: u64,
    pub attempts: u64,
    /// Attempts that lost a lock race or failed with an error
    pub failures: u64,
}

/// A run of segments `[start, end)` in one size bucket
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Segment {
    pub start: usize,
    /// Exclusive
    pub end: usize,
    pub log: u32,
    pub bytes: u64,
}

impl Segment {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// `floor(log2(size))`; 0 for 0
pub fn log2(size: u64) -> u32 {
    size.checked_ilog2().unwrap_or(0)
}

/// Split sizes into contiguous runs of equal `log2`
pub fn sizes_to_segments(sizes: &[u64]) -> Vec<Segment> {
    let mut segments: Vec<Segment> = Vec::new();
    for (i, &size) in sizes.iter().enumerate() {
        let l = log2(size);
        match segments.last_mut() {
            Some(cur) if cur.log == l => {
                cur.end = i + 1;
                cur.bytes += size;
            }
            _ => segments.push(Segment {
                start: i,
                end: i + 1,
                log: l,
                bytes: size,
            }),
        }
    }
    segments
}

/// Pick the run of segments to compact, if any
pub fn suggest_compaction_segment(sizes: &[u64]) -> Option<Segment> {
    let mut seg = sizes_to_segments(sizes)
        .into_iter()
        .filter(|s| s.len() > 1)
        .min_by_key(|s| s.log)?;

    while seg.start > 0 {
        let prev = seg.start - 1;
        if log2(seg.bytes) < log2(sizes[prev]) {
            break;
        }
        seg.start = prev;
        seg.bytes += sizes[prev];
    }
    Some(seg)
}

impl Stack {
    /// Compact the run suggested by the size heuristic, if any
    pub fn auto_compact(&mut self) -> Result<()> {
        if let Some(seg) = suggest_compaction_segment(&self.sizes_for_compaction()) {
            self.compact_range_stats(seg.start, seg.end - 1, None)?;
        }
        Ok(())
    }

    /// Compact every segment into one, optionally expiring log entries.
    ///
    /// Returns `Ok(false)` if another writer held a needed lock.
    pub fn compact_all(&mut self, expiration: Option<&LogExpiration>) -> Result<bool> {
        if self.is_empty() {
            return Ok(true);
        }
        let last = self.len() - 1;
        self.compact_range_stats(0, last, expiration)
    }

    /// Table sizes without the fixed per-table overhead, at least 1
    fn sizes_for_compaction(&self) -> Vec<u64> {
        self.merged
            .readers()
            .iter()
            .map(|r| r.size().saturating_sub(TABLE_OVERHEAD - 1).max(1))
            .collect()
    }

    fn compact_range_stats(&mut self, first: usize, last: usize, expiration: Option<&LogExpiration>) -> Result<bool> {
        let result = self.compact_range(first, last, expiration);
        if !matches!(result, Ok(true)) {
            self.stats.failures += 1;
        }
        result
    }

    /// Replace segments `first..=last` with one merged segment
    fn compact_range(&mut self, first: usize, last: usize, expiration: Option<&LogExpiration>) -> Result<bool> {
        if first >= last && expiration.is_none() {
            return Ok(true);
        }
        self.stats.attempts += 1;

        let Some(manifest_lock) = LockFile::try_acquire(&self.manifest)? else {
            tracing::warn!("compaction skipped: manifest is locked");
            return Ok(false);
        };
        if !self.up_to_date()? {
            return Ok(false);
        }

        let readers = &self.merged.readers()[first..=last];
        let old_names: Vec<String> = readers.iter().map(|r| r.name().to_string()).collect();
        let old_bytes: u64 = readers.iter().map(|r| r.size()).sum();
        let (min, max) = (readers[0].min_update_index(), readers[readers.len() - 1].max_update_index());

        let mut segment_locks = Vec::with_capacity(old_names.len());
        for name in &old_names {
            match LockFile::try_acquire(&self.dir.join(name))? {
                Some(lock) => segment_locks.push(lock),
                None => {
                    tracing::warn!(segment = %name, "compaction skipped: segment is locked");
                    return Ok(false);
                }
            }
        }

        // Adds may proceed while we merge
        drop(manifest_lock);

        let stem = segment_stem(min, max);
        self.remove_compaction_orphans(&stem);
        let tmp = self.write_compacted(first, last, &stem, expiration)?;

        let Some(mut manifest_lock) = LockFile::try_acquire(&self.manifest)? else {
            tracing::warn!("compaction abandoned: manifest is locked");
            return Ok(false);
        };

        // Splice against the manifest on disk, which may have grown meanwhile
        let mut names = self.read_names()?;
        let Some(pos) = names
            .windows(old_names.len())
            .position(|w| w == old_names.as_slice())
        else {
            tracing::warn!("compaction abandoned: segments left the manifest");
            return Ok(false);
        };
        let new_name = segment_name(min, max);
        names.splice(pos..pos + old_names.len(), [new_name.clone()]);

        let dest = self.dir.join(&new_name);
        manifest_lock.write_names(&names)?;

        // Names are staged first, so the rename below is the last step before
        // the commit. Renaming over a same-named segment publishes it by
        // itself; the manifest content is unchanged, so a failed commit still
        // leaves every named segment complete.
        let pending = (!old_names.contains(&new_name)).then(|| PendingFile::new(dest.clone()));
        tmp.persist(&dest).map_err(|e| e.error)?;
        manifest_lock.commit(&self.manifest)?;
        if let Some(pending) = pending {
            pending.keep();
        }

        for name in &old_names {
            // Expiration can rewrite a segment under its own name
            if *name == new_name {
                continue;
            }
            if let Err(e) = fs::remove_file(self.dir.join(name)) {
                tracing::warn!("removing compacted segment {}: {}", name, e);
            }
        }
        drop(segment_locks);

        self.stats.bytes += old_bytes;
        tracing::info!(
            segment = %new_name,
            replaced = old_names.len(),
            bytes = old_bytes,
            "compacted tables"
        );

        // An expired rewrite may reuse a name, so its old handle is stale
        self.reload_with(expiration.is_none())?;
        Ok(true)
    }

    /// Merge segments `first..=last` into a new temporary file.
    ///
    /// Ref deletions are dropped only when the run starts at the bottom of
    /// the stack; otherwise they still shadow older segments.
    fn write_compacted(
        &self,
        first: usize,
        last: usize,
        stem: &str,
        expiration: Option<&LogExpiration>,
    ) -> Result<NamedTempFile> {
        let tmp = self.temp_segment(stem)?;
        let readers = &self.merged.readers()[first..=last];

        let mut writer = Writer::new(BufWriter::new(tmp.as_file().try_clone()?), &self.config);
        writer.set_limits(readers[0].min_update_index(), readers[readers.len() - 1].max_update_index())?;

        for rec in merge_iter(readers, BLOCK_TYPE_REF)? {
            if let Record::Ref(r) = rec? {
                if first == 0 && r.is_deletion() {
                    continue;
                }
                writer.add_ref(&r)?;
            }
        }

        for rec in merge_iter(readers, BLOCK_TYPE_LOG)? {
            if let Record::Log(l) = rec? {
                if expiration.is_some_and(|exp| !exp.keeps(l.time, l.update_index)) {
                    continue;
                }
                writer.add_log(&l)?;
            }
        }

        writer.close()?;
        drop(writer);
        tmp.as_file().sync_all()?;
        Ok(tmp)
    }

    /// Delete temporaries of an earlier, crashed compaction of the same run.
    /// Must hold the locks of the segments in the run.
    fn remove_compaction_orphans(&self, stem: &str) {
        let prefix = format!("{}_", stem);
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return;
        };
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with(&prefix) && name.ends_with(SEGMENT_SUFFIX) {
                tracing::warn!(file = %name, "removing orphaned compaction output");
                if let Err(e) = fs::remove_file(entry.path()) {
                    tracing::warn!("removing {}: {}", name, e);
                }
            }
        }
    }
}
