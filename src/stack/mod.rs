//! Stack Module
//!
//! An auto-compacting stack of tables that reads as one.
//!
//! ## Responsibilities
//! - Track the ordered segment list named by the manifest
//! - Reload when another process changed the manifest
//! - Append new segments transactionally
//! - Compact runs of segments to keep their number logarithmic
//!
//! ## Directory Layout
//! ```text
//! <dir>/
//! ├── 000000000001-000000000002.ref   segment covering update indexes 1..=2
//! ├── 000000000003-000000000003.ref
//! └── ...
//! <manifest>                          one segment name per line, oldest first
//! <manifest>.lock                     held while a transaction commits
//! ```
//!
//! ## Commit Protocol
//! lock → check up to date → stage temp file → write names into the lock
//! file → rename temp file into place → rename lock onto manifest → reload.
//! The final rename is the only externally visible step. Every earlier
//! failure removes the lock and staged files through drop guards.

mod compaction;
mod lock;

use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::{BufWriter, ErrorKind};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use rand::Rng;
use tempfile::NamedTempFile;

use crate::config::Config;
use crate::error::{ReftableError, Result};
use crate::table::{Merged, Reader, Writer};

pub use compaction::{log2, sizes_to_segments, suggest_compaction_segment, CompactionStats, Segment};

use lock::{LockFile, PendingFile};

/// Suffix of segment files
pub const SEGMENT_SUFFIX: &str = ".ref";

/// Segment name without suffix: `%012x-%012x` of min and max update index
pub fn segment_stem(min: u64, max: u64) -> String {
    format!("{:012x}-{:012x}", min, max)
}

/// Canonical file name of the segment covering `min..=max`
pub fn segment_name(min: u64, max: u64) -> String {
    format!("{}{}", segment_stem(min, max), SEGMENT_SUFFIX)
}

/// Parse the update index range from a segment or segment temporary name.
///
/// "00000000000a-00000000000f.ref" → Some((10, 15))
pub fn parse_segment_name(name: &str) -> Option<(u64, u64)> {
    if !name.ends_with(SEGMENT_SUFFIX) {
        return None;
    }
    let stem = name.get(..25)?;
    let (min, max) = stem.split_once('-')?;
    if min.len() != 12 || max.len() != 12 {
        return None;
    }
    let min = u64::from_str_radix(min, 16).ok()?;
    let max = u64::from_str_radix(max, 16).ok()?;
    Some((min, max))
}

/// An auto-compacting stack of tables
///
/// ## Concurrency:
/// - Other processes are coordinated with through lock files only
/// - Every mutating method takes `&mut self`, so a borrowed [`Merged`] view
///   cannot outlive the next reload
pub struct Stack {
    /// Directory holding the segment files
    dir: PathBuf,

    /// Manifest listing the current segments
    manifest: PathBuf,

    config: Config,

    /// Open segments, oldest first
    merged: Merged,

    stats: CompactionStats,
}

impl Stack {
    /// Open the stack described by `manifest`, creating `dir` if needed
    pub fn open(dir: impl AsRef<Path>, manifest: impl AsRef<Path>, config: Config) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let mut stack = Self {
            dir,
            manifest: manifest.as_ref().to_path_buf(),
            config,
            merged: Merged::default(),
            stats: CompactionStats::default(),
        };
        stack.reload_with(true)?;

        tracing::debug!(
            dir = %stack.dir.display(),
            segments = stack.len(),
            "opened stack"
        );
        Ok(stack)
    }

    /// The merged view over all segments
    pub fn merged(&self) -> &Merged {
        &self.merged
    }

    /// Names of the open segments, oldest first
    pub fn segment_names(&self) -> Vec<String> {
        self.merged.readers().iter().map(|r| r.name().to_string()).collect()
    }

    /// Number of segments
    pub fn len(&self) -> usize {
        self.merged.len()
    }

    pub fn is_empty(&self) -> bool {
        self.merged.is_empty()
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn manifest_path(&self) -> &Path {
        &self.manifest
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Compaction counters over the lifetime of this instance
    pub fn stats(&self) -> CompactionStats {
        self.stats
    }

    /// Update index the next added segment will be written at
    pub fn next_update_index(&self) -> u64 {
        self.merged
            .readers()
            .last()
            .map_or(1, |r| r.max_update_index() + 1)
    }

    /// Whether the manifest on disk still names exactly our segments
    pub fn up_to_date(&self) -> Result<bool> {
        let names = self.read_names()?;
        let readers = self.merged.readers();
        Ok(names.len() == readers.len() && names.iter().zip(readers).all(|(n, r)| n == r.name()))
    }

    /// Re-read the manifest, keeping segments that are already open
    pub fn reload(&mut self) -> Result<()> {
        self.reload_with(true)
    }

    /// Release all segments
    pub fn close(self) {
        tracing::debug!(dir = %self.dir.display(), "closing stack");
    }

    // =========================================================================
    // Transactional Add
    // =========================================================================

    /// Add one segment written by `write`.
    ///
    /// The writer's limits are preset to the next update index. A record
    /// offered below that index was computed from a stale view and fails the
    /// attempt with [`ReftableError::LockFailure`], like a held lock does.
    /// On lock failure the stack reloads and the transaction is tried once more;
    /// a second [`ReftableError::LockFailure`] is returned with the stack
    /// reloaded, so the caller may retry. Runs auto-compaction afterwards
    /// unless disabled.
    pub fn add<F>(&mut self, mut write: F) -> Result<()>
    where
        F: FnMut(&mut Writer) -> Result<()>,
    {
        match self.try_add(&mut write) {
            Ok(()) => {}
            Err(ReftableError::LockFailure) => {
                tracing::debug!("add lost a race, reloading and retrying");
                self.reload()?;
                if let Err(e) = self.try_add(&mut write) {
                    if matches!(e, ReftableError::LockFailure) {
                        if let Err(re) = self.reload() {
                            tracing::warn!("reload after failed add: {}", re);
                        }
                    }
                    return Err(e);
                }
            }
            Err(e) => return Err(e),
        }

        if self.config.auto_compact {
            self.auto_compact()?;
        }
        Ok(())
    }

    fn try_add<F>(&mut self, write: &mut F) -> Result<()>
    where
        F: FnMut(&mut Writer) -> Result<()>,
    {
        let Some(mut lock) = LockFile::try_acquire(&self.manifest)? else {
            tracing::warn!(manifest = %self.manifest.display(), "manifest is locked");
            return Err(ReftableError::LockFailure);
        };
        if !self.up_to_date()? {
            return Err(ReftableError::LockFailure);
        }

        let next = self.next_update_index();
        self.remove_orphans(next);

        let tmp = self.temp_segment(&segment_stem(next, next))?;
        let mut writer = Writer::new(BufWriter::new(tmp.as_file().try_clone()?), &self.config);
        writer.set_limits(next, next)?;
        let written = write(&mut writer).and_then(|()| writer.close());

        // A record below the reserved index was built from a stale view,
        // whether or not the writer refused it
        let (min, max) = (writer.min_update_index(), writer.max_update_index());
        let lowest = writer.observed_min_update_index().map_or(min, |m| m.min(min));
        if lowest < next {
            tracing::warn!(lowest, next, "update index below the reserved one");
            return Err(ReftableError::LockFailure);
        }
        written?;
        drop(writer);
        tmp.as_file().sync_all()?;

        let name = segment_name(min, max);
        let mut names = self.segment_names();
        names.push(name.clone());
        lock.write_names(&names)?;

        let dest = self.dir.join(&name);
        let pending = PendingFile::new(dest.clone());
        tmp.persist(&dest).map_err(|e| e.error)?;
        lock.commit(&self.manifest)?;
        pending.keep();

        tracing::info!(segment = %name, segments = names.len(), "added table");
        self.reload()
    }

    // =========================================================================
    // Reload
    // =========================================================================

    /// Read the manifest. A missing manifest is an empty stack.
    fn read_names(&self) -> Result<Vec<String>> {
        match fs::read_to_string(&self.manifest) {
            Ok(content) => Ok(content
                .split('\n')
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Reload from the manifest.
    ///
    /// A segment can vanish between reading the manifest and opening it when
    /// another process compacts concurrently. That is retried with backoff as
    /// long as the manifest keeps changing, until the reload timeout passes.
    /// On error the previous segments stay in place.
    pub(crate) fn reload_with(&mut self, reuse_open: bool) -> Result<()> {
        let deadline = Instant::now() + self.config.reload_timeout;
        let mut delay = Duration::ZERO;

        loop {
            let names = self.read_names()?;
            let err = match self.open_missing(&names, reuse_open) {
                Ok(opened) => {
                    self.install(&names, opened);
                    tracing::debug!(segments = names.len(), "reloaded stack");
                    return Ok(());
                }
                Err(e @ ReftableError::NotFound(_)) => e,
                Err(e) => return Err(e),
            };

            if self.read_names()? == names {
                return Err(err);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(err);
            }

            let jitter = Duration::from_millis(rand::thread_rng().gen_range(1..=2));
            delay = (delay * 2 + jitter).min(deadline - now);
            tracing::debug!(?delay, "manifest changed during reload, retrying");
            thread::sleep(delay);
        }
    }

    /// Open the segments of `names` that are not already held
    fn open_missing(&self, names: &[String], reuse_open: bool) -> Result<HashMap<String, Reader>> {
        let held: HashMap<&str, u64> = if reuse_open {
            self.merged.readers().iter().map(|r| (r.name(), r.size())).collect()
        } else {
            HashMap::new()
        };

        let mut opened = HashMap::new();
        for name in names {
            let path = self.dir.join(name);
            // An expiring compaction in another process rewrites a segment
            // under its own name, so a held handle is only reused if the
            // file on disk still has its size
            if held
                .get(name.as_str())
                .is_some_and(|&size| fs::metadata(&path).is_ok_and(|m| m.len() == size))
            {
                continue;
            }
            let reader = Reader::open_file(&path).map_err(|e| {
                if e.is_not_found() {
                    ReftableError::NotFound(name.clone())
                } else {
                    e
                }
            })?;
            opened.insert(name.clone(), reader);
        }
        Ok(opened)
    }

    /// Swap in the segment list `names`; readers no longer named are closed
    fn install(&mut self, names: &[String], mut opened: HashMap<String, Reader>) {
        let mut current: HashMap<String, Reader> = std::mem::take(&mut self.merged)
            .into_readers()
            .into_iter()
            .map(|r| (r.name().to_string(), r))
            .collect();

        let readers = names
            .iter()
            .filter_map(|n| opened.remove(n).or_else(|| current.remove(n)))
            .collect();
        self.merged = Merged::new(readers);
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    /// Temporary segment file `<stem>_<random>.ref` in the stack directory
    fn temp_segment(&self, stem: &str) -> Result<NamedTempFile> {
        let file = tempfile::Builder::new()
            .prefix(&format!("{}_", stem))
            .suffix(SEGMENT_SUFFIX)
            .tempfile_in(&self.dir)?;
        Ok(file)
    }

    /// Delete segment files left behind by crashed adds: unreferenced files
    /// at or above the next update index. Must hold the manifest lock.
    fn remove_orphans(&self, next: u64) {
        let live: HashSet<String> = self.segment_names().into_iter().collect();
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!("listing {}: {}", self.dir.display(), e);
                return;
            }
        };

        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if live.contains(&name) {
                continue;
            }
            match parse_segment_name(&name) {
                Some((min, _)) if min >= next => {
                    tracing::warn!(file = %name, "removing orphaned segment");
                    if let Err(e) = fs::remove_file(entry.path()) {
                        tracing::warn!("removing {}: {}", name, e);
                    }
                }
                _ => {}
            }
        }
    }
}
