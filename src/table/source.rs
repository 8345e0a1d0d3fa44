//! Block Sources
//!
//! Random-access byte providers a [`Reader`](super::Reader) pulls blocks
//! from. A file-backed source serves segments on disk; a byte source serves
//! tables built in memory.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::error::{ReftableError, Result};

/// Random access to the bytes of one table
pub trait BlockSource: Send + Sync {
    /// Total size of the table in bytes
    fn size(&self) -> u64;

    /// Read exactly `len` bytes starting at `offset`
    fn read_block(&self, offset: u64, len: usize) -> Result<Bytes>;
}

fn check_range(size: u64, offset: u64, len: usize) -> Result<()> {
    match offset.checked_add(len as u64) {
        Some(end) if end <= size => Ok(()),
        _ => Err(ReftableError::format(format!(
            "read of {} bytes at {} past end of table ({} bytes)",
            len, offset, size
        ))),
    }
}

// =============================================================================
// File Source
// =============================================================================

/// Serves blocks from an open file.
///
/// The handle sits behind a mutex because seeking mutates the file
/// position; readers share the source through `&self`.
pub struct FileBlockSource {
    file: Mutex<File>,
    size: u64,
}

impl FileBlockSource {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let size = file.metadata()?.len();
        Ok(Self {
            file: Mutex::new(file),
            size,
        })
    }
}

impl BlockSource for FileBlockSource {
    fn size(&self) -> u64 {
        self.size
    }

    fn read_block(&self, offset: u64, len: usize) -> Result<Bytes> {
        check_range(self.size, offset, len)?;

        let mut buf = vec![0u8; len];
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut buf)?;
        Ok(Bytes::from(buf))
    }
}

// =============================================================================
// In-Memory Source
// =============================================================================

/// Serves blocks from a byte buffer
#[derive(Clone)]
pub struct ByteBlockSource {
    data: Bytes,
}

impl ByteBlockSource {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }
}

impl BlockSource for ByteBlockSource {
    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn read_block(&self, offset: u64, len: usize) -> Result<Bytes> {
        check_range(self.size(), offset, len)?;
        let start = offset as usize;
        Ok(self.data.slice(start..start + len))
    }
}
