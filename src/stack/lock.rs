//! Lock and pending-file guards
//!
//! Exclusive creation of `<path>.lock` is the only mutual exclusion between
//! processes. A held lock is removed when its guard drops, unless it was
//! committed by renaming it over its target.

use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use crate::error::Result;

/// `<target>.lock`
pub(crate) fn lock_path(target: &Path) -> PathBuf {
    let mut s = OsString::from(target.as_os_str());
    s.push(".lock");
    PathBuf::from(s)
}

/// A held `<target>.lock` file
#[derive(Debug)]
pub(crate) struct LockFile {
    path: PathBuf,
    file: Option<File>,
    committed: bool,
}

impl LockFile {
    /// Create the lock file for `target`.
    ///
    /// Returns `Ok(None)` if another writer holds it.
    pub fn try_acquire(target: &Path) -> Result<Option<Self>> {
        let path = lock_path(target);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => Ok(Some(Self {
                path,
                file: Some(file),
                committed: false,
            })),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Write the manifest content: one segment name per line
    pub fn write_names(&mut self, names: &[String]) -> Result<()> {
        if let Some(file) = self.file.as_mut() {
            file.write_all(names.join("\n").as_bytes())?;
            file.sync_all()?;
        }
        Ok(())
    }

    /// Atomically rename the lock file onto `target`
    pub fn commit(mut self, target: &Path) -> Result<()> {
        self.file = None;
        fs::rename(&self.path, target)?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        self.file = None;
        if !self.committed {
            let _ = fs::remove_file(&self.path);
        }
    }
}

/// A file removed on drop unless kept
#[derive(Debug)]
pub(crate) struct PendingFile {
    path: PathBuf,
    keep: bool,
}

impl PendingFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path, keep: false }
    }

    pub fn keep(mut self) {
        self.keep = true;
    }
}

impl Drop for PendingFile {
    fn drop(&mut self) {
        if !self.keep {
            let _ = fs::remove_file(&self.path);
        }
    }
}

