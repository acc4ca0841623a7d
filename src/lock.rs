//! Process Lock
//!
//! Advisory, exclusive lock on a data directory so only one writable engine
//! appends to its segments. The lock is held for the lifetime of the
//! `ProcessLock` value and released when it is dropped.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::debug;

use crate::error::{CaskadeError, Result};

/// Name of the lock file inside the data directory
pub const LOCK_FILE: &str = "LOCK";

/// Exclusive directory lock
#[derive(Debug)]
pub struct ProcessLock {
    file: File,
    path: PathBuf,
}

impl ProcessLock {
    /// Take the lock on `dir`, failing with `AlreadyLocked` if it is held
    pub fn acquire(dir: &Path) -> Result<Self> {
        let path = dir.join(LOCK_FILE);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        match file.try_lock_exclusive() {
            Ok(()) => {}
            Err(e) if is_contended(&e) => {
                return Err(CaskadeError::AlreadyLocked(dir.to_path_buf()));
            }
            Err(e) => return Err(e.into()),
        }

        debug!(path = %path.display(), "acquired directory lock");
        Ok(Self { file, path })
    }

    /// Path of the lock file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// True if `err` means another holder has the lock
fn is_contended(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
        || (err.raw_os_error().is_some()
            && err.raw_os_error() == fs2::lock_contended_error().raw_os_error())
}

impl Drop for ProcessLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

// =============================================================================
// Tests
// =============================================================================
