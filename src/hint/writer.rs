//! Hint Writer
//!
//! Appends hint records next to the owning data segment.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::error::Result;
use crate::keydir::IndexEntry;

use super::encode_hint;

/// Append-only writer for one segment's hint file
pub struct HintWriter {
    file: File,
    /// Current hint file length
    len: u64,
}

impl HintWriter {
    /// Open (or create) a hint file for appending
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let len = file.metadata()?.len();
        Ok(Self { file, len })
    }

    /// Current length in bytes
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Append the hint for one record (not synced)
    pub fn append(&mut self, key: &str, entry: &IndexEntry) -> Result<()> {
        let bytes = encode_hint(key, entry);
        self.file.write_all(&bytes)?;
        self.len += bytes.len() as u64;
        Ok(())
    }

    /// Cut the hint file back to `len` bytes
    pub fn truncate(&mut self, len: u64) -> Result<()> {
        self.file.set_len(len)?;
        self.len = len;
        Ok(())
    }

    /// Force appended hints to disk
    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }
}

/// Replace the hint file at `path` with `records`
///
/// Written to a temporary file first and renamed into place.
pub fn write_hints(path: &Path, records: &[(String, IndexEntry)]) -> Result<()> {
    let tmp_path = path.with_extension("hint.tmp");

    {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)?;
        let mut writer = BufWriter::new(file);
        for (key, entry) in records {
            writer.write_all(&encode_hint(key, entry))?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()?;
    }

    fs::rename(&tmp_path, path)?;
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
