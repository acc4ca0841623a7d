//! Segment Writer
//!
//! Appends records to one data segment and its hint file.

use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;

use tracing::warn;

use crate::error::{CaskadeError, Result};
use crate::hint::HintWriter;
use crate::keydir::IndexEntry;
use crate::record::{self, RecordFlag};

use super::{data_path, hint_path};

/// Writer for a single segment (data file + hint file)
pub struct SegmentWriter {
    /// Segment id
    id: u32,
    /// Data file, positioned at its end
    data: File,
    /// Current data file length == offset of the next record
    len: u64,
    /// Hint file for this segment
    hint: HintWriter,
    /// Set when a failed append could not be undone
    poisoned: bool,
}

impl SegmentWriter {
    /// Create a brand-new segment; fails if the data file already exists
    pub fn create(dir: &Path, id: u32) -> Result<Self> {
        let data = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(data_path(dir, id))?;

        let hint_file = hint_path(dir, id);
        if hint_file.exists() {
            // Leftover from a segment that no longer has data
            std::fs::remove_file(&hint_file)?;
        }
        let hint = HintWriter::open(&hint_file)?;

        Ok(Self {
            id,
            data,
            len: 0,
            hint,
            poisoned: false,
        })
    }

    /// Open an existing segment for appending
    ///
    /// If `valid_len` is shorter than the file, the torn tail beyond it is
    /// cut off before any new record is written.
    pub fn open_append(dir: &Path, id: u32, valid_len: Option<u64>) -> Result<Self> {
        let mut data = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(data_path(dir, id))?;

        let mut len = data.metadata()?.len();
        if let Some(valid) = valid_len {
            if valid < len {
                warn!(
                    segment = id,
                    file_len = len,
                    valid_len = valid,
                    "truncating torn tail of active segment"
                );
                data.set_len(valid)?;
                data.sync_all()?;
                len = valid;
            }
        }
        data.seek(SeekFrom::Start(len))?;

        let hint = HintWriter::open(&hint_path(dir, id))?;

        Ok(Self {
            id,
            data,
            len,
            hint,
            poisoned: false,
        })
    }

    /// Segment id
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Current data length in bytes
    pub fn len(&self) -> u64 {
        self.len
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.poisoned {
            return Err(CaskadeError::SegmentPoisoned(self.id));
        }
        Ok(())
    }

    /// Append one record plus its hint
    ///
    /// With `durable` set, the data record is fsynced before the hint is
    /// written and the hint is fsynced before returning.
    ///
    /// If any step fails, data and hint are cut back to their previous
    /// lengths so the failed record never reaches recovery. When that cut
    /// itself fails the writer refuses every later append and sync.
    pub fn append(
        &mut self,
        key: &str,
        value: &[u8],
        flag: RecordFlag,
        durable: bool,
    ) -> Result<IndexEntry> {
        self.ensure_writable()?;
        let bytes = record::encode(key, value, flag)?;

        let start = self.len;
        let hint_len = self.hint.len();

        let value_size = match flag {
            RecordFlag::Put => value.len() as u32,
            RecordFlag::Tombstone => 0,
        };
        let entry = IndexEntry::new(self.id, start, key.len(), value_size, flag);

        if let Err(e) = self.write_record(&bytes, key, &entry, durable) {
            self.roll_back(start, hint_len);
            return Err(e);
        }
        Ok(entry)
    }

    fn write_record(
        &mut self,
        bytes: &[u8],
        key: &str,
        entry: &IndexEntry,
        durable: bool,
    ) -> Result<()> {
        self.data.write_all(bytes)?;
        self.len += bytes.len() as u64;
        if durable {
            self.data.sync_data()?;
        }

        self.hint.append(key, entry)?;
        if durable {
            self.hint.sync()?;
        }
        Ok(())
    }

    /// Cut data and hint back to `data_len` / `hint_len`
    fn roll_back(&mut self, data_len: u64, hint_len: u64) {
        let data = self
            .data
            .set_len(data_len)
            .and_then(|_| self.data.seek(SeekFrom::Start(data_len)))
            .and_then(|_| self.data.sync_data());
        match data {
            Ok(()) => self.len = data_len,
            Err(e) => {
                warn!(segment = self.id, error = %e, "failed to roll back data append");
                self.poisoned = true;
            }
        }

        if let Err(e) = self.hint.truncate(hint_len) {
            warn!(segment = self.id, error = %e, "failed to roll back hint append");
            self.poisoned = true;
        }
    }

    /// Flush data and hint to disk
    pub fn sync(&mut self) -> Result<()> {
        self.ensure_writable()?;
        self.data.sync_all()?;
        self.hint.sync()?;
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::segment::SegmentScanner;

    #[test]
    fn test_append_then_reopen_continues_at_end() {
        let temp = TempDir::new().unwrap();
        let first = {
            let mut writer = SegmentWriter::create(temp.path(), 1).unwrap();
            writer.append("a", b"1", RecordFlag::Put, true).unwrap()
        };

        let mut writer = SegmentWriter::open_append(temp.path(), 1, None).unwrap();
        let second = writer.append("b", b"2", RecordFlag::Put, true).unwrap();

        assert_eq!(second.record_start, first.record_end());
        assert_eq!(writer.len(), second.record_end());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_failed_hint_write_rolls_back_data() {
        let temp = TempDir::new().unwrap();
        std::os::unix::fs::symlink("/dev/full", hint_path(temp.path(), 1)).unwrap();

        let mut writer = SegmentWriter::open_append(temp.path(), 1, None).unwrap();
        assert!(writer.append("k", b"v", RecordFlag::Put, true).is_err());

        assert_eq!(writer.len(), 0);
        assert_eq!(std::fs::metadata(data_path(temp.path(), 1)).unwrap().len(), 0);

        // /dev/full cannot be truncated, so the hint rollback fails too
        let err = writer.append("k", b"v", RecordFlag::Put, true).unwrap_err();
        assert!(matches!(err, CaskadeError::SegmentPoisoned(1)));
        assert!(matches!(writer.sync(), Err(CaskadeError::SegmentPoisoned(1))));

        let scanned = SegmentScanner::open(temp.path(), 1, false).unwrap().count();
        assert_eq!(scanned, 0);
    }
}
