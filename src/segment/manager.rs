//! Segment Manager
//!
//! Owns the active segment and enforces size-based rotation.
//!
//! ## Concurrency:
//! - Not internally synchronized; the engine keeps it behind its single
//!   write mutex so "compute offset → write → sync" is one step
//! - Reads never go through the manager (see `segment::read_at`)

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::Result;
use crate::keydir::IndexEntry;
use crate::record::RecordFlag;

use super::SegmentWriter;

/// Manages the active (appendable) segment
pub struct SegmentManager {
    /// Directory holding all segments
    dir: PathBuf,
    /// Rotation threshold in bytes
    size_limit: u64,
    /// The active segment
    active: SegmentWriter,
}

impl SegmentManager {
    /// Open the active segment `active_id` for appending
    ///
    /// `valid_len` is the last clean record boundary found by recovery, if
    /// the segment was scanned.
    pub fn open(dir: &Path, active_id: u32, valid_len: Option<u64>, size_limit: u64) -> Result<Self> {
        let active = SegmentWriter::open_append(dir, active_id, valid_len)?;

        debug!(
            segment = active_id,
            len = active.len(),
            "opened active segment"
        );

        Ok(Self {
            dir: dir.to_path_buf(),
            size_limit,
            active,
        })
    }

    /// Id of the active segment
    pub fn active_id(&self) -> u32 {
        self.active.id()
    }

    /// Current length of the active segment
    pub fn active_len(&self) -> u64 {
        self.active.len()
    }

    /// Durably append one record, rotating first if the active segment is full
    pub fn append(&mut self, key: &str, value: &[u8], flag: RecordFlag) -> Result<IndexEntry> {
        if self.active.len() >= self.size_limit {
            self.rotate()?;
        }
        self.active.append(key, value, flag, true)
    }

    /// Seal the active segment and start the next one
    ///
    /// Returns the id of the segment that was sealed.
    pub fn rotate(&mut self) -> Result<u32> {
        let next = self.active.id() + 1;
        self.rotate_to(next)
    }

    /// Seal the active segment and start segment `next_id`
    ///
    /// `next_id` must be greater than the current active id.
    pub fn rotate_to(&mut self, next_id: u32) -> Result<u32> {
        debug_assert!(next_id > self.active.id());

        self.active.sync()?;
        let sealed = self.active.id();

        self.active = SegmentWriter::create(&self.dir, next_id)?;
        super::sync_dir(&self.dir)?;

        debug!(sealed, active = next_id, "rotated active segment");
        Ok(sealed)
    }

    /// Flush the active segment to disk
    pub fn sync(&mut self) -> Result<()> {
        self.active.sync()
    }
}

// =============================================================================
// Tests
// =============================================================================
