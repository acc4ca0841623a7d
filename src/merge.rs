//! Merge (Compaction)
//!
//! Rewrites the live records of every sealed segment into one new segment
//! and retires the old files.
//!
//! ## Procedure (caller holds the engine's write lock)
//! ```text
//!   sealed: [1] [2] [3]     merged: [M]     active: [M+1]
//!
//!   1. walk 1, 2, 3 in order; copy a record iff the KeyDir still points at it
//!   2. drop KeyDir tombstones that live in retired segments
//!   3. sync M (data + hint)
//!   4. checkpoint the KeyDir, covering everything up to M
//!   5. delete 1, 2, 3 (data + hint), oldest first
//! ```
//! A crash before step 4 recovers to the same KeyDir: M only holds copies of
//! records that were still current, and each copy outranks its source. A
//! crash during step 5 leaves segments the checkpoint already covers; the next
//! merge deletes them.

use std::fs;
use std::path::Path;
use std::time::Instant;

use tracing::{debug, info};

use crate::checkpoint::CheckpointManager;
use crate::error::Result;
use crate::keydir::KeyDir;
use crate::record::RecordFlag;
use crate::segment::{self, SegmentScanner, SegmentWriter};

/// Outcome of one merge
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeStats {
    /// Id of the segment the live records were copied into
    pub merged_segment: u32,

    /// Segments deleted by the merge
    pub retired: Vec<u32>,

    /// Live records copied
    pub records_copied: usize,

    /// Overwritten, deleted or tombstone records left behind
    pub records_dropped: usize,

    /// Tombstone entries removed from the KeyDir
    pub tombstones_dropped: usize,

    /// Data bytes in the retired segments
    pub bytes_before: u64,

    /// Data bytes in the merged segment
    pub bytes_after: u64,
}

/// Compacts a set of sealed segments
pub struct Merger<'a> {
    dir: &'a Path,
    keydir: &'a KeyDir,
    checkpoints: &'a CheckpointManager,
}

impl<'a> Merger<'a> {
    pub fn new(dir: &'a Path, keydir: &'a KeyDir, checkpoints: &'a CheckpointManager) -> Self {
        Self {
            dir,
            keydir,
            checkpoints,
        }
    }

    /// Merge `sealed` (ascending ids) into the new segment `merged_id`
    ///
    /// `merged_id` must be greater than every id in `sealed` and smaller than
    /// the active segment, and no writer may run concurrently.
    pub fn run(&self, sealed: &[u32], merged_id: u32) -> Result<MergeStats> {
        let started = Instant::now();
        let mut stats = MergeStats {
            merged_segment: merged_id,
            ..MergeStats::default()
        };

        let mut out = SegmentWriter::create(self.dir, merged_id)?;

        for &id in sealed {
            debug_assert!(id < merged_id);
            stats.bytes_before += fs::metadata(segment::data_path(self.dir, id))?.len();

            for record in SegmentScanner::open(self.dir, id, true)? {
                let record = record?;
                let current = match self.keydir.get(&record.key) {
                    Some(current) if current == record.entry && !current.is_tombstone() => current,
                    _ => {
                        stats.records_dropped += 1;
                        continue;
                    }
                };

                let value = record.value.unwrap_or_default();
                let moved = out.append(&record.key, &value, RecordFlag::Put, false)?;
                self.keydir.replace_if_current(&record.key, &current, moved);
                stats.records_copied += 1;
            }
        }

        stats.tombstones_dropped = self
            .keydir
            .retain(|_, entry| !(entry.is_tombstone() && entry.segment_id < merged_id));

        out.sync()?;
        stats.bytes_after = out.len();

        self.checkpoints.write(merged_id, &self.keydir.snapshot())?;

        for &id in sealed {
            segment::remove_segment(self.dir, id)?;
            debug!(segment = id, "retired segment");
        }
        segment::sync_dir(self.dir)?;
        stats.retired = sealed.to_vec();

        info!(
            merged_segment = merged_id,
            retired = stats.retired.len(),
            copied = stats.records_copied,
            dropped = stats.records_dropped,
            tombstones_dropped = stats.tombstones_dropped,
            bytes_before = stats.bytes_before,
            bytes_after = stats.bytes_after,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "merge complete"
        );

        Ok(stats)
    }
}

// =============================================================================
// Tests
// =============================================================================
