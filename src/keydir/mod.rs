//! KeyDir Module
//!
//! In-memory index mapping every key to the location of its newest record.
//!
//! ## Responsibilities
//! - Point lookups on every `get`
//! - Atomic per-key replacement on every write
//! - Version-ordered merging of recovery results
//! - Snapshot iteration for checkpoints and key listing
//!
//! ## Data Structure Choice
//! A fixed set of `RwLock<HashMap>` shards:
//! - Lookups on different shards never contend
//! - A writer holds one shard lock only for the duration of a single replace
//! - No ordering is implied between keys

mod table;

pub use table::KeyDir;

use crate::record::{RecordFlag, HEADER_SIZE};

/// Location of a key's newest record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    /// Segment holding the record
    pub segment_id: u32,

    /// Absolute offset of the first value byte
    /// (for tombstones: where the value would start)
    pub value_offset: u64,

    /// Value length in bytes (0 for tombstones)
    pub value_size: u32,

    /// PUT or TOMBSTONE
    pub flag: RecordFlag,

    /// Absolute offset of the record header
    pub record_start: u64,
}

impl IndexEntry {
    /// Build an entry for a record starting at `record_start`
    pub fn new(
        segment_id: u32,
        record_start: u64,
        key_len: usize,
        value_size: u32,
        flag: RecordFlag,
    ) -> Self {
        Self {
            segment_id,
            value_offset: record_start + HEADER_SIZE + key_len as u64,
            value_size,
            flag,
            record_start,
        }
    }

    /// Rebuild an entry from a persisted value offset (hint or checkpoint)
    ///
    /// Returns `None` if the offset cannot belong to a record with this key.
    pub fn from_value_offset(
        segment_id: u32,
        value_offset: u64,
        value_size: u32,
        flag: RecordFlag,
        key_len: usize,
    ) -> Option<Self> {
        let record_start = value_offset.checked_sub(HEADER_SIZE + key_len as u64)?;
        Some(Self {
            segment_id,
            value_offset,
            value_size,
            flag,
            record_start,
        })
    }

    /// Synthetic version: segment id in the high 32 bits, offset in the low 32
    pub fn version(&self) -> u64 {
        (self.segment_id as u64) << 32 | (self.record_start & 0xFFFF_FFFF)
    }

    /// True if `self` should replace `other` for the same key
    pub fn supersedes(&self, other: &IndexEntry) -> bool {
        self.version() > other.version()
    }

    pub fn is_tombstone(&self) -> bool {
        self.flag.is_tombstone()
    }

    /// Offset one past the last byte of the record
    pub fn record_end(&self) -> u64 {
        self.value_offset + self.value_size as u64
    }
}

// =============================================================================
// Tests
// =============================================================================
