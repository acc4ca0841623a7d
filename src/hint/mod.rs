//! Hint Log Module
//!
//! Compact per-segment side index used to rebuild the KeyDir without
//! reading value bytes.
//!
//! ## Hint Record Format
//! ```text
//! ┌────────────┬───────────────┬─────────────┬─────────────────┬──────────┬─────┐
//! │ KeyLen (4) │ ValueSize (4) │ SegmentId(4)│ ValueOffset (8) │ Flag (1) │ Key │
//! └────────────┴───────────────┴─────────────┴─────────────────┴──────────┴─────┘
//! ```
//!
//! One hint record is appended per data record, in the same order. A hint
//! file is only trusted during recovery if it decodes completely and its last
//! record ends exactly where the data segment ends.

mod reader;
mod writer;

pub use reader::read_hints;
pub use writer::{write_hints, HintWriter};

use bytes::BufMut;

use crate::keydir::IndexEntry;

/// Hint header size: KeyLen (4) + ValueSize (4) + SegmentId (4) + ValueOffset (8) + Flag (1)
pub const HINT_HEADER_SIZE: usize = 21;

/// Encode one hint record for `key` at `entry`
pub fn encode_hint(key: &str, entry: &IndexEntry) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HINT_HEADER_SIZE + key.len());
    buf.put_u32(key.len() as u32);
    buf.put_u32(entry.value_size);
    buf.put_u32(entry.segment_id);
    buf.put_u64(entry.value_offset);
    buf.put_u8(entry.flag.as_byte());
    buf.put_slice(key.as_bytes());
    buf
}

/// True if the hint records describe every byte of a `data_len`-byte segment
pub fn covers_segment(records: &[(String, IndexEntry)], data_len: u64) -> bool {
    match records.last() {
        Some((_, last)) => last.record_end() == data_len,
        None => data_len == 0,
    }
}
