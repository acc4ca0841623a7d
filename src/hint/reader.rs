//! Hint Reader
//!
//! Loads a whole hint file into (key, IndexEntry) pairs.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use bytes::Buf;

use crate::error::{CaskadeError, Result};
use crate::keydir::IndexEntry;
use crate::record::RecordFlag;

use super::HINT_HEADER_SIZE;

/// Read every hint record for `segment_id` from `path`
///
/// Returns:
/// - `Ok(None)`: no hint file
/// - `Ok(Some(records))`: fully decoded, in append order
/// - `Err(Corruption)`: torn or inconsistent hint file
pub fn read_hints(path: &Path, segment_id: u32) -> Result<Option<Vec<(String, IndexEntry)>>> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let mut buf = data.as_slice();
    let mut records = Vec::new();

    while buf.has_remaining() {
        if buf.remaining() < HINT_HEADER_SIZE {
            return Err(corrupt(path, "truncated hint header"));
        }

        let key_len = buf.get_u32() as usize;
        let value_size = buf.get_u32();
        let hinted_segment = buf.get_u32();
        let value_offset = buf.get_u64();
        let flag_byte = buf.get_u8();

        if hinted_segment != segment_id {
            return Err(corrupt(
                path,
                &format!("hint names segment {}", hinted_segment),
            ));
        }
        let flag = RecordFlag::from_byte(flag_byte)
            .ok_or_else(|| corrupt(path, &format!("unknown flag {}", flag_byte)))?;

        if buf.remaining() < key_len {
            return Err(corrupt(path, "truncated hint key"));
        }
        let key = String::from_utf8(buf[..key_len].to_vec())
            .map_err(|_| corrupt(path, "hint key is not UTF-8"))?;
        buf.advance(key_len);

        let entry =
            IndexEntry::from_value_offset(segment_id, value_offset, value_size, flag, key_len)
                .ok_or_else(|| corrupt(path, "value offset precedes record header"))?;

        records.push((key, entry));
    }

    Ok(Some(records))
}

fn corrupt(path: &Path, reason: &str) -> CaskadeError {
    CaskadeError::Corruption(format!("{}: {}", path.display(), reason))
}

// =============================================================================
// Tests
// =============================================================================
