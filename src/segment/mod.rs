//! Segment Module
//!
//! Append-only data segments and the manager owning the active one.
//!
//! ## Responsibilities
//! - Name and discover segment files (`segment<ID>.dat`, `segment<ID>.hint`)
//! - Append records to the active segment with fsync before returning
//! - Rotate the active segment once it reaches the size limit
//! - Random reads of value bytes from any segment
//! - Sequential scanning of raw segments for recovery and merge
//!
//! ## Lifecycle
//! ```text
//!   create ──► active (append-only) ──► sealed (immutable) ──► retired by merge
//! ```
//! Segment ids start at 1, grow monotonically and are never reused.

mod manager;
mod scanner;
mod writer;

use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::error::Result;

pub use manager::SegmentManager;
pub use scanner::{ScannedRecord, SegmentScanner};
pub use writer::SegmentWriter;

/// File name prefix shared by data and hint files
const SEGMENT_PREFIX: &str = "segment";

/// Extension of data segment files
const DATA_EXTENSION: &str = "dat";

/// Extension of hint files
const HINT_EXTENSION: &str = "hint";

/// Path of the data file for segment `id`
pub fn data_path(dir: &Path, id: u32) -> PathBuf {
    dir.join(format!("{}{}.{}", SEGMENT_PREFIX, id, DATA_EXTENSION))
}

/// Path of the hint file for segment `id`
pub fn hint_path(dir: &Path, id: u32) -> PathBuf {
    dir.join(format!("{}{}.{}", SEGMENT_PREFIX, id, HINT_EXTENSION))
}

/// Parse a segment id from a data file name
/// "segment42.dat" → Some(42)
pub fn parse_segment_id(path: &Path) -> Option<u32> {
    if path.extension()?.to_str()? != DATA_EXTENSION {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    let digits = stem.strip_prefix(SEGMENT_PREFIX)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    match digits.parse::<u32>() {
        Ok(0) | Err(_) => None,
        Ok(id) => Some(id),
    }
}

/// Ids of all data segments in `dir`, ascending
pub fn list_segments(dir: &Path) -> Result<Vec<u32>> {
    let mut ids = Vec::new();

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if !entry.file_type()?.is_file() {
            continue;
        }
        if let Some(id) = parse_segment_id(&path) {
            ids.push(id);
        }
    }

    ids.sort_unstable();
    Ok(ids)
}

/// Read `len` bytes at `offset` from segment `id`
///
/// The file is opened for this call only and closed on return.
pub fn read_at(dir: &Path, id: u32, offset: u64, len: u32) -> Result<Vec<u8>> {
    let mut file = File::open(data_path(dir, id))?;
    file.seek(SeekFrom::Start(offset))?;

    let mut buf = vec![0u8; len as usize];
    file.read_exact(&mut buf)?;
    Ok(buf)
}

/// Delete the data and hint files of segment `id`
pub fn remove_segment(dir: &Path, id: u32) -> Result<()> {
    fs::remove_file(data_path(dir, id))?;
    match fs::remove_file(hint_path(dir, id)) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// fsync a directory so renames and creations inside it are durable
pub(crate) fn sync_dir(dir: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        File::open(dir)?.sync_all()?;
    }
    #[cfg(not(unix))]
    {
        let _ = dir;
    }
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
