//! Checkpoint Manager
//!
//! Persists a full KeyDir snapshot together with the newest segment id it
//! covers, so recovery only has to scan segments written afterwards.
//!
//! ## File Format (`index.chk`)
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ Header (18 bytes)                                            │
//! │   Magic "CKPT" (4) | Format: u16 (2) | SegmentId: u32 (4)    │
//! │   EntryCount: u64 (8)                                        │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Entries (repeated EntryCount times)                          │
//! │   [KeyLen: u32][Key][SegmentId: u32][ValueOffset: u64]       │
//! │   [ValueSize: u32][Flag: u8]                                 │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Footer: CRC32 of everything above (4)                        │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//! All integers big-endian. The file is written to `index.chk.tmp`, synced
//! and renamed over the previous checkpoint.

use std::fs::{self, OpenOptions};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use bytes::{Buf, BufMut};
use tracing::{info, warn};

use crate::error::{CaskadeError, Result};
use crate::keydir::IndexEntry;
use crate::record::RecordFlag;
use crate::segment;

/// Checkpoint file name inside the data directory
pub const CHECKPOINT_FILE: &str = "index.chk";

/// Temporary name used while a checkpoint is being written
const CHECKPOINT_TMP_FILE: &str = "index.chk.tmp";

/// Magic bytes identifying a checkpoint file
const MAGIC: &[u8; 4] = b"CKPT";

/// Current checkpoint format version
const FORMAT_VERSION: u16 = 1;

/// Header size: Magic (4) + Format (2) + SegmentId (4) + EntryCount (8)
const HEADER_SIZE: usize = 18;

/// Fixed bytes per entry besides the key: KeyLen (4) + SegmentId (4) + ValueOffset (8) + ValueSize (4) + Flag (1)
const ENTRY_FIXED_SIZE: usize = 21;

/// Footer size: CRC32 (4)
const FOOTER_SIZE: usize = 4;

/// A decoded checkpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    /// Newest segment id fully reflected in `entries`
    pub segment_id: u32,
    pub entries: Vec<(String, IndexEntry)>,
}

/// Reads and writes the checkpoint file of one data directory
pub struct CheckpointManager {
    dir: PathBuf,
}

impl CheckpointManager {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }

    /// Path of the checkpoint file
    pub fn path(&self) -> PathBuf {
        self.dir.join(CHECKPOINT_FILE)
    }

    /// Replace the checkpoint with a snapshot covering segments `..= segment_id`
    pub fn write(&self, segment_id: u32, entries: &[(String, IndexEntry)]) -> Result<()> {
        let tmp_path = self.dir.join(CHECKPOINT_TMP_FILE);
        let bytes = encode(segment_id, entries)?;

        {
            let file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp_path)?;
            let mut writer = BufWriter::new(file);
            writer.write_all(&bytes)?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }

        fs::rename(&tmp_path, self.path())?;
        segment::sync_dir(&self.dir)?;

        info!(
            segment = segment_id,
            entries = entries.len(),
            bytes = bytes.len(),
            "wrote checkpoint"
        );
        Ok(())
    }

    /// Load the checkpoint, if there is a usable one
    ///
    /// A missing file yields `None`. A damaged or unrecognised file is logged
    /// and also yields `None`, so recovery rescans every segment.
    pub fn load(&self) -> Result<Option<Checkpoint>> {
        let path = self.path();
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        match decode(&bytes) {
            Ok(checkpoint) => Ok(Some(checkpoint)),
            Err(CaskadeError::Corruption(reason)) => {
                warn!(path = %path.display(), %reason, "ignoring unusable checkpoint");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

/// Serialize a checkpoint
pub fn encode(segment_id: u32, entries: &[(String, IndexEntry)]) -> Result<Vec<u8>> {
    let body_len: usize = entries
        .iter()
        .map(|(key, _)| ENTRY_FIXED_SIZE + key.len())
        .sum();
    let mut buf = Vec::with_capacity(HEADER_SIZE + body_len + FOOTER_SIZE);

    buf.put_slice(MAGIC);
    buf.put_u16(FORMAT_VERSION);
    buf.put_u32(segment_id);
    buf.put_u64(entries.len() as u64);

    for (key, entry) in entries {
        if key.len() > u32::MAX as usize {
            return Err(CaskadeError::RecordTooLarge(key.len()));
        }
        buf.put_u32(key.len() as u32);
        buf.put_slice(key.as_bytes());
        buf.put_u32(entry.segment_id);
        buf.put_u64(entry.value_offset);
        buf.put_u32(entry.value_size);
        buf.put_u8(entry.flag.as_byte());
    }

    let crc = crc32fast::hash(&buf);
    buf.put_u32(crc);

    Ok(buf)
}

/// Parse a checkpoint, rejecting anything not produced by `encode`
pub fn decode(bytes: &[u8]) -> Result<Checkpoint> {
    if bytes.len() < HEADER_SIZE + FOOTER_SIZE {
        return Err(corrupt("file shorter than header"));
    }

    let (body, mut footer) = bytes.split_at(bytes.len() - FOOTER_SIZE);
    let expected_crc = footer.get_u32();
    if crc32fast::hash(body) != expected_crc {
        return Err(corrupt("checksum mismatch"));
    }

    let mut buf = body;
    if &buf[..MAGIC.len()] != MAGIC {
        return Err(corrupt("bad magic"));
    }
    buf.advance(MAGIC.len());

    let version = buf.get_u16();
    if version != FORMAT_VERSION {
        return Err(corrupt(&format!("unsupported format version {}", version)));
    }

    let segment_id = buf.get_u32();
    let count = buf.get_u64();

    let mut entries = Vec::new();
    for _ in 0..count {
        if buf.remaining() < 4 {
            return Err(corrupt("truncated entry"));
        }
        let key_len = buf.get_u32() as usize;
        if buf.remaining() < key_len + ENTRY_FIXED_SIZE - 4 {
            return Err(corrupt("truncated entry"));
        }

        let key = String::from_utf8(buf[..key_len].to_vec())
            .map_err(|_| corrupt("key is not UTF-8"))?;
        buf.advance(key_len);

        let entry_segment = buf.get_u32();
        let value_offset = buf.get_u64();
        let value_size = buf.get_u32();
        let flag_byte = buf.get_u8();

        let flag = RecordFlag::from_byte(flag_byte)
            .ok_or_else(|| corrupt(&format!("unknown flag {}", flag_byte)))?;
        if entry_segment > segment_id {
            return Err(corrupt(&format!(
                "entry for segment {} beyond covered segment {}",
                entry_segment, segment_id
            )));
        }
        let entry =
            IndexEntry::from_value_offset(entry_segment, value_offset, value_size, flag, key_len)
                .ok_or_else(|| corrupt("value offset precedes record header"))?;

        entries.push((key, entry));
    }

    if buf.has_remaining() {
        return Err(corrupt("trailing bytes after entries"));
    }

    Ok(Checkpoint {
        segment_id,
        entries,
    })
}

fn corrupt(reason: &str) -> CaskadeError {
    CaskadeError::Corruption(format!("checkpoint: {}", reason))
}

// =============================================================================
// Tests
// =============================================================================
