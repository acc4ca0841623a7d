//! Record Module
//!
//! The on-disk log entry stored in data segments.
//!
//! ## Record Format
//! ```text
//! ┌────────────┬──────────────┬──────────┬───────────┬─────────────┐
//! │ KeyLen (4) │ ValueLen (4) │ Flag (1) │    Key    │    Value    │
//! └────────────┴──────────────┴──────────┴───────────┴─────────────┘
//! ```
//!
//! - Integers are big-endian.
//! - Flag: 0 = PUT, 1 = TOMBSTONE.
//! - Key is UTF-8; value bytes are present only for a PUT with ValueLen > 0.

mod codec;

pub use codec::{decode, encode, RecordHeader};

/// Header size: KeyLen (4) + ValueLen (4) + Flag (1) = 9 bytes
pub const HEADER_SIZE: u64 = 9;

/// Kind of a log record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RecordFlag {
    /// A live value
    Put = 0,

    /// A deletion marker
    Tombstone = 1,
}

impl RecordFlag {
    /// Parse a flag byte, `None` for anything unknown
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(RecordFlag::Put),
            1 => Some(RecordFlag::Tombstone),
            _ => None,
        }
    }

    pub fn as_byte(self) -> u8 {
        self as u8
    }

    pub fn is_tombstone(self) -> bool {
        self == RecordFlag::Tombstone
    }
}

/// A decoded log record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub key: String,
    pub value: Vec<u8>,
    pub flag: RecordFlag,
}

impl Record {
    /// A record storing `value` under `key`
    pub fn put(key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            flag: RecordFlag::Put,
        }
    }

    /// A tombstone for `key`
    pub fn tombstone(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: Vec::new(),
            flag: RecordFlag::Tombstone,
        }
    }

    /// Total encoded size in bytes
    pub fn encoded_len(&self) -> u64 {
        HEADER_SIZE + self.key.len() as u64 + self.value.len() as u64
    }
}
