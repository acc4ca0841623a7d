//! Error types for Caskade
//!
//! Provides a unified error type for all operations.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using CaskadeError
pub type Result<T> = std::result::Result<T, CaskadeError>;

/// Unified error type for Caskade operations
#[derive(Debug, Error)]
pub enum CaskadeError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Open / Access Errors
    // -------------------------------------------------------------------------
    #[error("Data directory {0} is locked by another writer")]
    AlreadyLocked(PathBuf),

    #[error("Engine was opened read-only")]
    ReadOnly,

    // -------------------------------------------------------------------------
    // Record Decoding Errors
    // -------------------------------------------------------------------------
    /// Fewer bytes remain than the record header declares.
    #[error("Truncated record: needed {needed} bytes, {available} available")]
    TruncatedRecord { needed: u64, available: u64 },

    /// A length field that cannot belong to a valid record.
    #[error("Invalid record length: key_len={key_len}, value_len={value_len}")]
    InvalidLength { key_len: i32, value_len: i32 },

    #[error("Record key is not valid UTF-8")]
    InvalidKey,

    #[error("Unknown record flag: {0}")]
    InvalidFlag(u8),

    #[error("Record too large: {0} bytes")]
    RecordTooLarge(usize),

    // -------------------------------------------------------------------------
    // Structural Errors
    // -------------------------------------------------------------------------
    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Recovery failed: {0}")]
    Recovery(String),

    /// A failed append could not be undone; the segment takes no more writes.
    #[error("Segment {0} is unwritable after a failed append")]
    SegmentPoisoned(u32),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl CaskadeError {
    /// True for decode failures that mark the end of the valid portion of a
    /// log rather than a failure the caller should see.
    pub fn is_end_of_log(&self) -> bool {
        matches!(
            self,
            CaskadeError::TruncatedRecord { .. }
                | CaskadeError::InvalidLength { .. }
                | CaskadeError::InvalidKey
                | CaskadeError::InvalidFlag(_)
        )
    }
}
