//! # Caskade
//!
//! An embedded, log-structured key-value storage engine with:
//! - Append-only data segments, every write durable before it returns
//! - An in-memory KeyDir mapping each key to its newest record
//! - Per-segment hint files and a checksummed KeyDir checkpoint for fast restart
//! - Parallel crash recovery that tolerates torn segment tails
//! - Merge (compaction) of sealed segments
//! - Single-writer/multi-reader concurrency, one writer process per directory
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Engine                              │
//! │            (Single Writer / Multi Reader)                     │
//! └──────┬──────────────────────┬─────────────────────┬──────────┘
//!        │ put / delete         │ get                 │ open
//!        ▼                      ▼                     ▼
//!  ┌────────────┐        ┌─────────────┐       ┌─────────────┐
//!  │  Segment   │        │   KeyDir    │◀──────│  Recovery   │
//!  │  Manager   │───────▶│  (sharded)  │       │ (parallel)  │
//!  └─────┬──────┘        └──────┬──────┘       └──────┬──────┘
//!        │                      │ merge / checkpoint  │
//!        ▼                      ▼                     ▼
//!  ┌────────────┐        ┌─────────────┐       ┌─────────────┐
//!  │  segment   │        │   Merger    │       │ Checkpoint  │
//!  │ .dat/.hint │        │             │       │  index.chk  │
//!  └────────────┘        └─────────────┘       └─────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod record;
pub mod keydir;
pub mod hint;
pub mod segment;
pub mod checkpoint;
pub mod recovery;
pub mod merge;
pub mod lock;
pub mod engine;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use config::Config;
pub use engine::{Engine, EngineStats};
pub use error::{CaskadeError, Result};
pub use keydir::IndexEntry;
pub use merge::MergeStats;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of Caskade
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
