//! Configuration for Caskade
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;

use crate::error::{CaskadeError, Result};

/// Default rotation threshold for the active segment (64 MiB)
pub const DEFAULT_SEGMENT_SIZE_LIMIT: u64 = 64 * 1024 * 1024;

/// Upper bound on the default number of recovery workers
const MAX_DEFAULT_RECOVERY_WORKERS: usize = 8;

/// Main configuration for a Caskade instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for all data files
    /// Internal structure:
    ///   {data_dir}/
    ///     ├── segment<ID>.dat   (append-only data segments)
    ///     ├── segment<ID>.hint  (per-segment hint logs)
    ///     ├── index.chk         (KeyDir checkpoint)
    ///     └── LOCK              (single-writer lock file)
    pub data_dir: PathBuf,

    /// Open for writing (takes the directory lock) or read-only
    pub writable: bool,

    /// Size at which the active segment is sealed and a new one started
    pub segment_size_limit: u64,

    // -------------------------------------------------------------------------
    // Recovery Configuration
    // -------------------------------------------------------------------------
    /// Number of threads scanning segments in parallel at open
    pub recovery_workers: usize,

    /// Write a checkpoint during `close()`
    pub checkpoint_on_close: bool,
}

impl Default for Config {
    fn default() -> Self {
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
            .min(MAX_DEFAULT_RECOVERY_WORKERS);

        Self {
            data_dir: PathBuf::from("./caskade_data"),
            writable: true,
            segment_size_limit: DEFAULT_SEGMENT_SIZE_LIMIT,
            recovery_workers: workers,
            checkpoint_on_close: false,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.segment_size_limit == 0 {
            return Err(CaskadeError::Config(
                "segment_size_limit must be greater than zero".to_string(),
            ));
        }
        if self.recovery_workers == 0 {
            return Err(CaskadeError::Config(
                "recovery_workers must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Open for writing (default) or read-only
    pub fn writable(mut self, writable: bool) -> Self {
        self.config.writable = writable;
        self
    }

    /// Set the segment rotation threshold (in bytes)
    pub fn segment_size_limit(mut self, size: u64) -> Self {
        self.config.segment_size_limit = size;
        self
    }

    /// Set the number of recovery worker threads
    pub fn recovery_workers(mut self, count: usize) -> Self {
        self.config.recovery_workers = count;
        self
    }

    /// Checkpoint the index when the engine is closed
    pub fn checkpoint_on_close(mut self, enabled: bool) -> Self {
        self.config.checkpoint_on_close = enabled;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
