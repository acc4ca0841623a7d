//! Engine Module
//!
//! The embedded storage engine that coordinates all components.
//!
//! ## Responsibilities
//! - Open a data directory: lock it, recover the KeyDir, pick the active segment
//! - Serve get/put/delete against the KeyDir and the segment files
//! - Run merge and checkpoint on request
//! - Release everything on close
//!
//! ## Concurrency Model: Single-Writer / Multiple-Reader
//!
//! - **Writes** (put/delete/merge/checkpoint): serialized by the mutex around
//!   the `SegmentManager`. The KeyDir is updated while that mutex is held, so
//!   index order always matches log order.
//! - **Reads** (get): no engine lock. A KeyDir lookup takes one shard read
//!   lock; the value is then read through a file handle opened for that read.

use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::path::Path;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::checkpoint::CheckpointManager;
use crate::config::Config;
use crate::error::{CaskadeError, Result};
use crate::keydir::{IndexEntry, KeyDir};
use crate::lock::ProcessLock;
use crate::merge::{MergeStats, Merger};
use crate::record::RecordFlag;
use crate::recovery::{self, RecoveryOptions};
use crate::segment::{self, SegmentManager};

/// Point-in-time summary of an engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineStats {
    /// Segment receiving writes (`None` when read-only)
    pub active_segment_id: Option<u32>,

    /// Data segments on disk, ascending
    pub segment_ids: Vec<u32>,

    /// Keys whose newest record is a PUT
    pub live_keys: usize,

    /// Keys whose newest record is a tombstone
    pub tombstones: usize,
}

/// The main storage engine
pub struct Engine {
    /// Engine configuration
    config: Config,

    /// Key → newest record location
    keydir: KeyDir,

    /// Active segment behind the single write mutex; `None` when read-only
    segments: Option<Mutex<SegmentManager>>,

    /// Checkpoint file of the data directory
    checkpoints: CheckpointManager,

    /// Directory lock, released last
    _lock: Option<ProcessLock>,
}

impl Engine {
    /// Open or create an engine with the given config
    ///
    /// On startup:
    /// 1. Take the directory lock (writable only)
    /// 2. Recover the KeyDir from checkpoint, hints and segments
    /// 3. Open the active segment, cutting off any torn tail (writable only)
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;
        let started = Instant::now();
        let dir = config.data_dir.clone();

        let lock = if config.writable {
            std::fs::create_dir_all(&dir)?;
            Some(ProcessLock::acquire(&dir)?)
        } else {
            None
        };

        let keydir = KeyDir::new();
        let options = RecoveryOptions {
            workers: config.recovery_workers,
            repair_hints: config.writable,
        };
        let report = recovery::recover(&dir, &keydir, &options)?;

        let segments = if config.writable {
            let (active_id, valid_len) = report.active_segment();
            let manager =
                SegmentManager::open(&dir, active_id, valid_len, config.segment_size_limit)?;
            Some(Mutex::new(manager))
        } else {
            None
        };

        info!(
            dir = %dir.display(),
            writable = config.writable,
            active_segment = segments.as_ref().map(|m| m.lock().active_id()),
            keys = keydir.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "engine opened"
        );

        Ok(Self {
            checkpoints: CheckpointManager::new(&dir),
            config,
            keydir,
            segments,
            _lock: lock,
        })
    }

    /// Open with a path (convenience method)
    ///
    /// Uses default config with the specified data directory
    pub fn open_dir(path: impl AsRef<Path>, writable: bool) -> Result<Self> {
        let config = Config::builder()
            .data_dir(path.as_ref())
            .writable(writable)
            .build();
        Self::open(config)
    }

    fn writer(&self) -> Result<&Mutex<SegmentManager>> {
        self.segments.as_ref().ok_or(CaskadeError::ReadOnly)
    }

    /// Get the value of `key`
    ///
    /// Returns `None` for keys never written or whose newest record is a
    /// tombstone.
    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        loop {
            let entry = match self.keydir.get(key) {
                Some(entry) if !entry.is_tombstone() => entry,
                _ => return Ok(None),
            };

            match segment::read_at(
                &self.config.data_dir,
                entry.segment_id,
                entry.value_offset,
                entry.value_size,
            ) {
                // A merge retired the segment between lookup and read
                Err(CaskadeError::Io(e))
                    if e.kind() == ErrorKind::NotFound && self.keydir.get(key) != Some(entry) =>
                {
                    debug!(key, segment = entry.segment_id, "segment retired during read, retrying");
                }
                other => return other.map(Some),
            }
        }
    }

    /// Durably store `value` under `key`
    pub fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        let mut segments = self.writer()?.lock();
        let entry = segments.append(key, value, RecordFlag::Put)?;
        self.keydir.put(key.to_string(), entry);
        Ok(())
    }

    /// Durably delete `key`
    ///
    /// Deleting a key with no live value (never written, or already deleted)
    /// writes nothing: no tombstone is appended, so the log only records
    /// deletes that change what a reader sees.
    pub fn delete(&self, key: &str) -> Result<()> {
        let mut segments = self.writer()?.lock();
        match self.keydir.get(key) {
            Some(entry) if !entry.is_tombstone() => {}
            _ => return Ok(()),
        }
        let entry = segments.append(key, &[], RecordFlag::Tombstone)?;
        self.keydir.put(key.to_string(), entry);
        Ok(())
    }

    /// Keys that currently have a live value, sorted
    pub fn list_keys(&self) -> BTreeSet<String> {
        self.keydir.live_keys()
    }

    /// Compact every sealed segment into one
    ///
    /// Returns `None` when there was nothing to merge.
    pub fn merge(&self) -> Result<Option<MergeStats>> {
        let mut segments = self.writer()?.lock();
        let dir = self.config.data_dir.as_path();

        let active = segments.active_id();
        let has_sealed = segment::list_segments(dir)?.iter().any(|&id| id != active);
        if !has_sealed && segments.active_len() == 0 {
            debug!("nothing to merge");
            return Ok(None);
        }

        // The merged segment sits between the sealed ones and the new active one
        let merged_id = active + 1;
        segments.rotate_to(merged_id + 1)?;

        let sealed: Vec<u32> = segment::list_segments(dir)?
            .into_iter()
            .filter(|&id| id < merged_id)
            .collect();

        let stats = Merger::new(dir, &self.keydir, &self.checkpoints).run(&sealed, merged_id)?;
        Ok(Some(stats))
    }

    /// Persist the KeyDir so the next open skips already covered segments
    ///
    /// Seals a non-empty active segment first; the checkpoint covers every
    /// segment older than the (new) active one.
    pub fn checkpoint(&self) -> Result<()> {
        let mut segments = self.writer()?.lock();

        let covered = if segments.active_len() > 0 {
            segments.rotate()?
        } else {
            segments.active_id() - 1
        };

        self.checkpoints.write(covered, &self.keydir.snapshot())
    }

    /// Close the engine gracefully
    ///
    /// Optionally checkpoints, then syncs the active segment. The directory
    /// lock is released when `self` is dropped.
    pub fn close(self) -> Result<()> {
        if self.segments.is_some() {
            if self.config.checkpoint_on_close {
                self.checkpoint()?;
            }
            self.writer()?.lock().sync()?;
        }
        info!(dir = %self.config.data_dir.display(), "engine closed");
        Ok(())
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    /// Get the data directory path
    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Whether mutations are allowed
    pub fn is_writable(&self) -> bool {
        self.segments.is_some()
    }

    /// Id of the segment receiving writes
    pub fn active_segment_id(&self) -> Option<u32> {
        self.segments.as_ref().map(|m| m.lock().active_id())
    }

    /// Copy of the KeyDir, sorted by key
    pub fn index_snapshot(&self) -> Vec<(String, IndexEntry)> {
        let mut entries = self.keydir.snapshot();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    /// Summary of segments and keys
    pub fn stats(&self) -> Result<EngineStats> {
        let entries = self.keydir.snapshot();
        let tombstones = entries.iter().filter(|(_, e)| e.is_tombstone()).count();

        Ok(EngineStats {
            active_segment_id: self.active_segment_id(),
            segment_ids: segment::list_segments(&self.config.data_dir)?,
            live_keys: entries.len() - tombstones,
            tombstones,
        })
    }
}
