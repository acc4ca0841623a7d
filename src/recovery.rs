//! Recovery Engine
//!
//! Rebuilds the KeyDir when an engine is opened.
//!
//! ## Steps
//! 1. Load the checkpoint (if any) into the KeyDir; remember its segment id `C`
//! 2. List all data segments, ascending
//! 3. Scan every segment with id `> C`, in parallel, each into a private map:
//!    - hint file present and covering the whole segment → read hints
//!    - otherwise → walk the raw records until the first torn record
//! 4. Merge every private map into the KeyDir, keeping the higher version
//!
//! A failure scanning any segment fails the whole recovery.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use crossbeam::channel;
use tracing::{debug, info, warn};

use crate::checkpoint::CheckpointManager;
use crate::error::{CaskadeError, Result};
use crate::hint;
use crate::keydir::{IndexEntry, KeyDir};
use crate::segment::{self, SegmentScanner};

/// Knobs for a recovery run
#[derive(Debug, Clone)]
pub struct RecoveryOptions {
    /// Maximum number of segments scanned concurrently
    pub workers: usize,

    /// Rewrite hint files for segments that had to be scanned raw
    pub repair_hints: bool,
}

/// Where a segment's entries were read from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanSource {
    /// The segment's hint file
    Hint,

    /// A full walk of the data file
    Raw,
}

/// Result of scanning one segment
#[derive(Debug)]
pub struct SegmentScan {
    pub segment_id: u32,
    pub source: ScanSource,
    /// Data file length
    pub file_len: u64,
    /// End of the last valid record
    pub valid_len: u64,
    /// Newest entry per key within this segment
    pub entries: HashMap<String, IndexEntry>,
}

impl SegmentScan {
    /// True if bytes past the last valid record were found
    pub fn is_torn(&self) -> bool {
        self.valid_len < self.file_len
    }
}

/// Summary of a recovery run
#[derive(Debug, Default)]
pub struct RecoveryReport {
    /// Segment id covered by the loaded checkpoint (0 without one)
    pub checkpoint_segment: u32,

    /// Entries loaded from the checkpoint
    pub checkpoint_entries: usize,

    /// Every data segment found, ascending
    pub segments: Vec<u32>,

    /// Segments recovered from hint files
    pub from_hints: usize,

    /// Segments recovered by raw scans
    pub from_raw: usize,

    /// KeyDir updates applied from scanned segments
    pub keys_updated: usize,

    /// Newest segment and its valid length, if it was scanned
    pub newest_scanned: Option<(u32, u64)>,
}

impl RecoveryReport {
    /// Segment to append to next, with its clean length when known
    ///
    /// Writes never go to a segment the checkpoint claims to cover.
    pub fn active_segment(&self) -> (u32, Option<u64>) {
        match self.newest_scanned {
            Some((id, valid_len)) => (id, Some(valid_len)),
            None => (self.checkpoint_segment + 1, None),
        }
    }
}

/// Run recovery for `dir` into `keydir`
pub fn recover(dir: &Path, keydir: &KeyDir, options: &RecoveryOptions) -> Result<RecoveryReport> {
    let started = Instant::now();
    let mut report = RecoveryReport::default();

    if let Some(checkpoint) = CheckpointManager::new(dir).load()? {
        report.checkpoint_segment = checkpoint.segment_id;
        report.checkpoint_entries = checkpoint.entries.len();
        for (key, entry) in checkpoint.entries {
            keydir.put(key, entry);
        }
        debug!(
            segment = report.checkpoint_segment,
            entries = report.checkpoint_entries,
            "loaded checkpoint"
        );
    }

    report.segments = segment::list_segments(dir)?;
    let pending: Vec<u32> = report
        .segments
        .iter()
        .copied()
        .filter(|&id| id > report.checkpoint_segment)
        .collect();

    let scans = scan_segments(dir, &pending, options.workers, options.repair_hints)?;

    let newest = report.segments.last().copied();
    for scan in &scans {
        match scan.source {
            ScanSource::Hint => report.from_hints += 1,
            ScanSource::Raw => report.from_raw += 1,
        }
        if Some(scan.segment_id) == newest {
            report.newest_scanned = Some((scan.segment_id, scan.valid_len));
            // The active segment is cut back to `valid_len` right after
            // recovery, so its hint may end there too
            if options.repair_hints && scan.is_torn() {
                write_hint(dir, scan)?;
            }
        }
    }

    report.keys_updated = apply(keydir, scans);

    info!(
        checkpoint_segment = report.checkpoint_segment,
        segments = report.segments.len(),
        scanned = pending.len(),
        from_hints = report.from_hints,
        from_raw = report.from_raw,
        keys = keydir.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "recovery complete"
    );

    Ok(report)
}

/// Merge scan results into the KeyDir, one key at a time
///
/// The outcome does not depend on the order of `scans`.
pub fn apply(keydir: &KeyDir, scans: Vec<SegmentScan>) -> usize {
    let mut updated = 0;
    for scan in scans {
        for (key, entry) in scan.entries {
            if keydir.put_if_newer(key, entry) {
                updated += 1;
            }
        }
    }
    updated
}

/// Scan `ids` using at most `workers` threads
///
/// Each worker pulls segment ids from a shared queue and produces an owned
/// `SegmentScan`; nothing is shared between workers besides the queues.
pub fn scan_segments(
    dir: &Path,
    ids: &[u32],
    workers: usize,
    repair_hints: bool,
) -> Result<Vec<SegmentScan>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let workers = workers.clamp(1, ids.len());

    let (task_tx, task_rx) = channel::unbounded::<u32>();
    let (result_tx, result_rx) = channel::unbounded::<Result<SegmentScan>>();
    for &id in ids {
        task_tx
            .send(id)
            .map_err(|_| CaskadeError::Recovery("task queue closed".to_string()))?;
    }
    drop(task_tx);

    let abort = AtomicBool::new(false);

    let spawned = crossbeam::thread::scope(|scope| -> std::io::Result<()> {
        for worker in 0..workers {
            let task_rx = task_rx.clone();
            let result_tx = result_tx.clone();
            let abort = &abort;

            scope
                .builder()
                .name(format!("caskade-recovery-{}", worker))
                .spawn(move |_| {
                    while let Ok(id) = task_rx.recv() {
                        if abort.load(Ordering::Relaxed) {
                            break;
                        }
                        let result = scan_segment(dir, id, repair_hints);
                        if result.is_err() {
                            abort.store(true, Ordering::Relaxed);
                        }
                        if result_tx.send(result).is_err() {
                            break;
                        }
                    }
                })?;
        }
        Ok(())
    });
    drop(result_tx);

    match spawned {
        Err(_) => return Err(CaskadeError::Recovery("scan worker panicked".to_string())),
        Ok(Err(e)) => return Err(e.into()),
        Ok(Ok(())) => {}
    }

    let mut scans = Vec::with_capacity(ids.len());
    for result in result_rx.iter() {
        scans.push(result?);
    }

    if scans.len() != ids.len() {
        return Err(CaskadeError::Recovery(format!(
            "scanned {} of {} segments",
            scans.len(),
            ids.len()
        )));
    }

    Ok(scans)
}

/// Scan one segment, preferring its hint file
pub fn scan_segment(dir: &Path, id: u32, repair_hint: bool) -> Result<SegmentScan> {
    let data_len = fs::metadata(segment::data_path(dir, id))?.len();
    let hint_path = segment::hint_path(dir, id);

    match hint::read_hints(&hint_path, id) {
        Ok(Some(records)) if hint::covers_segment(&records, data_len) => {
            let mut entries = HashMap::with_capacity(records.len());
            for (key, entry) in records {
                entries.insert(key, entry);
            }
            debug!(segment = id, keys = entries.len(), "recovered segment from hints");
            return Ok(SegmentScan {
                segment_id: id,
                source: ScanSource::Hint,
                file_len: data_len,
                valid_len: data_len,
                entries,
            });
        }
        Ok(Some(_)) => {
            warn!(segment = id, "hint file does not cover segment, scanning raw")
        }
        Ok(None) => debug!(segment = id, "no hint file, scanning raw"),
        Err(CaskadeError::Corruption(reason)) => {
            warn!(segment = id, %reason, "damaged hint file, scanning raw")
        }
        Err(e) => return Err(e),
    }

    let mut scanner = SegmentScanner::open(dir, id, false)?;
    let mut entries = HashMap::new();
    for record in scanner.by_ref() {
        let record = record?;
        entries.insert(record.key, record.entry);
    }

    let scan = SegmentScan {
        segment_id: id,
        source: ScanSource::Raw,
        file_len: scanner.file_len(),
        valid_len: scanner.valid_len(),
        entries,
    };

    debug!(
        segment = id,
        keys = scan.entries.len(),
        valid_len = scan.valid_len,
        "recovered segment from raw scan"
    );

    // A hint ending before a torn tail would never cover the segment
    if repair_hint && !scan.is_torn() {
        write_hint(dir, &scan)?;
    }

    Ok(scan)
}

/// Rewrite the hint file of a raw-scanned segment from its entries
fn write_hint(dir: &Path, scan: &SegmentScan) -> Result<()> {
    let mut records: Vec<(String, IndexEntry)> = scan
        .entries
        .iter()
        .map(|(k, e)| (k.clone(), *e))
        .collect();
    records.sort_by_key(|(_, e)| e.record_start);
    hint::write_hints(&segment::hint_path(dir, scan.segment_id), &records)?;
    debug!(segment = scan.segment_id, records = records.len(), "rewrote hint file");
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
