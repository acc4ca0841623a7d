//! Tests for crash recovery
//!
//! These tests verify:
//! - Reopening reproduces the exact KeyDir (recovery equivalence)
//! - Hint files and raw scans recover the same state
//! - Damaged or incomplete hints fall back to raw scans and get repaired
//! - Torn segment tails are ignored, then truncated by a writable open
//! - Parallel recovery is deterministic

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use caskade::keydir::KeyDir;
use caskade::recovery::{self, RecoveryOptions, ScanSource};
use caskade::segment;
use caskade::{Config, Engine, IndexEntry};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn open_with(dir: &Path, writable: bool, workers: usize) -> Engine {
    let config = Config::builder()
        .data_dir(dir)
        .writable(writable)
        .segment_size_limit(256)
        .recovery_workers(workers)
        .build();
    Engine::open(config).unwrap()
}

/// Mixed workload spread over many small segments
fn write_workload(engine: &Engine) {
    for round in 0..5 {
        for i in 0..40 {
            let key = format!("key{:03}", i);
            if (i + round) % 7 == 0 {
                engine.delete(&key).unwrap();
            } else {
                let value = format!("value-{}-{}", round, i);
                engine.put(&key, value.as_bytes()).unwrap();
            }
        }
    }
}

fn remove_hints(dir: &Path) {
    for id in segment::list_segments(dir).unwrap() {
        let _ = fs::remove_file(segment::hint_path(dir, id));
    }
}

fn append_garbage(path: &Path, bytes: &[u8]) {
    let mut file = OpenOptions::new().append(true).open(path).unwrap();
    file.write_all(bytes).unwrap();
}

fn snapshot(dir: &Path, workers: usize) -> Vec<(String, IndexEntry)> {
    open_with(dir, false, workers).index_snapshot()
}

// =============================================================================
// Recovery Equivalence Tests
// =============================================================================

#[test]
fn test_recovery_reproduces_index() {
    let temp = TempDir::new().unwrap();

    let before = {
        let engine = open_with(temp.path(), true, 4);
        write_workload(&engine);
        engine.index_snapshot()
    };

    let engine = open_with(temp.path(), true, 4);
    assert_eq!(engine.index_snapshot(), before);

    for i in 0..40 {
        let key = format!("key{:03}", i);
        if (i + 4) % 7 == 0 {
            assert_eq!(engine.get(&key).unwrap(), None, "{} should be deleted", key);
        } else {
            assert_eq!(
                engine.get(&key).unwrap(),
                Some(format!("value-4-{}", i).into_bytes())
            );
        }
    }
}

#[test]
fn test_recovery_survives_repeated_reopen() {
    let temp = TempDir::new().unwrap();

    {
        let engine = open_with(temp.path(), true, 2);
        engine.put("key", b"value").unwrap();
    }
    {
        let engine = open_with(temp.path(), true, 2);
        assert_eq!(engine.get("key").unwrap(), Some(b"value".to_vec()));
        engine.put("other", b"x").unwrap();
    }

    let engine = open_with(temp.path(), true, 2);
    assert_eq!(engine.get("key").unwrap(), Some(b"value".to_vec()));
    assert_eq!(engine.get("other").unwrap(), Some(b"x".to_vec()));
}

// =============================================================================
// Hint Tests
// =============================================================================

#[test]
fn test_hint_and_raw_scan_agree() {
    let temp = TempDir::new().unwrap();
    write_workload(&open_with(temp.path(), true, 4));

    let from_hints = snapshot(temp.path(), 4);
    remove_hints(temp.path());
    let from_raw = snapshot(temp.path(), 4);

    assert_eq!(from_hints, from_raw);
}

#[test]
fn test_read_only_open_does_not_repair_hints() {
    let temp = TempDir::new().unwrap();
    write_workload(&open_with(temp.path(), true, 4));
    remove_hints(temp.path());

    let _reader = open_with(temp.path(), false, 4);

    for id in segment::list_segments(temp.path()).unwrap() {
        assert!(!segment::hint_path(temp.path(), id).exists());
    }
}

#[test]
fn test_writable_open_repairs_missing_hints() {
    let temp = TempDir::new().unwrap();
    write_workload(&open_with(temp.path(), true, 4));
    let expected = snapshot(temp.path(), 4);
    remove_hints(temp.path());

    drop(open_with(temp.path(), true, 4));

    let segments = segment::list_segments(temp.path()).unwrap();
    for &id in &segments {
        assert!(segment::hint_path(temp.path(), id).exists());
        let scan = recovery::scan_segment(temp.path(), id, false).unwrap();
        assert_eq!(scan.source, ScanSource::Hint, "segment {}", id);
    }
    assert_eq!(snapshot(temp.path(), 4), expected);
}

#[test]
fn test_incomplete_hint_falls_back_to_raw_scan() {
    let temp = TempDir::new().unwrap();
    {
        let engine = open_with(temp.path(), true, 1);
        engine.put("a", b"1").unwrap();
        engine.put("b", b"2").unwrap();
    }

    // Drop the last hint record, as if the process died before writing it
    let hint = segment::hint_path(temp.path(), 1);
    let bytes = fs::read(&hint).unwrap();
    fs::write(&hint, &bytes[..bytes.len() / 2]).unwrap();

    let scan = recovery::scan_segment(temp.path(), 1, false).unwrap();
    assert_eq!(scan.source, ScanSource::Raw);
    assert_eq!(scan.entries.len(), 2);

    let engine = open_with(temp.path(), false, 1);
    assert_eq!(engine.get("b").unwrap(), Some(b"2".to_vec()));
}

#[test]
fn test_hint_for_wrong_segment_falls_back_to_raw_scan() {
    let temp = TempDir::new().unwrap();
    {
        let config = Config::builder()
            .data_dir(temp.path())
            .segment_size_limit(1)
            .build();
        let engine = Engine::open(config).unwrap();
        engine.put("a", b"1").unwrap();
        engine.put("b", b"2").unwrap();
    }

    // segment1 now carries segment2's hints
    fs::copy(
        segment::hint_path(temp.path(), 2),
        segment::hint_path(temp.path(), 1),
    )
    .unwrap();

    let scan = recovery::scan_segment(temp.path(), 1, false).unwrap();
    assert_eq!(scan.source, ScanSource::Raw);
    assert!(scan.entries.contains_key("a"));
}

// =============================================================================
// Torn Tail Tests
// =============================================================================

#[test]
fn test_torn_tail_is_ignored_and_truncated() {
    let temp = TempDir::new().unwrap();
    {
        let engine = open_with(temp.path(), true, 1);
        engine.put("a", b"1").unwrap();
        engine.put("b", b"2").unwrap();
    }
    let data = segment::data_path(temp.path(), 1);
    let clean_len = fs::metadata(&data).unwrap().len();

    // Header promising more payload than the file holds
    append_garbage(&data, &[0, 0, 0, 3, 0, 0, 0, 50, 0, b'x']);

    {
        let reader = open_with(temp.path(), false, 1);
        assert_eq!(reader.get("b").unwrap(), Some(b"2".to_vec()));
        assert_eq!(fs::metadata(&data).unwrap().len(), clean_len + 10);
    }

    {
        let engine = open_with(temp.path(), true, 1);
        assert_eq!(fs::metadata(&data).unwrap().len(), clean_len);
        assert_eq!(engine.get("a").unwrap(), Some(b"1".to_vec()));
        engine.put("c", b"3").unwrap();
    }

    let engine = open_with(temp.path(), true, 1);
    assert_eq!(engine.get("a").unwrap(), Some(b"1".to_vec()));
    assert_eq!(engine.get("b").unwrap(), Some(b"2".to_vec()));
    assert_eq!(engine.get("c").unwrap(), Some(b"3".to_vec()));
}

#[test]
fn test_short_header_tail_is_ignored() {
    let temp = TempDir::new().unwrap();
    {
        let engine = open_with(temp.path(), true, 1);
        engine.put("a", b"1").unwrap();
    }
    append_garbage(&segment::data_path(temp.path(), 1), &[0, 0]);

    let engine = open_with(temp.path(), true, 1);
    assert_eq!(engine.get("a").unwrap(), Some(b"1".to_vec()));
    assert_eq!(engine.list_keys().len(), 1);
}

#[test]
fn test_torn_active_segment_gets_matching_hint() {
    let temp = TempDir::new().unwrap();
    {
        let engine = open_with(temp.path(), true, 1);
        engine.put("a", b"1").unwrap();
        engine.put("b", b"2").unwrap();
    }
    fs::remove_file(segment::hint_path(temp.path(), 1)).unwrap();
    append_garbage(&segment::data_path(temp.path(), 1), &[0, 0, 0]);

    drop(open_with(temp.path(), true, 1));

    let scan = recovery::scan_segment(temp.path(), 1, false).unwrap();
    assert_eq!(scan.source, ScanSource::Hint);
    assert_eq!(scan.entries.len(), 2);
}

#[test]
fn test_torn_sealed_segment_hint_is_not_rewritten() {
    let temp = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp.path())
        .segment_size_limit(1)
        .build();
    {
        let engine = Engine::open(config.clone()).unwrap();
        engine.put("a", b"1").unwrap();
        engine.put("b", b"2").unwrap();
        assert_eq!(engine.active_segment_id(), Some(2));
    }
    let data = segment::data_path(temp.path(), 1);
    let hint = segment::hint_path(temp.path(), 1);
    fs::remove_file(&hint).unwrap();
    append_garbage(&data, &[0, 0, 0]);
    let torn_len = fs::metadata(&data).unwrap().len();

    for _ in 0..2 {
        let engine = Engine::open(config.clone()).unwrap();
        assert_eq!(engine.get("a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(engine.get("b").unwrap(), Some(b"2".to_vec()));
    }

    // Sealed segments are never truncated, so no hint could ever cover this one
    assert!(!hint.exists());
    assert_eq!(fs::metadata(&data).unwrap().len(), torn_len);
    let scan = recovery::scan_segment(temp.path(), 1, false).unwrap();
    assert_eq!(scan.source, ScanSource::Raw);
    assert!(scan.is_torn());
}

// =============================================================================
// Parallel Recovery Tests
// =============================================================================

#[test]
fn test_parallel_recovery_matches_sequential() {
    let temp = TempDir::new().unwrap();
    write_workload(&open_with(temp.path(), true, 8));
    assert!(segment::list_segments(temp.path()).unwrap().len() > 8);

    let sequential = snapshot(temp.path(), 1);
    for _ in 0..5 {
        assert_eq!(snapshot(temp.path(), 8), sequential);
    }

    remove_hints(temp.path());
    assert_eq!(snapshot(temp.path(), 8), sequential);
}

#[test]
fn test_recover_reports_sources() {
    let temp = TempDir::new().unwrap();
    write_workload(&open_with(temp.path(), true, 4));
    let segments = segment::list_segments(temp.path()).unwrap();
    fs::remove_file(segment::hint_path(temp.path(), segments[0])).unwrap();

    let keydir = KeyDir::new();
    let options = RecoveryOptions {
        workers: 3,
        repair_hints: false,
    };
    let report = recovery::recover(temp.path(), &keydir, &options).unwrap();

    assert_eq!(report.checkpoint_segment, 0);
    assert_eq!(report.segments, segments);
    assert_eq!(report.from_raw, 1);
    assert_eq!(report.from_hints, segments.len() - 1);
    assert_eq!(report.active_segment().0, *segments.last().unwrap());
}

#[test]
fn test_scan_fails_on_missing_segment() {
    let temp = TempDir::new().unwrap();
    write_workload(&open_with(temp.path(), true, 4));

    let ids = vec![1, 2, 999];
    let result = recovery::scan_segments(temp.path(), &ids, 2, false);

    assert!(result.is_err());
}
