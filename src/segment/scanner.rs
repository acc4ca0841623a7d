//! Segment Scanner
//!
//! Sequential walk over the raw records of one data segment.
//!
//! Scanning stops quietly at the first position that cannot start a complete
//! record (short header, negative length, payload past end of file, bad key
//! or flag). Everything from there on is treated as a crash-torn tail.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use tracing::warn;

use crate::error::Result;
use crate::keydir::IndexEntry;
use crate::record::{RecordFlag, RecordHeader, HEADER_SIZE};

use super::data_path;

/// One record found by the scanner
#[derive(Debug, Clone)]
pub struct ScannedRecord {
    pub key: String,
    pub entry: IndexEntry,
    /// Value bytes (only when the scanner loads values and the record is a PUT)
    pub value: Option<Vec<u8>>,
}

/// Iterator over the records of a data segment in append order
pub struct SegmentScanner {
    reader: BufReader<File>,
    segment_id: u32,
    file_len: u64,
    /// Offset of the next record == end of the last valid record
    offset: u64,
    load_values: bool,
    done: bool,
}

impl SegmentScanner {
    /// Open segment `id` for scanning
    ///
    /// With `load_values` unset, value bytes are skipped rather than read.
    pub fn open(dir: &Path, id: u32, load_values: bool) -> Result<Self> {
        let file = File::open(data_path(dir, id))?;
        let file_len = file.metadata()?.len();

        Ok(Self {
            reader: BufReader::new(file),
            segment_id: id,
            file_len,
            offset: 0,
            load_values,
            done: false,
        })
    }

    pub fn segment_id(&self) -> u32 {
        self.segment_id
    }

    /// Length of the data file when the scan started
    pub fn file_len(&self) -> u64 {
        self.file_len
    }

    /// End of the last valid record seen so far
    pub fn valid_len(&self) -> u64 {
        self.offset
    }

    fn stop_torn(&mut self, reason: &str) {
        warn!(
            segment = self.segment_id,
            offset = self.offset,
            file_len = self.file_len,
            reason,
            "stopping scan at torn segment tail"
        );
        self.done = true;
    }

    fn read_record(&mut self) -> Result<Option<ScannedRecord>> {
        let remaining = self.file_len - self.offset;
        if remaining == 0 {
            self.done = true;
            return Ok(None);
        }
        if remaining < HEADER_SIZE {
            self.stop_torn("short header");
            return Ok(None);
        }

        let mut header_buf = [0u8; HEADER_SIZE as usize];
        self.reader.read_exact(&mut header_buf)?;

        let header = match RecordHeader::decode(&header_buf) {
            Ok(header) => header,
            Err(e) if e.is_end_of_log() => {
                self.stop_torn("invalid header");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        if header.payload_len() > remaining - HEADER_SIZE {
            self.stop_torn("payload past end of file");
            return Ok(None);
        }

        let mut key_buf = vec![0u8; header.key_len as usize];
        self.reader.read_exact(&mut key_buf)?;
        let key = match String::from_utf8(key_buf) {
            Ok(key) => key,
            Err(_) => {
                self.stop_torn("key is not UTF-8");
                return Ok(None);
            }
        };

        let value = if self.load_values && header.flag == RecordFlag::Put {
            let mut value = vec![0u8; header.value_len as usize];
            self.reader.read_exact(&mut value)?;
            Some(value)
        } else {
            self.reader.seek_relative(header.value_len as i64)?;
            None
        };

        let value_size = match header.flag {
            RecordFlag::Put => header.value_len,
            RecordFlag::Tombstone => 0,
        };
        let entry = IndexEntry::new(
            self.segment_id,
            self.offset,
            header.key_len as usize,
            value_size,
            header.flag,
        );

        self.offset += header.record_len();

        Ok(Some(ScannedRecord { key, entry, value }))
    }
}

impl Iterator for SegmentScanner {
    type Item = Result<ScannedRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        match self.read_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => None,
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::fs::OpenOptions;
    use std::io::Write;

    use tempfile::TempDir;

    use super::*;
    use crate::record::Record;

    fn write_segment(dir: &Path, id: u32, records: &[Record], tail: &[u8]) {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(data_path(dir, id))
            .unwrap();
        for record in records {
            file.write_all(&record.encode().unwrap()).unwrap();
        }
        file.write_all(tail).unwrap();
    }

    #[test]
    fn test_scan_yields_records_in_order() {
        let temp = TempDir::new().unwrap();
        write_segment(
            temp.path(),
            1,
            &[
                Record::put("a", b"1".to_vec()),
                Record::put("b", b"22".to_vec()),
                Record::tombstone("a"),
            ],
            &[],
        );

        let scanner = SegmentScanner::open(temp.path(), 1, false).unwrap();
        let records: Vec<_> = scanner.map(|r| r.unwrap()).collect();

        assert_eq!(records.len(), 3);
        assert_eq!(records[0].key, "a");
        assert_eq!(records[0].entry.record_start, 0);
        assert_eq!(records[0].entry.value_offset, 10);
        assert_eq!(records[1].entry.record_start, 11);
        assert_eq!(records[1].entry.value_size, 2);
        assert!(records[2].entry.is_tombstone());
        assert!(records.iter().all(|r| r.value.is_none()));
    }

    #[test]
    fn test_scan_loads_values() {
        let temp = TempDir::new().unwrap();
        write_segment(
            temp.path(),
            2,
            &[Record::put("k", b"value".to_vec()), Record::tombstone("k")],
            &[],
        );

        let mut scanner = SegmentScanner::open(temp.path(), 2, true).unwrap();
        let first = scanner.next().unwrap().unwrap();
        let second = scanner.next().unwrap().unwrap();

        assert_eq!(first.value.as_deref(), Some(&b"value"[..]));
        assert!(second.value.is_none());
        assert!(scanner.next().is_none());
    }

    #[test]
    fn test_scan_stops_at_partial_header() {
        let temp = TempDir::new().unwrap();
        let good = Record::put("k", b"v".to_vec());
        write_segment(temp.path(), 1, &[good.clone()], &[0, 0, 0, 1]);

        let mut scanner = SegmentScanner::open(temp.path(), 1, false).unwrap();
        assert!(scanner.next().unwrap().is_ok());
        assert!(scanner.next().is_none());
        assert_eq!(scanner.valid_len(), good.encoded_len());
        assert_eq!(scanner.file_len(), good.encoded_len() + 4);
    }

    #[test]
    fn test_scan_stops_at_partial_payload() {
        let temp = TempDir::new().unwrap();
        let good = Record::put("k", b"v".to_vec());
        let torn = Record::put("torn", vec![7u8; 100]).encode().unwrap();
        write_segment(temp.path(), 1, &[good.clone()], &torn[..50]);

        let mut scanner = SegmentScanner::open(temp.path(), 1, false).unwrap();
        let records: Vec<_> = scanner.by_ref().collect();

        assert_eq!(records.len(), 1);
        assert_eq!(scanner.valid_len(), good.encoded_len());
    }

    #[test]
    fn test_scan_stops_at_negative_length() {
        let temp = TempDir::new().unwrap();
        write_segment(temp.path(), 1, &[], &[0xff, 0xff, 0xff, 0xff, 0, 0, 0, 0, 0, 1, 2]);

        let mut scanner = SegmentScanner::open(temp.path(), 1, false).unwrap();
        assert!(scanner.next().is_none());
        assert_eq!(scanner.valid_len(), 0);
    }

    #[test]
    fn test_scan_empty_segment() {
        let temp = TempDir::new().unwrap();
        write_segment(temp.path(), 5, &[], &[]);

        let mut scanner = SegmentScanner::open(temp.path(), 5, true).unwrap();
        assert!(scanner.next().is_none());
        assert_eq!(scanner.segment_id(), 5);
    }
}
