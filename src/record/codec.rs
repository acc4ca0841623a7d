//! Record codec
//!
//! Encoding and decoding of single log records.
//!
//! Decoding distinguishes two "end of valid data" conditions:
//! - `TruncatedRecord`: fewer bytes remain than header + declared payload
//! - `InvalidLength`: a length field is negative when read as `i32`
//!
//! Scanners treat both as the end of the segment, never as a failure.

use bytes::{Buf, BufMut};

use crate::error::{CaskadeError, Result};

use super::{Record, RecordFlag, HEADER_SIZE};

/// Parsed fixed-size record header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub key_len: u32,
    pub value_len: u32,
    pub flag: RecordFlag,
}

impl RecordHeader {
    /// Decode the 9-byte header at the front of `buf`
    pub fn decode(mut buf: &[u8]) -> Result<Self> {
        if (buf.len() as u64) < HEADER_SIZE {
            return Err(CaskadeError::TruncatedRecord {
                needed: HEADER_SIZE,
                available: buf.len() as u64,
            });
        }

        let key_len = buf.get_i32();
        let value_len = buf.get_i32();
        let flag_byte = buf.get_u8();

        if key_len < 0 || value_len < 0 {
            return Err(CaskadeError::InvalidLength { key_len, value_len });
        }

        let flag = RecordFlag::from_byte(flag_byte).ok_or(CaskadeError::InvalidFlag(flag_byte))?;

        Ok(Self {
            key_len: key_len as u32,
            value_len: value_len as u32,
            flag,
        })
    }

    /// Bytes following the header (key + value)
    pub fn payload_len(&self) -> u64 {
        self.key_len as u64 + self.value_len as u64
    }

    /// Full on-disk size of the record
    pub fn record_len(&self) -> u64 {
        HEADER_SIZE + self.payload_len()
    }
}

/// Encode a record from its parts
///
/// Tombstones are always written with a zero value length.
pub fn encode(key: &str, value: &[u8], flag: RecordFlag) -> Result<Vec<u8>> {
    let value = match flag {
        RecordFlag::Put => value,
        RecordFlag::Tombstone => &[],
    };

    if key.len() > i32::MAX as usize {
        return Err(CaskadeError::RecordTooLarge(key.len()));
    }
    if value.len() > i32::MAX as usize {
        return Err(CaskadeError::RecordTooLarge(value.len()));
    }

    let mut buf = Vec::with_capacity(HEADER_SIZE as usize + key.len() + value.len());
    buf.put_u32(key.len() as u32);
    buf.put_u32(value.len() as u32);
    buf.put_u8(flag.as_byte());
    buf.put_slice(key.as_bytes());
    buf.put_slice(value);

    Ok(buf)
}

/// Decode one record from the front of `buf`
///
/// Returns the record and the number of bytes consumed.
pub fn decode(buf: &[u8]) -> Result<(Record, usize)> {
    let header = RecordHeader::decode(buf)?;

    let needed = header.record_len();
    let available = buf.len() as u64;
    if needed > available {
        return Err(CaskadeError::TruncatedRecord { needed, available });
    }

    let mut payload = &buf[HEADER_SIZE as usize..needed as usize];

    let key_bytes = payload.copy_to_bytes(header.key_len as usize);
    let key = String::from_utf8(key_bytes.to_vec()).map_err(|_| CaskadeError::InvalidKey)?;

    let value = match header.flag {
        RecordFlag::Put => payload.copy_to_bytes(header.value_len as usize).to_vec(),
        RecordFlag::Tombstone => Vec::new(),
    };

    Ok((
        Record {
            key,
            value,
            flag: header.flag,
        },
        needed as usize,
    ))
}

impl Record {
    /// Encode this record into its on-disk form
    pub fn encode(&self) -> Result<Vec<u8>> {
        encode(&self.key, &self.value, self.flag)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_layout_is_big_endian() {
        let bytes = encode("ab", b"xyz", RecordFlag::Put).unwrap();

        assert_eq!(&bytes[0..4], &[0, 0, 0, 2]);
        assert_eq!(&bytes[4..8], &[0, 0, 0, 3]);
        assert_eq!(bytes[8], 0);
        assert_eq!(&bytes[9..11], b"ab");
        assert_eq!(&bytes[11..], b"xyz");
    }

    #[test]
    fn test_tombstone_has_no_value_bytes() {
        let bytes = encode("gone", b"ignored", RecordFlag::Tombstone).unwrap();

        assert_eq!(bytes.len(), 9 + 4);
        assert_eq!(&bytes[4..8], &[0, 0, 0, 0]);
        assert_eq!(bytes[8], 1);
    }

    #[test]
    fn test_decode_put_and_tombstone() {
        let mut buf = Record::put("k", b"value".to_vec()).encode().unwrap();
        buf.extend(Record::tombstone("k").encode().unwrap());

        let (first, used) = decode(&buf).unwrap();
        assert_eq!(first, Record::put("k", b"value".to_vec()));
        assert_eq!(used, 9 + 1 + 5);

        let (second, used2) = decode(&buf[used..]).unwrap();
        assert_eq!(second, Record::tombstone("k"));
        assert_eq!(used + used2, buf.len());
    }

    #[test]
    fn test_decode_empty_value() {
        let buf = Record::put("empty", Vec::new()).encode().unwrap();
        let (record, _) = decode(&buf).unwrap();

        assert_eq!(record.flag, RecordFlag::Put);
        assert!(record.value.is_empty());
    }

    #[test]
    fn test_decode_short_header_is_truncated() {
        let err = decode(&[0, 0, 0, 1, 0]).unwrap_err();

        assert!(matches!(err, CaskadeError::TruncatedRecord { needed: 9, available: 5 }));
        assert!(err.is_end_of_log());
    }

    #[test]
    fn test_decode_short_payload_is_truncated() {
        let buf = Record::put("key", b"0123456789".to_vec()).encode().unwrap();
        let err = decode(&buf[..buf.len() - 3]).unwrap_err();

        assert!(matches!(err, CaskadeError::TruncatedRecord { .. }));
    }

    #[test]
    fn test_decode_negative_length_is_invalid() {
        let mut buf = Vec::new();
        buf.put_i32(-1);
        buf.put_i32(4);
        buf.put_u8(0);
        buf.extend_from_slice(b"abcd");

        let err = decode(&buf).unwrap_err();
        assert!(matches!(err, CaskadeError::InvalidLength { key_len: -1, value_len: 4 }));
        assert!(err.is_end_of_log());
    }

    #[test]
    fn test_decode_unknown_flag() {
        let mut buf = Record::put("k", b"v".to_vec()).encode().unwrap();
        buf[8] = 7;

        let err = decode(&buf).unwrap_err();
        assert!(matches!(err, CaskadeError::InvalidFlag(7)));
    }

    #[test]
    fn test_decode_non_utf8_key() {
        let mut buf = Record::put("kk", b"v".to_vec()).encode().unwrap();
        buf[9] = 0xff;
        buf[10] = 0xfe;

        assert!(matches!(decode(&buf).unwrap_err(), CaskadeError::InvalidKey));
    }

    #[test]
    fn test_header_lengths() {
        let buf = encode("key", b"value", RecordFlag::Put).unwrap();
        let header = RecordHeader::decode(&buf).unwrap();

        assert_eq!(header.key_len, 3);
        assert_eq!(header.value_len, 5);
        assert_eq!(header.payload_len(), 8);
        assert_eq!(header.record_len(), buf.len() as u64);
    }
}
