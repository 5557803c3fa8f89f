//! Log record encoding
//!
//! ## Record Format (little-endian)
//! ```text
//! ┌──────────┬────────────┬──────────────┬───────┬─────────┬───────────┐
//! │ Type (1) │ KeyLen (4) │ ValueLen (4) │  Key  │  Value  │ CRC32 (4) │
//! └──────────┴────────────┴──────────────┴───────┴─────────┴───────────┘
//! ```
//! The CRC covers every byte before it (type through value).

use crate::error::{CaskError, Result};

/// Fixed header size: Type (1) + KeyLen (4) + ValueLen (4) = 9 bytes
pub const MAX_HEADER_SIZE: usize = 1 + 4 + 4;

/// Trailing checksum size
pub const CRC_SIZE: usize = 4;

/// Size of an encoded `LogRecordPos`: FileId (4) + Offset (8)
pub const LOG_RECORD_POS_SIZE: usize = 4 + 8;

/// Record type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LogRecordType {
    /// A live value
    Normal = 0,

    /// A tombstone
    Deleted = 1,

    /// End marker of a committed write batch
    TxnFinished = 2,
}

impl LogRecordType {
    pub fn from_u8(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(LogRecordType::Normal),
            1 => Ok(LogRecordType::Deleted),
            2 => Ok(LogRecordType::TxnFinished),
            other => Err(CaskError::CorruptRecord(format!(
                "unknown record type: {}",
                other
            ))),
        }
    }
}

/// A single key/value entry as persisted in a data file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub rec_type: LogRecordType,
}

/// Parsed fixed-size header of an encoded record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogRecordHeader {
    pub rec_type: LogRecordType,
    pub key_len: u32,
    pub value_len: u32,
}

impl LogRecordHeader {
    /// Decode the first `MAX_HEADER_SIZE` bytes of a record
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < MAX_HEADER_SIZE {
            return Err(CaskError::CorruptRecord(format!(
                "header too short: expected {} bytes, got {}",
                MAX_HEADER_SIZE,
                buf.len()
            )));
        }

        let rec_type = LogRecordType::from_u8(buf[0])?;
        let key_len = u32::from_le_bytes([buf[1], buf[2], buf[3], buf[4]]);
        let value_len = u32::from_le_bytes([buf[5], buf[6], buf[7], buf[8]]);

        Ok(Self {
            rec_type,
            key_len,
            value_len,
        })
    }

    /// Bytes that follow the header: key + value + crc
    pub fn body_len(&self) -> usize {
        self.key_len as usize + self.value_len as usize + CRC_SIZE
    }

    /// Total encoded size of the record this header starts
    pub fn record_len(&self) -> u64 {
        LogRecord::encoded_len(self.key_len as usize, self.value_len as usize)
    }
}

impl LogRecord {
    pub fn normal(key: Vec<u8>, value: Vec<u8>) -> Self {
        Self {
            key,
            value,
            rec_type: LogRecordType::Normal,
        }
    }

    pub fn deleted(key: Vec<u8>) -> Self {
        Self {
            key,
            value: Vec::new(),
            rec_type: LogRecordType::Deleted,
        }
    }

    /// Total on-disk size of a record with the given key/value lengths
    ///
    /// Every offset advance in the crate goes through this function.
    pub fn encoded_len(key_len: usize, value_len: usize) -> u64 {
        (MAX_HEADER_SIZE + key_len + value_len + CRC_SIZE) as u64
    }

    /// Check that key and value fit the 32-bit length fields
    pub fn check_lengths(&self) -> Result<()> {
        if self.key.len() > u32::MAX as usize {
            return Err(CaskError::RecordTooLarge {
                len: self.key.len(),
            });
        }
        if self.value.len() > u32::MAX as usize {
            return Err(CaskError::RecordTooLarge {
                len: self.value.len(),
            });
        }
        Ok(())
    }

    /// Encode into the on-disk byte layout
    pub fn encode(&self) -> Result<Vec<u8>> {
        self.check_lengths()?;

        let total = Self::encoded_len(self.key.len(), self.value.len()) as usize;
        let mut buf = Vec::with_capacity(total);
        buf.push(self.rec_type as u8);
        buf.extend_from_slice(&(self.key.len() as u32).to_le_bytes());
        buf.extend_from_slice(&(self.value.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.key);
        buf.extend_from_slice(&self.value);

        let crc = crc32fast::hash(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());

        Ok(buf)
    }

    /// Decode a complete encoded record, validating its checksum
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let header = LogRecordHeader::decode(buf)?;

        let expected = header.record_len();
        if buf.len() as u64 != expected {
            return Err(CaskError::CorruptRecord(format!(
                "length mismatch: header describes {} bytes, buffer has {}",
                expected,
                buf.len()
            )));
        }

        let crc_start = buf.len() - CRC_SIZE;
        let stored_crc = u32::from_le_bytes([
            buf[crc_start],
            buf[crc_start + 1],
            buf[crc_start + 2],
            buf[crc_start + 3],
        ]);
        let actual_crc = crc32fast::hash(&buf[..crc_start]);
        if stored_crc != actual_crc {
            return Err(CaskError::CorruptRecord(format!(
                "crc mismatch: stored {:#010x}, computed {:#010x}",
                stored_crc, actual_crc
            )));
        }

        let key_end = MAX_HEADER_SIZE + header.key_len as usize;
        Ok(Self {
            key: buf[MAX_HEADER_SIZE..key_end].to_vec(),
            value: buf[key_end..crc_start].to_vec(),
            rec_type: header.rec_type,
        })
    }
}

/// A record read back from a data file, with the bytes it occupied
#[derive(Debug, Clone)]
pub struct ReadLogRecord {
    pub record: LogRecord,
    pub size: u64,
}

/// Position of a record inside the data directory
///
/// `size` is the encoded length of the record. It is kept in memory only;
/// the persisted form (hint files) is the 12-byte `file_id | offset` pair,
/// so positions decoded from a hint carry `size == 0` (unknown).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogRecordPos {
    pub file_id: u32,
    pub offset: u64,
    pub size: u64,
}

impl LogRecordPos {
    pub fn new(file_id: u32, offset: u64, size: u64) -> Self {
        Self {
            file_id,
            offset,
            size,
        }
    }

    /// Same record location, ignoring the in-memory size
    pub fn same_location(&self, other: &LogRecordPos) -> bool {
        self.file_id == other.file_id && self.offset == other.offset
    }

    /// Encode as `file_id: u32 | offset: u64`, little-endian
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(LOG_RECORD_POS_SIZE);
        buf.extend_from_slice(&self.file_id.to_le_bytes());
        buf.extend_from_slice(&self.offset.to_le_bytes());
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() != LOG_RECORD_POS_SIZE {
            return Err(CaskError::CorruptRecord(format!(
                "position must be {} bytes, got {}",
                LOG_RECORD_POS_SIZE,
                buf.len()
            )));
        }

        let file_id = u32::from_le_bytes(buf[0..4].try_into().map_err(|_| {
            CaskError::CorruptRecord("bad position file id".to_string())
        })?);
        let offset = u64::from_le_bytes(buf[4..12].try_into().map_err(|_| {
            CaskError::CorruptRecord("bad position offset".to_string())
        })?);

        Ok(Self {
            file_id,
            offset,
            size: 0,
        })
    }
}

// =============================================================================
// Transaction Key Prefix
// =============================================================================

/// Transaction number carried by writes outside any batch
pub const NON_TXN_SEQ_NO: u32 = 0;

/// Size of the transaction number prefixed to every persisted key
pub const TXN_PREFIX_SIZE: usize = 4;

/// Prefix `key` with a little-endian transaction number
pub fn encode_txn_key(key: &[u8], seq_no: u32) -> Vec<u8> {
    let mut buf = Vec::with_capacity(TXN_PREFIX_SIZE + key.len());
    buf.extend_from_slice(&seq_no.to_le_bytes());
    buf.extend_from_slice(key);
    buf
}

/// Split a persisted key into `(real_key, seq_no)`
pub fn parse_txn_key(key: &[u8]) -> Result<(Vec<u8>, u32)> {
    if key.len() < TXN_PREFIX_SIZE {
        return Err(CaskError::CorruptRecord(format!(
            "persisted key shorter than transaction prefix: {} bytes",
            key.len()
        )));
    }
    let seq_no = u32::from_le_bytes([key[0], key[1], key[2], key[3]]);
    Ok((key[TXN_PREFIX_SIZE..].to_vec(), seq_no))
}
