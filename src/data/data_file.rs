//! Data file (segment)
//!
//! One append-only file of encoded records, identified by a `u32` id.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::IoType;
use crate::error::{CaskError, Result};
use crate::fio::{new_io_manager, IoManager};

use super::log_record::{
    LogRecord, LogRecordHeader, LogRecordPos, ReadLogRecord, MAX_HEADER_SIZE,
};

/// Extension of segment files: `<id>.data`
pub const DATA_FILE_EXTENSION: &str = "data";

/// Hint file written by merge
pub const HINT_FILE_NAME: &str = "_Hint";

/// Merge completion marker
pub const MERGE_FINISHED_FILE_NAME: &str = "_MergeFinished";

/// Key of the single record inside the merge completion marker
const MERGE_FINISHED_KEY: &[u8] = b"merge.finished";

/// Path of the data file with `file_id` inside `dir`
pub fn data_file_path(dir: &Path, file_id: u32) -> PathBuf {
    dir.join(format!("{}.{}", file_id, DATA_FILE_EXTENSION))
}

/// A single data file
pub struct DataFile {
    file_id: u32,

    /// Next append position, and the end of the readable log
    write_off: AtomicU64,

    path: PathBuf,
    io_manager: Box<dyn IoManager>,
}

impl DataFile {
    /// Open (or create) the data file `file_id` in `dir`
    pub fn new(dir: &Path, file_id: u32, io_type: IoType) -> Result<Self> {
        Self::open_path(data_file_path(dir, file_id), file_id, io_type)
    }

    /// Open the hint file in `dir`
    pub fn hint_file(dir: &Path) -> Result<Self> {
        Self::open_path(dir.join(HINT_FILE_NAME), 0, IoType::StandardFile)
    }

    /// Open the merge completion marker in `dir`
    pub fn merge_finished_file(dir: &Path) -> Result<Self> {
        Self::open_path(dir.join(MERGE_FINISHED_FILE_NAME), 0, IoType::StandardFile)
    }

    fn open_path(path: PathBuf, file_id: u32, io_type: IoType) -> Result<Self> {
        let io_manager = new_io_manager(&path, io_type)?;
        let write_off = io_manager.size()?;
        Ok(Self {
            file_id,
            write_off: AtomicU64::new(write_off),
            path,
            io_manager,
        })
    }

    pub fn file_id(&self) -> u32 {
        self.file_id
    }

    pub fn write_off(&self) -> u64 {
        self.write_off.load(Ordering::SeqCst)
    }

    pub fn set_write_off(&self, offset: u64) {
        self.write_off.store(offset, Ordering::SeqCst);
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Size of the file on disk (may exceed `write_off` after a torn append)
    pub fn file_size(&self) -> Result<u64> {
        self.io_manager.size()
    }

    /// Append an encoded record, advancing the write offset
    pub fn write(&self, buf: &[u8]) -> Result<usize> {
        let n = self.io_manager.write(buf)?;
        if n != buf.len() {
            return Err(CaskError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                format!("short append: wrote {} of {} bytes", n, buf.len()),
            )));
        }
        self.write_off.fetch_add(n as u64, Ordering::SeqCst);
        Ok(n)
    }

    /// Append a hint entry `key -> pos`
    pub fn write_hint_record(&self, key: Vec<u8>, pos: &LogRecordPos) -> Result<()> {
        let record = LogRecord::normal(key, pos.encode());
        self.write(&record.encode()?)?;
        Ok(())
    }

    /// Write the merge marker naming the first file id the merge did not cover
    pub fn write_merge_finished(&self, non_merge_file_id: u32) -> Result<()> {
        let record = LogRecord::normal(
            MERGE_FINISHED_KEY.to_vec(),
            non_merge_file_id.to_le_bytes().to_vec(),
        );
        self.write(&record.encode()?)?;
        Ok(())
    }

    /// Read back the value written by `write_merge_finished`
    pub fn read_merge_finished(&self) -> Result<u32> {
        let read = self.read_log_record(0)?.ok_or_else(|| {
            CaskError::CorruptRecord("merge finished marker is empty".to_string())
        })?;
        let bytes: [u8; 4] = read.record.value.as_slice().try_into().map_err(|_| {
            CaskError::CorruptRecord(format!(
                "merge finished marker holds {} bytes, expected 4",
                read.record.value.len()
            ))
        })?;
        Ok(u32::from_le_bytes(bytes))
    }

    pub fn sync(&self) -> Result<()> {
        self.io_manager.sync()
    }

    /// Read the record starting at `offset`
    ///
    /// Returns `Ok(None)` only when nothing is left at `offset`. A record
    /// cut off by the end of the file, or one with a bad checksum, is
    /// `CorruptRecord`.
    pub fn read_log_record(&self, offset: u64) -> Result<Option<ReadLogRecord>> {
        match self.read_raw(offset)? {
            RawRead::Record(read) => Ok(Some(read)),
            RawRead::End => Ok(None),
            RawRead::ShortHeader => Err(self.cut_off(offset, MAX_HEADER_SIZE as u64)),
            RawRead::Overrun(header) => Err(self.cut_off(offset, header.record_len())),
        }
    }

    /// Read the record at `offset` of a file whose last append may be torn
    ///
    /// Same as `read_log_record`, except that a record cut off by the end of
    /// the file is end-of-log when it can only be an interrupted final
    /// append: a partial header, or a record that fits `size_limit` (larger
    /// appends start a fresh file) with no whole record anywhere after its
    /// first byte.
    pub fn read_tail_log_record(
        &self,
        offset: u64,
        size_limit: u64,
    ) -> Result<Option<ReadLogRecord>> {
        match self.read_raw(offset)? {
            RawRead::Record(read) => Ok(Some(read)),
            RawRead::End | RawRead::ShortHeader => Ok(None),
            RawRead::Overrun(header) => {
                if self.is_torn_append(offset, &header, size_limit)? {
                    Ok(None)
                } else {
                    Err(self.cut_off(offset, header.record_len()))
                }
            }
        }
    }

    /// Decode at `offset`, leaving the end-of-file policy to the caller
    ///
    /// Reads are bounded by `write_off`, which tracks the file length.
    fn read_raw(&self, offset: u64) -> Result<RawRead> {
        let file_size = self.write_off();
        if offset >= file_size {
            return Ok(RawRead::End);
        }
        if file_size - offset < MAX_HEADER_SIZE as u64 {
            return Ok(RawRead::ShortHeader);
        }

        // Step 1: Fixed header
        let mut header_buf = [0u8; MAX_HEADER_SIZE];
        let n = self.io_manager.read(&mut header_buf, offset)?;
        if n < MAX_HEADER_SIZE {
            return Ok(RawRead::ShortHeader);
        }
        let header = LogRecordHeader::decode(&header_buf)?;

        // Step 2: Body sized by the header (key + value + crc)
        let size = header.record_len();
        if offset + size > file_size {
            return Ok(RawRead::Overrun(header));
        }

        let mut record_buf = vec![0u8; size as usize];
        record_buf[..MAX_HEADER_SIZE].copy_from_slice(&header_buf);
        let n = self
            .io_manager
            .read(&mut record_buf[MAX_HEADER_SIZE..], offset + MAX_HEADER_SIZE as u64)?;
        if n < header.body_len() {
            return Ok(RawRead::Overrun(header));
        }

        // Step 3: Checksum + decode
        let record = LogRecord::decode(&record_buf)?;
        Ok(RawRead::Record(ReadLogRecord { record, size }))
    }

    /// Whether the overrunning record at `offset` can be a torn final append
    fn is_torn_append(
        &self,
        offset: u64,
        header: &LogRecordHeader,
        size_limit: u64,
    ) -> Result<bool> {
        if offset > 0 && offset + header.record_len() > size_limit {
            return Ok(false);
        }

        let mut tail = vec![0u8; (self.write_off() - offset) as usize];
        let n = self.io_manager.read(&mut tail, offset)?;
        tail.truncate(n);

        Ok(!(1..tail.len()).any(|start| starts_with_record(&tail[start..])))
    }

    fn cut_off(&self, offset: u64, wanted: u64) -> CaskError {
        CaskError::CorruptRecord(format!(
            "record at file {} offset {} needs {} bytes, file ends at {}",
            self.file_id,
            offset,
            wanted,
            self.write_off()
        ))
    }

    /// Encoded size of the record starting at `offset`, from its header alone
    pub fn record_size_at(&self, offset: u64) -> Result<u64> {
        let mut header_buf = [0u8; MAX_HEADER_SIZE];
        let n = self.io_manager.read(&mut header_buf, offset)?;
        if n < MAX_HEADER_SIZE {
            return Err(CaskError::ConsistencyViolation(format!(
                "no record header at file {} offset {}",
                self.file_id, offset
            )));
        }
        Ok(LogRecordHeader::decode(&header_buf)?.record_len())
    }

    /// Swap the I/O backend, keeping id and write offset
    pub fn set_io_manager(&mut self, io_type: IoType) -> Result<()> {
        self.io_manager = new_io_manager(&self.path, io_type)?;
        Ok(())
    }

    /// Cut the file back to `len` bytes (drops a torn tail)
    ///
    /// Switches to the standard backend first so no mapping outlives the
    /// truncation.
    pub fn truncate(&mut self, len: u64) -> Result<()> {
        self.set_io_manager(IoType::StandardFile)?;
        let file = fs::OpenOptions::new().write(true).open(&self.path)?;
        file.set_len(len)?;
        file.sync_all()?;
        self.set_write_off(len);
        Ok(())
    }
}

/// Result of decoding at one offset
enum RawRead {
    Record(ReadLogRecord),

    /// Nothing left at the offset
    End,

    /// Fewer bytes than a header remain
    ShortHeader,

    /// The header describes a record running past the end of the file
    Overrun(LogRecordHeader),
}

/// Whether `buf` begins with a complete, checksum-valid record
fn starts_with_record(buf: &[u8]) -> bool {
    let Ok(header) = LogRecordHeader::decode(buf) else {
        return false;
    };
    let len = header.record_len();
    len <= buf.len() as u64 && LogRecord::decode(&buf[..len as usize]).is_ok()
}
