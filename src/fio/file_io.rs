//! Standard file backend
//!
//! Separate handles for appends and positional reads, so a read never
//! disturbs the append position.

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::Path;

use parking_lot::Mutex;

use crate::error::Result;

use super::IoManager;

/// Writable, syncable file backend
pub struct FileIo {
    /// Append-mode handle; serializes writers
    writer: Mutex<File>,

    /// Independent handle for positional reads
    reader: Mutex<File>,
}

impl FileIo {
    /// Open or create the file at `path`
    pub fn open(path: &Path) -> Result<Self> {
        let writer = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        let reader = OpenOptions::new().read(true).open(path)?;

        Ok(Self {
            writer: Mutex::new(writer),
            reader: Mutex::new(reader),
        })
    }
}

impl IoManager for FileIo {
    fn read(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        let mut reader = self.reader.lock();
        reader.seek(SeekFrom::Start(offset))?;

        // Keep reading until the buffer is full or the file ends
        let mut filled = 0;
        while filled < buf.len() {
            match reader.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        Ok(filled)
    }

    fn write(&self, buf: &[u8]) -> Result<usize> {
        let mut writer = self.writer.lock();
        writer.write_all(buf)?;
        Ok(buf.len())
    }

    fn sync(&self) -> Result<()> {
        let writer = self.writer.lock();
        writer.sync_all()?;
        Ok(())
    }

    fn size(&self) -> Result<u64> {
        let writer = self.writer.lock();
        Ok(writer.metadata()?.len())
    }
}
