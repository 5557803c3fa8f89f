//! Memory-mapped backend
//!
//! Read-only view of an existing data file, used to speed up the
//! sequential decode done while the engine replays its log at open.

use std::fs::OpenOptions;
use std::path::Path;

use memmap2::Mmap;

use crate::error::{CaskError, Result};

use super::IoManager;

/// Read-only, replay-only backend
pub struct MmapIo {
    /// `None` for an empty file (nothing to map)
    map: Option<Mmap>,
}

impl MmapIo {
    /// Map the file at `path`, creating it empty if missing
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)?;

        let len = file.metadata()?.len();
        let map = if len == 0 {
            None
        } else {
            // SAFETY: the engine holds the directory lock, and data files are
            // append-only; nothing truncates or rewrites a file while it is
            // mapped for replay.
            Some(unsafe { Mmap::map(&file)? })
        };

        Ok(Self { map })
    }
}

impl IoManager for MmapIo {
    fn read(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        let data: &[u8] = match &self.map {
            Some(map) => map,
            None => return Ok(0),
        };

        if offset >= data.len() as u64 {
            return Ok(0);
        }

        let start = offset as usize;
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        Ok(n)
    }

    fn write(&self, _buf: &[u8]) -> Result<usize> {
        Err(CaskError::Unsupported("append on memory-mapped backend"))
    }

    fn sync(&self) -> Result<()> {
        Err(CaskError::Unsupported("sync on memory-mapped backend"))
    }

    fn size(&self) -> Result<u64> {
        Ok(self.map.as_ref().map_or(0, |m| m.len() as u64))
    }
}
