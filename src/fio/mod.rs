//! I/O Backend Module
//!
//! Byte-addressable file access underneath a data file.
//!
//! ## Responsibilities
//! - Positional reads (`read(buf, offset)`)
//! - Appends and durable syncs on the writable backend
//! - Read-only memory-mapped access for fast startup replay
//!
//! The backend is byte-agnostic: it knows nothing about record layout.
//! Exactly two implementations exist, selected by [`IoType`]:
//!
//! | Backend        | read | write | sync | used for                |
//! |----------------|------|-------|------|-------------------------|
//! | `FileIo`       | yes  | yes   | yes  | steady state            |
//! | `MmapIo`       | yes  | no    | no   | replay during open only |

mod file_io;
mod mmap;

use std::path::Path;

use crate::config::IoType;
use crate::error::Result;

pub use file_io::FileIo;
pub use mmap::MmapIo;

/// Common interface of the I/O backends
pub trait IoManager: Send + Sync {
    /// Read up to `buf.len()` bytes starting at `offset`
    ///
    /// Returns the number of bytes read; fewer than requested means the
    /// file ends before `offset + buf.len()`.
    fn read(&self, buf: &mut [u8], offset: u64) -> Result<usize>;

    /// Append `buf` to the end of the file, returning the bytes written
    fn write(&self, buf: &[u8]) -> Result<usize>;

    /// Force every prior append to durable storage
    fn sync(&self) -> Result<()>;

    /// Current size of the underlying file
    fn size(&self) -> Result<u64>;
}

/// Open the backend selected by `io_type` for `path`
pub fn new_io_manager(path: &Path, io_type: IoType) -> Result<Box<dyn IoManager>> {
    match io_type {
        IoType::StandardFile => Ok(Box::new(FileIo::open(path)?)),
        IoType::MemoryMap => Ok(Box::new(MmapIo::open(path)?)),
    }
}
