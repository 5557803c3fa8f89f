//! Tests for the I/O backends
//!
//! These tests verify:
//! - Standard file backend: append, positional read, sync, size
//! - Memory-mapped backend: reads match the file, writes are rejected
//! - The backend factory

use std::fs;

use caskdb::config::IoType;
use caskdb::fio::{new_io_manager, FileIo, IoManager, MmapIo};
use caskdb::CaskError;
use tempfile::TempDir;

// =============================================================================
// FileIo Tests
// =============================================================================

#[test]
fn test_file_io_append_and_read() {
    let temp = TempDir::new().unwrap();
    let io = FileIo::open(&temp.path().join("0.data")).unwrap();

    assert_eq!(io.write(b"hello ").unwrap(), 6);
    assert_eq!(io.write(b"world").unwrap(), 5);
    assert_eq!(io.size().unwrap(), 11);

    let mut buf = [0u8; 5];
    assert_eq!(io.read(&mut buf, 6).unwrap(), 5);
    assert_eq!(&buf, b"world");

    let mut buf = [0u8; 11];
    assert_eq!(io.read(&mut buf, 0).unwrap(), 11);
    assert_eq!(&buf, b"hello world");
}

#[test]
fn test_file_io_short_read_at_end() {
    let temp = TempDir::new().unwrap();
    let io = FileIo::open(&temp.path().join("0.data")).unwrap();
    io.write(b"abc").unwrap();

    let mut buf = [0u8; 8];
    assert_eq!(io.read(&mut buf, 1).unwrap(), 2);
    assert_eq!(&buf[..2], b"bc");
    assert_eq!(io.read(&mut buf, 3).unwrap(), 0);
    assert_eq!(io.read(&mut buf, 100).unwrap(), 0);
}

#[test]
fn test_file_io_sync_persists() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("0.data");
    {
        let io = FileIo::open(&path).unwrap();
        io.write(b"durable").unwrap();
        io.sync().unwrap();
    }

    assert_eq!(fs::read(&path).unwrap(), b"durable");
}

#[test]
fn test_file_io_appends_to_existing_file() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("0.data");
    fs::write(&path, b"old").unwrap();

    let io = FileIo::open(&path).unwrap();
    io.write(b"new").unwrap();

    assert_eq!(fs::read(&path).unwrap(), b"oldnew");
}

// =============================================================================
// MmapIo Tests
// =============================================================================

#[test]
fn test_mmap_reads_file_contents() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("0.data");
    fs::write(&path, b"mapped bytes").unwrap();

    let io = MmapIo::open(&path).unwrap();
    assert_eq!(io.size().unwrap(), 12);

    let mut buf = [0u8; 5];
    assert_eq!(io.read(&mut buf, 7).unwrap(), 5);
    assert_eq!(&buf, b"bytes");

    let mut buf = [0u8; 10];
    assert_eq!(io.read(&mut buf, 10).unwrap(), 2);
    assert_eq!(io.read(&mut buf, 12).unwrap(), 0);
}

#[test]
fn test_mmap_empty_file() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("empty.data");

    let io = MmapIo::open(&path).unwrap();
    assert!(path.exists());
    assert_eq!(io.size().unwrap(), 0);

    let mut buf = [0u8; 4];
    assert_eq!(io.read(&mut buf, 0).unwrap(), 0);
}

#[test]
fn test_mmap_rejects_write_and_sync() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("0.data");
    fs::write(&path, b"abc").unwrap();

    let io = MmapIo::open(&path).unwrap();
    assert!(matches!(io.write(b"x"), Err(CaskError::Unsupported(_))));
    assert!(matches!(io.sync(), Err(CaskError::Unsupported(_))));
    assert_eq!(fs::read(&path).unwrap(), b"abc");
}

// =============================================================================
// Factory Tests
// =============================================================================

#[test]
fn test_new_io_manager_selects_backend() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("0.data");

    let file_io = new_io_manager(&path, IoType::StandardFile).unwrap();
    file_io.write(b"0123456789").unwrap();
    file_io.sync().unwrap();

    let mmap_io = new_io_manager(&path, IoType::MemoryMap).unwrap();
    let mut from_file = [0u8; 10];
    let mut from_map = [0u8; 10];
    file_io.read(&mut from_file, 0).unwrap();
    mmap_io.read(&mut from_map, 0).unwrap();

    assert_eq!(from_file, from_map);
    assert!(mmap_io.write(b"x").is_err());
}
