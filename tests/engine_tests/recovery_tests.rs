//! Tests for crash recovery
//!
//! These tests verify:
//! - Reopen rebuilds the index from the data files
//! - Torn tails are dropped and appends continue after them
//! - Memory-mapped startup yields the same state as file I/O
//! - Corrupted records and length fields fail open instead of losing data
//! - Corrupted directories are rejected

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use caskdb::data::{data_file_path, encode_txn_key, LogRecord};
use caskdb::{CaskError, Engine, IoType, Options};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn options_for(dir: &Path) -> Options {
    Options::builder().dir_path(dir).build()
}

fn append_raw(dir: &Path, file_id: u32, bytes: &[u8]) {
    let mut file = OpenOptions::new()
        .append(true)
        .open(data_file_path(dir, file_id))
        .unwrap();
    file.write_all(bytes).unwrap();
    file.sync_all().unwrap();
}

// =============================================================================
// Reopen Tests
// =============================================================================

#[test]
fn test_reopen_restores_state() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().join("db");

    {
        let engine = Engine::open(options_for(&dir)).unwrap();
        engine.put(b"a", b"1").unwrap();
        engine.put(b"b", b"2").unwrap();
        engine.put(b"a", b"3").unwrap();
        engine.delete(b"b").unwrap();
        engine.put(b"c", b"4").unwrap();
    }

    let engine = Engine::open(options_for(&dir)).unwrap();
    assert_eq!(&engine.get(b"a").unwrap()[..], b"3");
    assert!(matches!(engine.get(b"b"), Err(CaskError::KeyNotFound)));
    assert_eq!(&engine.get(b"c").unwrap()[..], b"4");
    assert_eq!(engine.stat().unwrap().key_num, 2);
}

#[test]
fn test_reopen_after_rotation() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().join("db");
    let options = Options::builder()
        .dir_path(&dir)
        .data_file_size(10 * 1024)
        .build();

    {
        let engine = Engine::open(options.clone()).unwrap();
        for i in 0..10_000 {
            engine
                .put(format!("key-{:06}", i).as_bytes(), format!("value-{}", i).as_bytes())
                .unwrap();
        }
    }

    let engine = Engine::open(options).unwrap();
    let stat = engine.stat().unwrap();
    assert_eq!(stat.key_num, 10_000);
    assert!(stat.data_file_num > 1);
    assert_eq!(&engine.get(b"key-000000").unwrap()[..], b"value-0");
    assert_eq!(&engine.get(b"key-009999").unwrap()[..], b"value-9999");
}

#[test]
fn test_reopen_appends_after_existing_records() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().join("db");

    {
        let engine = Engine::open(options_for(&dir)).unwrap();
        engine.put(b"first", b"1").unwrap();
    }
    {
        let engine = Engine::open(options_for(&dir)).unwrap();
        engine.put(b"second", b"2").unwrap();
    }

    let engine = Engine::open(options_for(&dir)).unwrap();
    assert_eq!(&engine.get(b"first").unwrap()[..], b"1");
    assert_eq!(&engine.get(b"second").unwrap()[..], b"2");
}

#[test]
fn test_reclaimable_size_survives_reopen() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().join("db");

    let before = {
        let engine = Engine::open(options_for(&dir)).unwrap();
        for i in 0..50 {
            engine.put(format!("k{}", i % 10).as_bytes(), b"value").unwrap();
        }
        engine.delete(b"k3").unwrap();
        let mut batch = engine.create_write_batch(Default::default());
        batch.put(b"k4", b"batched").unwrap();
        batch.delete(b"k5").unwrap();
        batch.commit().unwrap();
        engine.stat().unwrap()
    };

    let after = Engine::open(options_for(&dir)).unwrap().stat().unwrap();
    assert_eq!(after.reclaimable_size, before.reclaimable_size);
    assert_eq!(after.key_num, before.key_num);
    assert_eq!(after.disk_size, before.disk_size);
}

// =============================================================================
// Memory-Mapped Startup Tests
// =============================================================================

#[test]
fn test_mmap_startup_matches_file_io() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().join("db");
    let file_options = Options::builder()
        .dir_path(&dir)
        .data_file_size(4 * 1024)
        .build();

    {
        let engine = Engine::open(file_options.clone()).unwrap();
        for i in 0..1_000 {
            engine.put(format!("k{}", i).as_bytes(), format!("v{}", i).as_bytes()).unwrap();
        }
        for i in 0..100 {
            engine.delete(format!("k{}", i).as_bytes()).unwrap();
        }
    }

    let mmap_options = Options {
        io_type: IoType::MemoryMap,
        ..file_options.clone()
    };
    let expected = {
        let engine = Engine::open(mmap_options.clone()).unwrap();
        assert_eq!(engine.stat().unwrap().key_num, 900);
        assert_eq!(&engine.get(b"k500").unwrap()[..], b"v500");

        // Writes after startup go through the file backend
        engine.put(b"after-mmap", b"ok").unwrap();
        engine.stat().unwrap()
    };

    let engine = Engine::open(file_options).unwrap();
    let stat = engine.stat().unwrap();
    assert_eq!(stat.key_num, expected.key_num);
    assert_eq!(stat.reclaimable_size, expected.reclaimable_size);
    assert_eq!(&engine.get(b"after-mmap").unwrap()[..], b"ok");
}

#[test]
fn test_mmap_startup_on_empty_directory() {
    let temp = TempDir::new().unwrap();
    let options = Options::builder()
        .dir_path(temp.path().join("db"))
        .io_type(IoType::MemoryMap)
        .build();

    let engine = Engine::open(options).unwrap();
    engine.put(b"k", b"v").unwrap();
    assert_eq!(&engine.get(b"k").unwrap()[..], b"v");
}

// =============================================================================
// Torn Tail Tests
// =============================================================================

#[test]
fn test_torn_tail_is_truncated() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().join("db");

    {
        let engine = Engine::open(options_for(&dir)).unwrap();
        engine.put(b"survivor", b"intact").unwrap();
    }

    // A crash left half a record behind
    let torn = LogRecord::normal(encode_txn_key(b"lost", 0), b"half-written".to_vec())
        .encode()
        .unwrap();
    append_raw(&dir, 0, &torn[..torn.len() - 5]);

    {
        let engine = Engine::open(options_for(&dir)).unwrap();
        assert_eq!(&engine.get(b"survivor").unwrap()[..], b"intact");
        assert!(engine.get(b"lost").is_err());

        engine.put(b"next", b"write").unwrap();
    }

    let engine = Engine::open(options_for(&dir)).unwrap();
    assert_eq!(&engine.get(b"survivor").unwrap()[..], b"intact");
    assert_eq!(&engine.get(b"next").unwrap()[..], b"write");
    assert_eq!(engine.stat().unwrap().key_num, 2);
}

#[test]
fn test_torn_tail_with_mmap_startup() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().join("db");
    let options = Options::builder()
        .dir_path(&dir)
        .io_type(IoType::MemoryMap)
        .build();

    {
        let engine = Engine::open(options.clone()).unwrap();
        engine.put(b"a", b"1").unwrap();
    }
    append_raw(&dir, 0, &[0u8, 3, 0, 0]);

    {
        let engine = Engine::open(options.clone()).unwrap();
        engine.put(b"b", b"2").unwrap();
    }

    let engine = Engine::open(options).unwrap();
    assert_eq!(&engine.get(b"a").unwrap()[..], b"1");
    assert_eq!(&engine.get(b"b").unwrap()[..], b"2");
}

#[test]
fn test_corrupt_record_fails_open() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().join("db");

    {
        let engine = Engine::open(options_for(&dir)).unwrap();
        engine.put(b"key", b"value").unwrap();
        engine.put(b"other", b"value").unwrap();
    }

    // Flip a value byte of the first record
    let path = data_file_path(&dir, 0);
    let mut bytes = fs::read(&path).unwrap();
    bytes[9 + 4 + 3] ^= 0xFF;
    fs::write(&path, bytes).unwrap();

    assert!(matches!(
        Engine::open(options_for(&dir)),
        Err(CaskError::CorruptRecord(_))
    ));
}

#[test]
fn test_inflated_length_in_sealed_file_fails_open() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().join("db");
    let options = Options::builder()
        .dir_path(&dir)
        .data_file_size(200)
        .build();

    {
        let engine = Engine::open(options.clone()).unwrap();
        for i in 0..20 {
            engine.put(format!("key-{:02}", i).as_bytes(), b"value").unwrap();
        }
        assert!(engine.stat().unwrap().data_file_num > 2);
    }

    // High byte of the first record's value length
    let path = data_file_path(&dir, 0);
    let mut bytes = fs::read(&path).unwrap();
    bytes[8] = 0x7F;
    fs::write(&path, &bytes).unwrap();

    assert!(matches!(
        Engine::open(options),
        Err(CaskError::CorruptRecord(_))
    ));
}

#[test]
fn test_inflated_length_in_active_file_keeps_records() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().join("db");

    {
        let engine = Engine::open(options_for(&dir)).unwrap();
        for i in 0..5 {
            engine.put(format!("key-{}", i).as_bytes(), b"value").unwrap();
        }
    }

    // High byte of the first record's key length
    let path = data_file_path(&dir, 0);
    let mut bytes = fs::read(&path).unwrap();
    let len_before = bytes.len() as u64;
    bytes[4] = 0x7F;
    fs::write(&path, &bytes).unwrap();

    assert!(matches!(
        Engine::open(options_for(&dir)),
        Err(CaskError::CorruptRecord(_))
    ));
    // Nothing was truncated away
    assert_eq!(fs::metadata(&path).unwrap().len(), len_before);
}

// =============================================================================
// Directory Validation Tests
// =============================================================================

#[test]
fn test_unparsable_data_file_name() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().join("db");
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("abc.data"), b"").unwrap();

    assert!(matches!(
        Engine::open(options_for(&dir)),
        Err(CaskError::DirectoryCorruption(_))
    ));
}

#[test]
fn test_unexpected_file_in_directory() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().join("db");
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("notes.txt"), b"hello").unwrap();

    assert!(matches!(
        Engine::open(options_for(&dir)),
        Err(CaskError::DirectoryCorruption(_))
    ));
}

#[test]
fn test_subdirectories_are_ignored() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().join("db");
    fs::create_dir_all(dir.join("nested")).unwrap();

    let engine = Engine::open(options_for(&dir)).unwrap();
    engine.put(b"k", b"v").unwrap();
    assert_eq!(&engine.get(b"k").unwrap()[..], b"v");
}
