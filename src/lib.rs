//! # caskdb
//!
//! A log-structured, single-node embedded key-value store with:
//! - Append-only data files with CRC32-checked records
//! - An in-memory index rebuilt by replaying the log on open
//! - Atomic multi-key write batches (no separate WAL)
//! - Online merge that reclaims space from stale records
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │        put / get / delete / WriteBatch / merge / stat        │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                         Engine                               │
//! │        (commit lock, txn numbers, stale accounting)          │
//! └──────────┬─────────────────────────────────┬────────────────┘
//!            │                                 │
//!            ▼                                 ▼
//!   ┌─────────────────┐               ┌─────────────────┐
//!   │      Index      │               │   Data Files    │
//!   │ key → (id, off) │──────────────▶│ active + older  │
//!   │    (RwLock)     │               └────────┬────────┘
//!   └─────────────────┘                        │
//!                                              ▼
//!                                     ┌─────────────────┐
//!                                     │   I/O Backend   │
//!                                     │  (file / mmap)  │
//!                                     └─────────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use caskdb::{Engine, Options, WriteBatchOptions};
//!
//! let engine = Engine::open(Options::builder().dir_path("/tmp/caskdb").build())?;
//! engine.put(b"hello", b"world")?;
//! assert_eq!(&engine.get(b"hello")?[..], b"world");
//!
//! let mut batch = engine.create_write_batch(WriteBatchOptions::default());
//! batch.put(b"a", b"1")?;
//! batch.delete(b"hello")?;
//! batch.commit()?;
//! # Ok::<(), caskdb::CaskError>(())
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod data;
pub mod fio;
pub mod index;
pub mod engine;
pub mod batch;
pub mod merge;
pub mod util;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use batch::WriteBatch;
pub use config::{IndexType, IoType, Options, SyncStrategy, WriteBatchOptions};
pub use engine::{Engine, Stat};
pub use error::{CaskError, Result};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of caskdb
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
