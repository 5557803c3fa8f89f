//! Index Module
//!
//! In-memory map from key to the position of its live record.
//!
//! ## Responsibilities
//! - One position per key: the most recent committed, non-deleted write
//! - Safe concurrent readers and writers (last writer wins per key)
//! - Full key / (key, position) listing for iteration and merge
//!
//! ## Data Structure Choice
//! Both implementations wrap a std map in a `parking_lot::RwLock` and own
//! their keys as `Vec<u8>`, so equality and hashing are over key bytes:
//! - `HashMap`: fastest point lookups, unordered iteration
//! - `BTree`: ordered iteration (sorted `list_keys`)

mod btree;
mod hashmap;

use crate::config::IndexType;
use crate::data::LogRecordPos;

pub use btree::BTreeIndex;
pub use hashmap::HashMapIndex;

/// Common interface of the index implementations
pub trait Indexer: Send + Sync {
    /// Point `key` at `pos`, returning the position it replaced
    fn put(&self, key: Vec<u8>, pos: LogRecordPos) -> Option<LogRecordPos>;

    /// Current position of `key`
    fn get(&self, key: &[u8]) -> Option<LogRecordPos>;

    /// Remove `key`, returning the position it had
    fn delete(&self, key: &[u8]) -> Option<LogRecordPos>;

    fn contains(&self, key: &[u8]) -> bool {
        self.get(key).is_some()
    }

    /// Number of live keys
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of every key
    fn list_keys(&self) -> Vec<Vec<u8>>;

    /// Snapshot of every (key, position) pair
    fn entries(&self) -> Vec<(Vec<u8>, LogRecordPos)>;
}

/// Build the index selected by `index_type`
pub fn new_indexer(index_type: IndexType) -> Box<dyn Indexer> {
    match index_type {
        IndexType::HashMap => Box::new(HashMapIndex::new()),
        IndexType::BTree => Box::new(BTreeIndex::new()),
    }
}
