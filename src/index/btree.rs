//! Ordered index

use std::collections::BTreeMap;

use parking_lot::RwLock;

use crate::data::LogRecordPos;

use super::Indexer;

/// BTreeMap-backed index; listings come back in key order
#[derive(Default)]
pub struct BTreeIndex {
    tree: RwLock<BTreeMap<Vec<u8>, LogRecordPos>>,
}

impl BTreeIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Indexer for BTreeIndex {
    fn put(&self, key: Vec<u8>, pos: LogRecordPos) -> Option<LogRecordPos> {
        self.tree.write().insert(key, pos)
    }

    fn get(&self, key: &[u8]) -> Option<LogRecordPos> {
        self.tree.read().get(key).copied()
    }

    fn delete(&self, key: &[u8]) -> Option<LogRecordPos> {
        self.tree.write().remove(key)
    }

    fn contains(&self, key: &[u8]) -> bool {
        self.tree.read().contains_key(key)
    }

    fn len(&self) -> usize {
        self.tree.read().len()
    }

    fn list_keys(&self) -> Vec<Vec<u8>> {
        self.tree.read().keys().cloned().collect()
    }

    fn entries(&self) -> Vec<(Vec<u8>, LogRecordPos)> {
        self.tree
            .read()
            .iter()
            .map(|(k, pos)| (k.clone(), *pos))
            .collect()
    }
}
