//! Hash map index

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::data::LogRecordPos;

use super::Indexer;

/// Unordered index over owned key bytes
#[derive(Default)]
pub struct HashMapIndex {
    map: RwLock<HashMap<Vec<u8>, LogRecordPos>>,
}

impl HashMapIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Indexer for HashMapIndex {
    fn put(&self, key: Vec<u8>, pos: LogRecordPos) -> Option<LogRecordPos> {
        self.map.write().insert(key, pos)
    }

    fn get(&self, key: &[u8]) -> Option<LogRecordPos> {
        self.map.read().get(key).copied()
    }

    fn delete(&self, key: &[u8]) -> Option<LogRecordPos> {
        self.map.write().remove(key)
    }

    fn contains(&self, key: &[u8]) -> bool {
        self.map.read().contains_key(key)
    }

    fn len(&self) -> usize {
        self.map.read().len()
    }

    fn list_keys(&self) -> Vec<Vec<u8>> {
        self.map.read().keys().cloned().collect()
    }

    fn entries(&self) -> Vec<(Vec<u8>, LogRecordPos)> {
        self.map
            .read()
            .iter()
            .map(|(k, pos)| (k.clone(), *pos))
            .collect()
    }
}
