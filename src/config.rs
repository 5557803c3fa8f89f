//! Configuration for caskdb
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{CaskError, Result};

/// Default maximum size of a single data file (100 MiB)
pub const DEFAULT_DATA_FILE_SIZE: u64 = 100 * 1024 * 1024;

/// Default stale/disk ratio at which `merge()` does any work
pub const DEFAULT_RECLAIMABLE_RATIO: f32 = 0.5;

/// Main configuration for an engine instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Options {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Directory holding the data files
    /// Internal structure:
    ///   {dir_path}/
    ///     ├── 0.data, 1.data, ...   (segments, highest id is active)
    ///     ├── _Hint                 (present after an adopted merge)
    ///     ├── _MergeFinished        (present after an adopted merge)
    ///     └── flock                 (directory lock)
    ///   {dir_path}_Merge/           (merge output, adopted on next open)
    pub dir_path: PathBuf,

    /// Rotate the active data file once an append would exceed this size
    pub data_file_size: u64,

    // -------------------------------------------------------------------------
    // Durability Configuration
    // -------------------------------------------------------------------------
    /// Sync strategy: how often to fsync the active data file
    pub sync_strategy: SyncStrategy,

    // -------------------------------------------------------------------------
    // Startup / Index Configuration
    // -------------------------------------------------------------------------
    /// Backend used while replaying data files at open
    pub io_type: IoType,

    /// In-memory index implementation
    pub index_type: IndexType,

    // -------------------------------------------------------------------------
    // Merge Configuration
    // -------------------------------------------------------------------------
    /// Minimum `reclaimable / disk_size` ratio for `merge()` to run
    pub reclaimable_ratio: f32,
}

/// Data file sync strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncStrategy {
    /// fsync after every write (safest, slowest)
    EveryWrite,

    /// fsync once this many bytes were appended since the last sync
    EveryNBytes { bytes: usize },

    /// fsync only on rotation, explicit `sync()`, and close
    OnRotate,
}

/// I/O backend used to replay data files during open
///
/// After replay every data file is served by the standard file backend;
/// the memory-mapped backend is read-only and never sees a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IoType {
    /// Buffered file I/O
    StandardFile,

    /// Read-only memory map, startup only
    MemoryMap,
}

/// In-memory index implementation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexType {
    /// Hash map (no key order)
    HashMap,

    /// Ordered map (keys iterate sorted)
    BTree,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            dir_path: PathBuf::from("./caskdb_data"),
            data_file_size: DEFAULT_DATA_FILE_SIZE,
            sync_strategy: SyncStrategy::OnRotate,
            io_type: IoType::StandardFile,
            index_type: IndexType::HashMap,
            reclaimable_ratio: DEFAULT_RECLAIMABLE_RATIO,
        }
    }
}

impl Options {
    /// Create a new options builder
    pub fn builder() -> OptionsBuilder {
        OptionsBuilder::default()
    }

    /// Reject options the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.dir_path.as_os_str().is_empty() {
            return Err(CaskError::InvalidOptions(
                "dir_path must not be empty".to_string(),
            ));
        }

        if self.data_file_size == 0 {
            return Err(CaskError::InvalidOptions(
                "data_file_size must be greater than zero".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.reclaimable_ratio) {
            return Err(CaskError::InvalidOptions(format!(
                "reclaimable_ratio must be within [0, 1], got {}",
                self.reclaimable_ratio
            )));
        }

        if let SyncStrategy::EveryNBytes { bytes: 0 } = self.sync_strategy {
            return Err(CaskError::InvalidOptions(
                "EveryNBytes sync threshold must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}

/// Builder for Options
#[derive(Default)]
pub struct OptionsBuilder {
    options: Options,
}

impl OptionsBuilder {
    /// Set the data directory
    pub fn dir_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.options.dir_path = path.into();
        self
    }

    /// Set the per-file size limit (in bytes)
    pub fn data_file_size(mut self, size: u64) -> Self {
        self.options.data_file_size = size;
        self
    }

    /// Set the sync strategy
    pub fn sync_strategy(mut self, strategy: SyncStrategy) -> Self {
        self.options.sync_strategy = strategy;
        self
    }

    /// Set the startup I/O backend
    pub fn io_type(mut self, io_type: IoType) -> Self {
        self.options.io_type = io_type;
        self
    }

    /// Set the index implementation
    pub fn index_type(mut self, index_type: IndexType) -> Self {
        self.options.index_type = index_type;
        self
    }

    /// Set the merge threshold ratio
    pub fn reclaimable_ratio(mut self, ratio: f32) -> Self {
        self.options.reclaimable_ratio = ratio;
        self
    }

    pub fn build(self) -> Options {
        self.options
    }
}

/// Options for a single write batch
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WriteBatchOptions {
    /// Maximum number of pending writes a batch may commit
    pub max_batch_num: usize,

    /// Sync the active data file once the batch is committed
    pub sync_on_commit: bool,
}

impl Default for WriteBatchOptions {
    fn default() -> Self {
        Self {
            max_batch_num: 1000,
            sync_on_commit: false,
        }
    }
}
