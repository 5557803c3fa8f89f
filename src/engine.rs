//! Engine Module
//!
//! The core storage engine that coordinates all components.
//!
//! ## Responsibilities
//! - Own the active data file, the older data files, and the index
//! - Rebuild the index on open by replaying the log (crash recovery)
//! - Append put/delete records and keep the index pointing at them
//! - Rotate the active file once it reaches the configured size
//! - Hand out transaction numbers to write batches

use std::collections::HashMap;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::path::Path;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};

use bytes::Bytes;
use fs2::FileExt;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::config::{IoType, Options, SyncStrategy};
use crate::data::{
    encode_txn_key, parse_txn_key, DataFile, LogRecord, LogRecordPos, LogRecordType,
    ReadLogRecord, DATA_FILE_EXTENSION, HINT_FILE_NAME, MERGE_FINISHED_FILE_NAME,
    NON_TXN_SEQ_NO,
};
use crate::error::{CaskError, Result};
use crate::index::{new_indexer, Indexer};
use crate::util;

/// Advisory lock held for the engine's lifetime
pub(crate) const LOCK_FILE_NAME: &str = "flock";

/// First transaction number handed out by a fresh engine
const INITIAL_TXN_SEQ_NO: u32 = 1;

/// The main storage engine
///
/// ## Concurrency Model
///
/// - **Appends**: `active_file` write lock is held across the size check,
///   rotation, and write, so exactly one thread ever rotates and all
///   appends are totally ordered by (file id, offset). Single-key writes
///   also update the index before releasing it, so racing writes to one
///   key leave the index agreeing with what replay rebuilds.
///
/// - **Reads** (get): read locks on `active_file` / `older_files`; data
///   files serve positional reads through `&self`.
///
/// - **Commit lock**: single-key put/delete hold it shared; batch commit
///   and the merge snapshot hold it exclusively. A batch's records and
///   finish marker never interleave with another batch, and no write has
///   an index update outstanding while merge picks its snapshot.
pub struct Engine {
    /// Engine configuration
    options: Options,

    /// The one data file accepting appends
    pub(crate) active_file: RwLock<DataFile>,

    /// Sealed data files, keyed by file id
    pub(crate) older_files: RwLock<HashMap<u32, DataFile>>,

    /// Key → position of the live record
    pub(crate) index: Box<dyn Indexer>,

    /// See "Commit lock" above
    pub(crate) commit_lock: RwLock<()>,

    /// Next transaction number (0 is reserved for non-batch writes)
    txn_seq_no: AtomicU32,

    /// Held for the duration of a merge
    pub(crate) merge_lock: Mutex<()>,

    /// Bytes occupied by records that are no longer live
    stale_size: AtomicU64,

    /// Bytes the last merge of this session subtracted from `stale_size`
    /// while its output still waits for adoption
    pub(crate) unadopted_reclaimed: AtomicU64,

    /// Bytes appended since the last sync (EveryNBytes strategy)
    bytes_since_sync: AtomicUsize,

    /// Keeps the directory lock alive; released on drop
    _lock_file: File,
}

/// Engine statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stat {
    /// Number of live keys
    pub key_num: usize,

    /// Number of data files (older + active)
    pub data_file_num: usize,

    /// Bytes a merge could reclaim
    pub reclaimable_size: u64,

    /// Size of the data directory on disk
    pub disk_size: u64,
}

impl fmt::Display for Stat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "keyNum:{}, dataFileNum:{}, reclaimableSize:{}, diskSize:{}",
            self.key_num, self.data_file_num, self.reclaimable_size, self.disk_size
        )
    }
}

impl Engine {
    /// Open or create an engine with the given options
    ///
    /// On startup:
    /// 1. Create the data directory and take its lock
    /// 2. Adopt a completed merge left by the previous run
    /// 3. Discover data files (highest id becomes active)
    /// 4. Load the hint file of the last adopted merge
    /// 5. Replay data files not covered by that merge
    /// 6. Switch every data file to the standard backend
    pub fn open(options: Options) -> Result<Self> {
        options.validate()?;
        let dir = options.dir_path.clone();

        // Step 1: Create data directory if it doesn't exist, then lock it
        fs::create_dir_all(&dir)?;
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(dir.join(LOCK_FILE_NAME))?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(CaskError::DatabaseInUse);
        }

        // Step 2: Finish an interrupted or pending merge
        crate::merge::load_merge_files(&dir)?;

        // Step 3: Open data files in ascending id order
        let file_ids = Self::load_data_file_ids(&dir)?;
        let (active_file, older_files) = Self::open_data_files(&dir, &file_ids, options.io_type)?;

        let engine = Self {
            index: new_indexer(options.index_type),
            options,
            active_file: RwLock::new(active_file),
            older_files: RwLock::new(older_files),
            commit_lock: RwLock::new(()),
            txn_seq_no: AtomicU32::new(INITIAL_TXN_SEQ_NO),
            merge_lock: Mutex::new(()),
            stale_size: AtomicU64::new(0),
            unadopted_reclaimed: AtomicU64::new(0),
            bytes_since_sync: AtomicUsize::new(0),
            _lock_file: lock_file,
        };

        // Step 4: Hint file fast path
        let non_merge_file_id = engine.load_index_from_hint_file()?;

        // Step 5: Replay the rest of the log
        engine.load_index_from_data_files(&file_ids, non_merge_file_id)?;

        // Step 6: Replay is over; from here on only the file backend is used
        engine.enter_steady_state()?;

        info!(
            dir = %engine.options.dir_path.display(),
            keys = engine.index.len(),
            data_files = file_ids.len().max(1),
            next_txn = engine.transaction_number(),
            "engine opened"
        );

        Ok(engine)
    }

    /// Open with a path (convenience method)
    ///
    /// Uses default options with the specified data directory
    pub fn open_path(path: &Path) -> Result<Self> {
        let options = Options {
            dir_path: path.to_path_buf(),
            ..Options::default()
        };
        Self::open(options)
    }

    // =========================================================================
    // Public API
    // =========================================================================

    /// Store `value` under `key`
    ///
    /// Returns the accepted pair.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<(Bytes, Bytes)> {
        let _shared = self.commit_lock.read();

        let record = LogRecord::normal(encode_txn_key(key, NON_TXN_SEQ_NO), value.to_vec());
        let (_, replaced) =
            self.append_log_record_then(&record, |pos| self.index.put(key.to_vec(), pos))?;

        if let Some(old) = replaced {
            self.add_stale_for(&old);
        }

        Ok((Bytes::copy_from_slice(key), Bytes::copy_from_slice(value)))
    }

    /// Get the value stored under `key`
    pub fn get(&self, key: &[u8]) -> Result<Bytes> {
        let pos = self.index.get(key).ok_or(CaskError::KeyNotFound)?;
        self.value_at(&pos)
    }

    /// Delete `key`, returning the value it had
    pub fn delete(&self, key: &[u8]) -> Result<Bytes> {
        let _shared = self.commit_lock.read();

        let old_pos = self.index.get(key).ok_or(CaskError::KeyNotFound)?;
        let old_value = self.value_at(&old_pos)?;

        let record = LogRecord::deleted(encode_txn_key(key, NON_TXN_SEQ_NO));
        let (pos, removed) = self.append_log_record_then(&record, |_| self.index.delete(key))?;

        // The tombstone itself is garbage as soon as it is written
        self.add_stale(pos.size);
        if let Some(removed) = removed {
            self.add_stale_for(&removed);
        }

        Ok(old_value)
    }

    /// Whether `key` currently has a live value
    pub fn contains(&self, key: &[u8]) -> bool {
        self.index.contains(key)
    }

    /// Every live key
    pub fn list_keys(&self) -> Vec<Bytes> {
        self.index.list_keys().into_iter().map(Bytes::from).collect()
    }

    /// Visit every live (key, value) pair until `f` returns false
    pub fn fold<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(Bytes, Bytes) -> bool,
    {
        for (key, pos) in self.index.entries() {
            let value = self.value_at(&pos)?;
            if !f(Bytes::from(key), value) {
                break;
            }
        }
        Ok(())
    }

    /// Force the active data file to disk
    pub fn sync(&self) -> Result<()> {
        self.active_file.read().sync()?;
        self.bytes_since_sync.store(0, Ordering::SeqCst);
        Ok(())
    }

    /// Close the engine gracefully
    ///
    /// Syncs the active file; dropping the engine releases the directory lock.
    pub fn close(&self) -> Result<()> {
        self.sync()
    }

    /// Engine statistics
    pub fn stat(&self) -> Result<Stat> {
        let data_file_num = self.older_files.read().len() + 1;
        Ok(Stat {
            key_num: self.index.len(),
            data_file_num,
            reclaimable_size: self.stale_size.load(Ordering::SeqCst),
            disk_size: util::dir_disk_size(&self.options.dir_path)?,
        })
    }

    /// Copy the whole data directory to `dest`
    ///
    /// The copy can be opened as an engine of its own.
    pub fn backup(&self, dest: impl AsRef<Path>) -> Result<()> {
        self.sync()?;
        util::copy_dir(&self.options.dir_path, dest.as_ref(), &[LOCK_FILE_NAME])?;
        info!(dest = %dest.as_ref().display(), "backup complete");
        Ok(())
    }

    /// Create a write batch committing through this engine
    pub fn create_write_batch(
        &self,
        options: crate::config::WriteBatchOptions,
    ) -> crate::batch::WriteBatch<'_> {
        crate::batch::WriteBatch::new(self, options)
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    /// Get the data directory path
    pub fn dir_path(&self) -> &Path {
        &self.options.dir_path
    }

    /// Get the options
    pub fn options(&self) -> &Options {
        &self.options
    }

    /// The transaction number the next batch commit will use
    pub fn transaction_number(&self) -> u32 {
        self.txn_seq_no.load(Ordering::SeqCst)
    }

    /// Id of the active data file
    pub fn active_file_id(&self) -> u32 {
        self.active_file.read().file_id()
    }

    // =========================================================================
    // Crate-internal Write Path
    // =========================================================================

    /// Append `record` to the active file, rotating first if it would overflow
    pub(crate) fn append_log_record(&self, record: &LogRecord) -> Result<LogRecordPos> {
        self.append_log_record_then(record, |_| ()).map(|(pos, ())| pos)
    }

    /// Append `record`, then run `publish` before any other append can land
    ///
    /// `publish` runs under the active file's write lock and must not touch
    /// the data files.
    pub(crate) fn append_log_record_then<T>(
        &self,
        record: &LogRecord,
        publish: impl FnOnce(LogRecordPos) -> T,
    ) -> Result<(LogRecordPos, T)> {
        let encoded = record.encode()?;
        let record_len = encoded.len() as u64;

        let mut active = self.active_file.write();

        // An empty file always takes the record, however large
        if active.write_off() > 0
            && active.write_off() + record_len > self.options.data_file_size
        {
            self.rotate_active_file(&mut active)?;
        }

        let offset = active.write_off();
        active.write(&encoded)?;

        let need_sync = match self.options.sync_strategy {
            SyncStrategy::EveryWrite => true,
            SyncStrategy::EveryNBytes { bytes } => {
                let pending = self
                    .bytes_since_sync
                    .fetch_add(encoded.len(), Ordering::SeqCst)
                    + encoded.len();
                pending >= bytes
            }
            SyncStrategy::OnRotate => false,
        };
        if need_sync {
            active.sync()?;
            self.bytes_since_sync.store(0, Ordering::SeqCst);
        }

        let pos = LogRecordPos::new(active.file_id(), offset, record_len);
        let published = publish(pos);
        Ok((pos, published))
    }

    /// Seal the active file and start `active_id + 1`
    ///
    /// Caller holds the `active_file` write lock.
    pub(crate) fn rotate_active_file(&self, active: &mut DataFile) -> Result<()> {
        active.sync()?;
        self.bytes_since_sync.store(0, Ordering::SeqCst);

        let new_file = DataFile::new(
            &self.options.dir_path,
            active.file_id() + 1,
            IoType::StandardFile,
        )?;
        let sealed = std::mem::replace(active, new_file);
        debug!(
            sealed = sealed.file_id(),
            active = active.file_id(),
            "rotated active data file"
        );

        self.older_files.write().insert(sealed.file_id(), sealed);
        Ok(())
    }

    /// Hand out the next transaction number
    pub(crate) fn next_txn_seq_no(&self) -> u32 {
        self.txn_seq_no.fetch_add(1, Ordering::SeqCst)
    }

    pub(crate) fn add_stale(&self, bytes: u64) {
        self.stale_size.fetch_add(bytes, Ordering::SeqCst);
    }

    /// Subtract up to `bytes`, returning how much was actually subtracted
    pub(crate) fn sub_stale(&self, bytes: u64) -> u64 {
        let prev = self
            .stale_size
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |cur| {
                Some(cur.saturating_sub(bytes))
            })
            .unwrap_or_else(|cur| cur);
        prev.min(bytes)
    }

    /// Count the record at `pos` as garbage
    ///
    /// Only fails if the size has to be read back from disk; the write that
    /// superseded the record already succeeded, so the failure is logged.
    pub(crate) fn add_stale_for(&self, pos: &LogRecordPos) {
        match self.record_size(pos) {
            Ok(size) => self.add_stale(size),
            Err(e) => error!(
                file_id = pos.file_id,
                offset = pos.offset,
                error = %e,
                "cannot size superseded record"
            ),
        }
    }

    // =========================================================================
    // Crate-internal Read Path
    // =========================================================================

    /// Read whatever record sits at `offset` of data file `file_id`
    pub(crate) fn read_record_from(
        &self,
        file_id: u32,
        offset: u64,
    ) -> Result<Option<ReadLogRecord>> {
        let active = self.active_file.read();
        if active.file_id() == file_id {
            return active.read_log_record(offset);
        }

        let older = self.older_files.read();
        match older.get(&file_id) {
            Some(data_file) => data_file.read_log_record(offset),
            None => Err(CaskError::ConsistencyViolation(format!(
                "data file {} is not open",
                file_id
            ))),
        }
    }

    /// Value of the Normal record the index points at
    fn value_at(&self, pos: &LogRecordPos) -> Result<Bytes> {
        match self.read_record_from(pos.file_id, pos.offset)? {
            Some(read) if read.record.rec_type == LogRecordType::Normal => {
                Ok(Bytes::from(read.record.value))
            }
            Some(read) => {
                error!(
                    file_id = pos.file_id,
                    offset = pos.offset,
                    rec_type = ?read.record.rec_type,
                    "index points at a non-normal record"
                );
                Err(CaskError::ConsistencyViolation(format!(
                    "record at file {} offset {} is {:?}, expected Normal",
                    pos.file_id, pos.offset, read.record.rec_type
                )))
            }
            None => {
                error!(
                    file_id = pos.file_id,
                    offset = pos.offset,
                    "index points past the end of the log"
                );
                Err(CaskError::ConsistencyViolation(format!(
                    "no record at file {} offset {}",
                    pos.file_id, pos.offset
                )))
            }
        }
    }

    /// Encoded size of the record at `pos` (reads its header if unknown)
    fn record_size(&self, pos: &LogRecordPos) -> Result<u64> {
        if pos.size > 0 {
            return Ok(pos.size);
        }

        let active = self.active_file.read();
        if active.file_id() == pos.file_id {
            return active.record_size_at(pos.offset);
        }

        let older = self.older_files.read();
        match older.get(&pos.file_id) {
            Some(data_file) => data_file.record_size_at(pos.offset),
            None => Err(CaskError::ConsistencyViolation(format!(
                "data file {} is not open",
                pos.file_id
            ))),
        }
    }

    // =========================================================================
    // Startup
    // =========================================================================

    /// Discover data file ids in `dir`, sorted ascending
    ///
    /// "42.data" → 42. The lock, hint, and merge marker files are skipped;
    /// anything else is a corrupted directory.
    fn load_data_file_ids(dir: &Path) -> Result<Vec<u32>> {
        let mut file_ids = Vec::new();

        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }

            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name == LOCK_FILE_NAME || name == HINT_FILE_NAME || name == MERGE_FINISHED_FILE_NAME
            {
                continue;
            }

            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(DATA_FILE_EXTENSION) {
                return Err(CaskError::DirectoryCorruption(format!(
                    "unexpected file in data directory: {}",
                    name
                )));
            }

            let id = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<u32>().ok())
                .ok_or_else(|| {
                    CaskError::DirectoryCorruption(format!("unparsable data file name: {}", name))
                })?;
            file_ids.push(id);
        }

        file_ids.sort_unstable();
        Ok(file_ids)
    }

    /// Open the discovered files; the highest id becomes the active file
    fn open_data_files(
        dir: &Path,
        file_ids: &[u32],
        io_type: IoType,
    ) -> Result<(DataFile, HashMap<u32, DataFile>)> {
        let Some((&active_id, older_ids)) = file_ids.split_last() else {
            // Fresh directory: nothing to replay, start writable
            return Ok((DataFile::new(dir, 0, IoType::StandardFile)?, HashMap::new()));
        };

        let mut older_files = HashMap::with_capacity(older_ids.len());
        for &id in older_ids {
            older_files.insert(id, DataFile::new(dir, id, io_type)?);
        }
        let active_file = DataFile::new(dir, active_id, io_type)?;

        Ok((active_file, older_files))
    }

    /// Load `key -> position` entries written by the last adopted merge
    ///
    /// Returns the first file id the merge did not cover, if a merge was
    /// adopted.
    fn load_index_from_hint_file(&self) -> Result<Option<u32>> {
        let dir = &self.options.dir_path;
        if !dir.join(MERGE_FINISHED_FILE_NAME).is_file() {
            return Ok(None);
        }

        let non_merge_file_id = DataFile::merge_finished_file(dir)?.read_merge_finished()?;

        if dir.join(HINT_FILE_NAME).is_file() {
            let hint_file = DataFile::hint_file(dir)?;
            let mut offset = 0;
            let mut loaded = 0usize;
            while let Some(ReadLogRecord { record, size }) = hint_file.read_log_record(offset)? {
                let pos = LogRecordPos::decode(&record.value)?;
                self.index.put(record.key, pos);
                offset += size;
                loaded += 1;
            }
            debug!(loaded, non_merge_file_id, "loaded hint file");
        }

        Ok(Some(non_merge_file_id))
    }

    /// Replay data files to rebuild the index
    ///
    /// Files below `non_merge_file_id` are already covered by the hint file.
    /// Batch records are held back until their finish marker shows up; a
    /// batch without one never reaches the index.
    fn load_index_from_data_files(
        &self,
        file_ids: &[u32],
        non_merge_file_id: Option<u32>,
    ) -> Result<()> {
        let mut pending_txns: HashMap<u32, Vec<(Vec<u8>, LogRecordType, LogRecordPos)>> =
            HashMap::new();
        let mut max_seq_no = NON_TXN_SEQ_NO;
        let active_id = self.active_file_id();

        for &file_id in file_ids {
            if non_merge_file_id.is_some_and(|nm| file_id < nm) {
                continue;
            }

            let mut offset = 0;
            loop {
                // Sealed files were synced on rotation; only the active one
                // can end in a torn append
                let next = if file_id == active_id {
                    self.active_file
                        .read()
                        .read_tail_log_record(offset, self.options.data_file_size)?
                } else {
                    self.read_record_from(file_id, offset)?
                };
                let Some(ReadLogRecord { record, size }) = next else {
                    break;
                };

                let pos = LogRecordPos::new(file_id, offset, size);
                let (real_key, seq_no) = parse_txn_key(&record.key)?;

                if seq_no == NON_TXN_SEQ_NO {
                    self.replay_record(real_key, record.rec_type, pos);
                } else if record.rec_type == LogRecordType::TxnFinished {
                    if let Some(records) = pending_txns.remove(&seq_no) {
                        for (key, rec_type, pos) in records {
                            self.replay_record(key, rec_type, pos);
                        }
                    }
                    // The marker itself is never live
                    self.add_stale(size);
                } else {
                    pending_txns
                        .entry(seq_no)
                        .or_default()
                        .push((real_key, record.rec_type, pos));
                }

                max_seq_no = max_seq_no.max(seq_no);
                offset += size;
            }

            debug!(file_id, end_offset = offset, "replayed data file");
            if file_id == active_id {
                self.active_file.read().set_write_off(offset);
            }
        }

        if !pending_txns.is_empty() {
            warn!(
                count = pending_txns.len(),
                "discarded write batches without a finish marker"
            );
        }

        self.txn_seq_no.store(max_seq_no + 1, Ordering::SeqCst);
        Ok(())
    }

    /// Apply one replayed record to the index
    fn replay_record(&self, key: Vec<u8>, rec_type: LogRecordType, pos: LogRecordPos) {
        match rec_type {
            LogRecordType::Normal => {
                if let Some(old) = self.index.put(key, pos) {
                    self.add_stale_for(&old);
                }
            }
            LogRecordType::Deleted => {
                self.add_stale(pos.size);
                if let Some(old) = self.index.delete(&key) {
                    self.add_stale_for(&old);
                }
            }
            LogRecordType::TxnFinished => {}
        }
    }

    /// One-time transition out of replay
    ///
    /// Drops a torn tail from the active file, then serves every data file
    /// through the standard backend for the rest of the engine's life.
    fn enter_steady_state(&self) -> Result<()> {
        let mut active = self.active_file.write();
        let file_size = active.file_size()?;
        let write_off = active.write_off();
        if file_size > write_off {
            warn!(
                file_id = active.file_id(),
                file_size,
                write_off,
                "truncating torn tail of active data file"
            );
            active.truncate(write_off)?;
        }

        if self.options.io_type == IoType::MemoryMap {
            active.set_io_manager(IoType::StandardFile)?;
            for data_file in self.older_files.write().values_mut() {
                data_file.set_io_manager(IoType::StandardFile)?;
            }
        }

        Ok(())
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Err(e) = self.active_file.read().sync() {
            error!(error = %e, "failed to sync active data file on close");
        }
    }
}
