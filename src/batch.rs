//! Write Batch Module
//!
//! Atomic multi-key commits built purely on log ordering.
//!
//! ## Commit Layout
//! ```text
//! ┌──────────────────┬──────────────────┬─────┬───────────────────────────┐
//! │ [seq|k1] Normal  │ [seq|k2] Deleted │ ... │ [seq|] TxnFinished        │
//! └──────────────────┴──────────────────┴─────┴───────────────────────────┘
//! ```
//! Replay only trusts a batch's records once its finish marker has been
//! seen, and the index is updated only after the marker is written.

use std::collections::{BTreeMap, HashMap};

use tracing::debug;

use crate::config::WriteBatchOptions;
use crate::data::{encode_txn_key, LogRecord, LogRecordPos, LogRecordType};
use crate::engine::Engine;
use crate::error::{CaskError, Result};

/// Pending mutations committed atomically through an [`Engine`]
///
/// Buffered writes are invisible to readers until `commit` returns.
pub struct WriteBatch<'a> {
    /// Caller-visible key → pending record (unprefixed key)
    pending_writes: BTreeMap<Vec<u8>, LogRecord>,
    engine: &'a Engine,
    options: WriteBatchOptions,
}

impl<'a> WriteBatch<'a> {
    pub(crate) fn new(engine: &'a Engine, options: WriteBatchOptions) -> Self {
        Self {
            pending_writes: BTreeMap::new(),
            engine,
            options,
        }
    }

    /// Buffer a put (replaces any pending write for `key`)
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        let record = LogRecord::normal(key.to_vec(), value.to_vec());
        record.check_lengths()?;
        self.pending_writes.insert(key.to_vec(), record);
        Ok(())
    }

    /// Buffer a delete
    ///
    /// A key the engine does not hold only loses its pending put, if any;
    /// no tombstone is written for it.
    pub fn delete(&mut self, key: &[u8]) -> Result<()> {
        if !self.engine.contains(key) {
            self.pending_writes.remove(key);
            return Ok(());
        }

        let record = LogRecord::deleted(key.to_vec());
        record.check_lengths()?;
        self.pending_writes.insert(key.to_vec(), record);
        Ok(())
    }

    /// Number of buffered writes
    pub fn pending_count(&self) -> usize {
        self.pending_writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending_writes.is_empty()
    }

    /// Drop every buffered write
    pub fn discard(&mut self) {
        self.pending_writes.clear();
    }

    /// Write the batch to the log and publish it to the index
    ///
    /// Steps:
    /// 1. Reject oversized batches
    /// 2. Take the commit lock exclusively and draw a transaction number
    /// 3. Append every record, then the finish marker
    /// 4. Optionally sync
    /// 5. Apply the batch to the index
    pub fn commit(&mut self) -> Result<()> {
        // Step 1: Nothing to do / too much to do
        if self.pending_writes.is_empty() {
            return Ok(());
        }
        if self.pending_writes.len() > self.options.max_batch_num {
            return Err(CaskError::BatchTooLarge {
                pending: self.pending_writes.len(),
                max: self.options.max_batch_num,
            });
        }

        // Step 2: Serialize against other batches, puts, and merge snapshots
        let _exclusive = self.engine.commit_lock.write();
        let seq_no = self.engine.next_txn_seq_no();

        // Step 3: Data records, then the durability boundary
        let mut positions: HashMap<&[u8], LogRecordPos> =
            HashMap::with_capacity(self.pending_writes.len());
        for (key, record) in &self.pending_writes {
            let prefixed = LogRecord {
                key: encode_txn_key(key, seq_no),
                value: record.value.clone(),
                rec_type: record.rec_type,
            };
            let pos = self.engine.append_log_record(&prefixed)?;
            positions.insert(key.as_slice(), pos);
        }

        let finished = LogRecord {
            key: encode_txn_key(&[], seq_no),
            value: Vec::new(),
            rec_type: LogRecordType::TxnFinished,
        };
        let finished_pos = self.engine.append_log_record(&finished)?;

        // Step 4: Optional sync
        if self.options.sync_on_commit {
            self.engine.sync()?;
        }

        // Step 5: Publish
        for (key, record) in &self.pending_writes {
            let pos = positions[key.as_slice()];
            match record.rec_type {
                LogRecordType::Normal => {
                    if let Some(old) = self.engine.index.put(key.clone(), pos) {
                        self.engine.add_stale_for(&old);
                    }
                }
                LogRecordType::Deleted => {
                    self.engine.add_stale(pos.size);
                    if let Some(old) = self.engine.index.delete(key) {
                        self.engine.add_stale_for(&old);
                    }
                }
                LogRecordType::TxnFinished => {}
            }
        }
        self.engine.add_stale(finished_pos.size);

        debug!(
            seq_no,
            writes = self.pending_writes.len(),
            "committed write batch"
        );
        self.pending_writes.clear();
        Ok(())
    }
}
