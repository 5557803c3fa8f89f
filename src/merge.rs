//! Merge Module
//!
//! Online compaction: rewrite live records into fresh data files plus a
//! hint file, and retire the files they came from.
//!
//! ## Protocol
//! ```text
//! merge()                                 next open()
//! ───────                                 ───────────
//! rotate active (N → N+1)                 {dir}_Merge/_MergeFinished?
//! scan files < N+1, keep live records       no  → discard {dir}_Merge
//!   → {dir}_Merge/0.data, 1.data, ...       yes → delete {dir}/id < N+1
//!   → {dir}_Merge/_Hint                           copy {dir}_Merge/* → {dir}
//! write {dir}_Merge/_MergeFinished(N+1)           remove {dir}_Merge
//! ```
//! The completion marker is the only signal that the output may be
//! adopted, so a merge interrupted at any point is either redone or
//! discarded, never half-applied.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;

use tracing::{debug, info, warn};

use crate::config::{IoType, Options, SyncStrategy};
use crate::data::{
    encode_txn_key, parse_txn_key, DataFile, LogRecordPos, LogRecordType, ReadLogRecord,
    DATA_FILE_EXTENSION, MERGE_FINISHED_FILE_NAME, NON_TXN_SEQ_NO,
};
use crate::engine::{Engine, LOCK_FILE_NAME};
use crate::error::{CaskError, Result};
use crate::util;

/// Suffix of the merge output directory: `{dir}_Merge`
const MERGE_DIR_SUFFIX: &str = "_Merge";

/// Sibling directory receiving merge output for `dir`
///
/// "/var/db/data" → "/var/db/data_Merge"
pub(crate) fn merge_path(dir: &Path) -> PathBuf {
    let name = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let parent = dir.parent().unwrap_or_else(|| Path::new(""));
    parent.join(format!("{}{}", name, MERGE_DIR_SUFFIX))
}

impl Engine {
    /// Compact the data files if enough of them is garbage
    ///
    /// No-op while `reclaimable / disk_size` is below the configured
    /// `reclaimable_ratio`. The rewritten files are adopted the next time
    /// the engine opens; until then reads keep using the original files.
    pub fn merge(&self) -> Result<()> {
        let _merging = self
            .merge_lock
            .try_lock()
            .ok_or(CaskError::MergeInProgress)?;

        let stat = self.stat()?;
        if stat.disk_size == 0
            || (stat.reclaimable_size as f64 / stat.disk_size as f64)
                < self.options().reclaimable_ratio as f64
        {
            debug!(
                reclaimable = stat.reclaimable_size,
                disk_size = stat.disk_size,
                "merge skipped: below reclaimable ratio"
            );
            return Ok(());
        }

        // Step 1: Seal the active file; everything below it is the snapshot
        let (merge_file_ids, non_merge_file_id) = self.rotate_merge_files()?;

        // Step 2: Fresh output directory with its own engine and hint file
        let dir = self.dir_path().to_path_buf();
        let merge_dir = merge_path(&dir);
        if merge_dir.is_dir() {
            fs::remove_dir_all(&merge_dir)?;
            // That output is gone, so the garbage it covered counts again
            self.add_stale(self.unadopted_reclaimed.swap(0, Ordering::SeqCst));
        }
        fs::create_dir_all(&merge_dir)?;

        let merge_engine = Engine::open(Options {
            dir_path: merge_dir.clone(),
            sync_strategy: SyncStrategy::OnRotate,
            io_type: IoType::StandardFile,
            ..self.options().clone()
        })?;
        let hint_file = DataFile::hint_file(&merge_dir)?;

        // Step 3/4: Copy every record the index still points at
        let mut scanned_bytes = 0u64;
        let mut live_bytes = 0u64;
        for &file_id in &merge_file_ids {
            let data_file = DataFile::new(&dir, file_id, IoType::StandardFile)?;
            let mut offset = 0;

            while let Some(ReadLogRecord { mut record, size }) = data_file.read_log_record(offset)?
            {
                let (real_key, _) = parse_txn_key(&record.key)?;
                let here = LogRecordPos::new(file_id, offset, size);

                let is_live = self
                    .index
                    .get(&real_key)
                    .is_some_and(|pos| pos.same_location(&here));
                if is_live {
                    record.key = encode_txn_key(&real_key, NON_TXN_SEQ_NO);
                    record.rec_type = LogRecordType::Normal;
                    let new_pos = merge_engine.append_log_record(&record)?;
                    hint_file.write_hint_record(real_key, &new_pos)?;
                    live_bytes += size;
                }

                scanned_bytes += size;
                offset += size;
            }
        }

        // Step 5: Make the output durable, then mark it complete
        merge_engine.sync()?;
        hint_file.sync()?;
        drop(merge_engine);

        let finished_file = DataFile::merge_finished_file(&merge_dir)?;
        finished_file.write_merge_finished(non_merge_file_id)?;
        finished_file.sync()?;

        // Step 6: Everything not copied is reclaimed once the output is adopted
        let reclaimed = scanned_bytes.saturating_sub(live_bytes);
        let subtracted = self.sub_stale(reclaimed);
        self.unadopted_reclaimed.store(subtracted, Ordering::SeqCst);

        info!(
            files = merge_file_ids.len(),
            non_merge_file_id,
            live_bytes,
            reclaimed,
            "merge complete, output adopted on next open"
        );

        Ok(())
    }

    /// Rotate the active file under the exclusive commit lock
    ///
    /// Returns the sealed file ids to merge (ascending) and the id of the
    /// new active file, the first one the merge does not cover.
    fn rotate_merge_files(&self) -> Result<(Vec<u32>, u32)> {
        let _exclusive = self.commit_lock.write();

        let non_merge_file_id = {
            let mut active = self.active_file.write();
            self.rotate_active_file(&mut active)?;
            active.file_id()
        };

        let mut merge_file_ids: Vec<u32> = self.older_files.read().keys().copied().collect();
        merge_file_ids.sort_unstable();

        Ok((merge_file_ids, non_merge_file_id))
    }
}

/// Adopt the output of a completed merge into `dir`
///
/// Runs at open, before data files are discovered. Safe to repeat: the
/// merge directory is removed only after everything has been copied.
pub(crate) fn load_merge_files(dir: &Path) -> Result<()> {
    let merge_dir = merge_path(dir);
    if !merge_dir.is_dir() {
        return Ok(());
    }

    let finished_path = merge_dir.join(MERGE_FINISHED_FILE_NAME);
    if !finished_path.is_file() {
        warn!(merge_dir = %merge_dir.display(), "discarding unfinished merge output");
        fs::remove_dir_all(&merge_dir)?;
        return Ok(());
    }

    let non_merge_file_id = DataFile::merge_finished_file(&merge_dir)?.read_merge_finished()?;

    // Step 1: Retire every data file the merge rewrote
    let mut removed = 0usize;
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some(DATA_FILE_EXTENSION) {
            continue;
        }
        let Some(id) = path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(|s| s.parse::<u32>().ok())
        else {
            continue;
        };
        if id < non_merge_file_id {
            fs::remove_file(&path)?;
            removed += 1;
        }
    }

    // Step 2: Bring in the rewritten files and hint, marker last
    util::copy_dir(&merge_dir, dir, &[MERGE_FINISHED_FILE_NAME, LOCK_FILE_NAME])?;
    fs::copy(&finished_path, dir.join(MERGE_FINISHED_FILE_NAME))?;

    // Step 3: Only now is the merge output disposable
    fs::remove_dir_all(&merge_dir)?;

    info!(
        non_merge_file_id,
        removed,
        "adopted merge output"
    );
    Ok(())
}
