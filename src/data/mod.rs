//! Data Module
//!
//! On-disk record format and the data files that hold it.
//!
//! ## Responsibilities
//! - Encode/decode single records with a CRC32 checksum
//! - Positions (`file_id`, `offset`) stored by the index and hint files
//! - Append-only data files with a tracked write offset
//!
//! ## Directory Layout
//! ```text
//! {dir}/0.data  {dir}/1.data  ...  {dir}/N.data   (N = active)
//!       └─ record │ record │ record │ ...           (no gaps)
//! ```

pub mod data_file;
pub mod log_record;

pub use data_file::{
    data_file_path, DataFile, DATA_FILE_EXTENSION, HINT_FILE_NAME, MERGE_FINISHED_FILE_NAME,
};
pub use log_record::{
    encode_txn_key, parse_txn_key, LogRecord, LogRecordHeader, LogRecordPos, LogRecordType,
    ReadLogRecord, CRC_SIZE, LOG_RECORD_POS_SIZE, MAX_HEADER_SIZE, NON_TXN_SEQ_NO,
};
