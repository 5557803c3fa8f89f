//! Error types for caskdb
//!
//! Provides a unified error type for all operations.

use thiserror::Error;

/// Result type alias using CaskError
pub type Result<T> = std::result::Result<T, CaskError>;

/// Unified error type for caskdb operations
#[derive(Debug, Error)]
pub enum CaskError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    /// Open, read, write, or sync failure at the I/O backend
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Operation not supported by the selected I/O backend
    #[error("Unsupported operation: {0}")]
    Unsupported(&'static str),

    // -------------------------------------------------------------------------
    // Log Errors
    // -------------------------------------------------------------------------
    /// Checksum mismatch or malformed record header
    #[error("Corrupt record: {0}")]
    CorruptRecord(String),

    /// Key or value does not fit the 32-bit length fields
    #[error("Record too large: {len} bytes")]
    RecordTooLarge { len: usize },

    // -------------------------------------------------------------------------
    // Engine Errors
    // -------------------------------------------------------------------------
    #[error("Key not found")]
    KeyNotFound,

    /// The index points at something the log does not back up
    #[error("Index and log diverged: {0}")]
    ConsistencyViolation(String),

    /// Unexpected file in the data directory
    #[error("Data directory corrupted: {0}")]
    DirectoryCorruption(String),

    /// Another engine instance holds the directory lock
    #[error("Database directory is in use by another engine")]
    DatabaseInUse,

    // -------------------------------------------------------------------------
    // Batch / Merge Errors
    // -------------------------------------------------------------------------
    #[error("Write batch too large: {pending} pending writes (max {max})")]
    BatchTooLarge { pending: usize, max: usize },

    #[error("Merge is already in progress")]
    MergeInProgress,

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Invalid options: {0}")]
    InvalidOptions(String),
}

impl CaskError {
    /// True for the expected "no such key" outcome
    ///
    /// Front-end layers map this to a normal not-found reply and every
    /// other variant to a server-side failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, CaskError::KeyNotFound)
    }
}
