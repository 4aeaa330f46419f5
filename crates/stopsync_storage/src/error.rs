//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Attempted to read beyond the end of storage.
    #[error("read beyond end of storage: offset {offset}, len {len}, size {size}")]
    ReadPastEnd {
        /// The requested read offset.
        offset: u64,
        /// The requested read length.
        len: usize,
        /// The current storage size.
        size: u64,
    },

    /// A frame failed validation.
    #[error("corrupted frame at offset {offset}: {reason}")]
    Corrupted {
        /// Offset of the bad frame.
        offset: u64,
        /// What was wrong with it.
        reason: String,
    },

    /// Another process already holds the store.
    #[error("store is locked by another process: {0}")]
    Locked(String),

    /// Truncation target is past the end.
    #[error("cannot truncate to {requested} bytes, store holds {size}")]
    InvalidTruncate {
        /// Requested size.
        requested: u64,
        /// Actual size.
        size: u64,
    },
}

impl StorageError {
    /// Creates a corruption error.
    pub fn corrupted(offset: u64, reason: impl Into<String>) -> Self {
        Self::Corrupted {
            offset,
            reason: reason.into(),
        }
    }
}
