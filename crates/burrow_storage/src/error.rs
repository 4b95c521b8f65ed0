//! Error types for storage backends.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for backend operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur inside a storage backend.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Attempted to read beyond the end of the store.
    #[error("read beyond end of store: offset {offset}, len {len}, store is {size} bytes")]
    ReadPastEnd {
        /// Requested read offset.
        offset: u64,
        /// Requested read length.
        len: usize,
        /// Current store size.
        size: u64,
    },

    /// Exclusive creation was requested but the file already exists.
    ///
    /// This is a distinct variant rather than a plain `Io` error because the
    /// collection-open contract treats a lost creation race as a hard error
    /// that callers must be able to match on.
    #[error("file already exists: {path}")]
    AlreadyExists {
        /// The path that was to be created.
        path: PathBuf,
    },
}
