//! Error types for the burrow core.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for core operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in burrow core operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] burrow_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Exclusive creation of a collection file lost a race.
    ///
    /// The file unexpectedly existed when exclusive creation was requested.
    /// This is a hard error, never silently converted to opening the
    /// existing file.
    #[error("collection file already exists: {path}")]
    CollectionExists {
        /// The path that was to be created.
        path: PathBuf,
    },

    /// The on-disk format version is not supported by this build.
    #[error("unsupported on-disk format version {found} (this build supports {supported})")]
    UnsupportedVersion {
        /// The version found on disk.
        found: u16,
        /// The version this build supports.
        supported: u16,
    },

    /// On-disk state is corrupted.
    #[error("corrupted state: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// A complete record failed its checksum.
    #[error("checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Stored checksum.
        expected: u32,
        /// Computed checksum.
        actual: u32,
    },

    /// Environment configuration rejected at open time.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the invalid setting.
        message: String,
    },

    /// Another process holds the environment lock.
    #[error("environment locked: another process has exclusive access")]
    EnvironmentLocked,

    /// The environment has been shut down.
    #[error("environment is closed")]
    EnvironmentClosed,

    /// The collection handle has been closed.
    #[error("collection is closed")]
    CollectionClosed,

    /// Operation not permitted in the current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },

    /// Encoding or decoding a typed value failed.
    #[error("codec error: {message}")]
    Codec {
        /// Description of the failure.
        message: String,
    },
}

impl StoreError {
    /// Creates a corrupted-state error.
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted {
            message: message.into(),
        }
    }

    /// Creates an invalid-configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Creates an invalid-operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates a codec error.
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec {
            message: message.into(),
        }
    }

    /// Whether this error is fatal at environment startup.
    ///
    /// Fatal errors abort the open with no retry: an unsupported on-disk
    /// version, corruption of a complete record, or another process holding
    /// the environment. Anything else gets exactly one retry with a reduced
    /// option set.
    #[must_use]
    pub fn is_fatal_startup(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedVersion { .. }
                | Self::Corrupted { .. }
                | Self::ChecksumMismatch { .. }
                | Self::EnvironmentLocked
        )
    }
}
