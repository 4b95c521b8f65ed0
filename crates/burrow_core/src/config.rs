//! Environment configuration.

use crate::error::{StoreError, StoreResult};

/// Size of the log write buffer.
///
/// Appended records are staged here before reaching the active segment file.
pub const LOG_BUFFER_SIZE: usize = 32 * 1024;

/// Configuration for opening an [`crate::Environment`].
#[derive(Debug, Clone)]
pub struct EnvConfig {
    /// Maximum size of a single log segment before rotation.
    ///
    /// Must be at least `4 * LOG_BUFFER_SIZE`; checked by [`EnvConfig::validate`]
    /// when the environment opens.
    pub max_log_size: u64,

    /// Whether to sync the log on every commit (safer but slower).
    pub sync_on_commit: bool,
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            max_log_size: 64 * 1024 * 1024, // 64 MiB
            sync_on_commit: true,
        }
    }
}

impl EnvConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum log segment size.
    #[must_use]
    pub const fn max_log_size(mut self, size: u64) -> Self {
        self.max_log_size = size;
        self
    }

    /// Sets whether to sync the log on every commit.
    #[must_use]
    pub const fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Fails with [`StoreError::InvalidConfig`] if `max_log_size` is smaller
    /// than four times the log buffer.
    pub fn validate(&self) -> StoreResult<()> {
        let floor = 4 * LOG_BUFFER_SIZE as u64;
        if self.max_log_size < floor {
            return Err(StoreError::invalid_config(format!(
                "max_log_size {} is below the minimum of {floor} (4x the log buffer)",
                self.max_log_size
            )));
        }
        Ok(())
    }
}
