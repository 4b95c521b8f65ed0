//! Volatile byte store for tests.

use crate::backend::Backend;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::io;

/// An in-memory byte store.
///
/// Holds everything in a `Vec<u8>`; nothing survives the process. Used by
/// unit tests and for simulating crash-recovery scenarios, where a test can
/// seed a store with a hand-built (or deliberately damaged) byte image.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    bytes: RwLock<Vec<u8>>,
}

impl MemoryBackend {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store seeded with `bytes`.
    ///
    /// Lets recovery tests start from a prepared byte image.
    #[must_use]
    pub fn seeded(bytes: Vec<u8>) -> Self {
        Self {
            bytes: RwLock::new(bytes),
        }
    }

    /// Returns a copy of the full contents.
    #[must_use]
    pub fn snapshot(&self) -> Vec<u8> {
        self.bytes.read().clone()
    }
}

impl Backend for MemoryBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let bytes = self.bytes.read();
        let size = bytes.len() as u64;
        let start = offset as usize;
        let end = start.saturating_add(len);

        if offset > size || end > bytes.len() {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }
        Ok(bytes[start..end].to_vec())
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let mut bytes = self.bytes.write();
        let offset = bytes.len() as u64;
        bytes.extend_from_slice(data);
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn sync(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn len(&self) -> StorageResult<u64> {
        Ok(self.bytes.read().len() as u64)
    }

    fn truncate(&mut self, new_len: u64) -> StorageResult<()> {
        let mut bytes = self.bytes.write();
        if new_len > bytes.len() as u64 {
            return Err(StorageError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("cannot truncate {} bytes to {new_len}", bytes.len()),
            )));
        }
        bytes.truncate(new_len as usize);
        Ok(())
    }
}
