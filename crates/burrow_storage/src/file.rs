//! File-backed byte store.

use crate::backend::Backend;
use crate::error::{StorageError, StorageResult};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// A persistent byte store over an OS file.
///
/// `open` attaches to an existing file (creating it when absent);
/// `create_new` demands exclusive creation and fails if the file is already
/// there - the primitive behind the collection-open contract, where a lost
/// creation race must surface as an error rather than silently becoming an
/// open of someone else's file.
///
/// # Durability
///
/// - `flush()` pushes buffered writes to the OS
/// - `sync()` calls `File::sync_all()`, so data and metadata reach the disk
///
/// # Thread safety
///
/// The file handle and cached size live behind one mutex, so interleaved
/// reads and appends from multiple threads stay consistent.
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    inner: Mutex<Inner>,
}

#[derive(Debug)]
struct Inner {
    file: File,
    size: u64,
}

impl FileBackend {
    /// Opens the file at `path`, creating it when absent.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be opened or created.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        Self::from_file(path, file)
    }

    /// Creates the file at `path` exclusively.
    ///
    /// # Errors
    ///
    /// Fails with [`StorageError::AlreadyExists`] if the file exists -
    /// including when a concurrent creator won the race.
    pub fn create_new(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|e| {
                if e.kind() == io::ErrorKind::AlreadyExists {
                    StorageError::AlreadyExists {
                        path: path.to_path_buf(),
                    }
                } else {
                    StorageError::Io(e)
                }
            })?;
        Self::from_file(path, file)
    }

    fn from_file(path: &Path, file: File) -> StorageResult<Self> {
        let size = file.metadata()?.len();
        Ok(Self {
            path: path.to_path_buf(),
            inner: Mutex::new(Inner { file, size }),
        })
    }

    /// Returns the path of the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Backend for FileBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let mut inner = self.inner.lock();
        let end = offset.saturating_add(len as u64);

        if offset > inner.size || end > inner.size {
            return Err(StorageError::ReadPastEnd {
                offset,
                len,
                size: inner.size,
            });
        }
        if len == 0 {
            return Ok(Vec::new());
        }

        inner.file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; len];
        inner.file.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let mut inner = self.inner.lock();
        if data.is_empty() {
            return Ok(inner.size);
        }

        let offset = inner.size;
        inner.file.seek(SeekFrom::End(0))?;
        inner.file.write_all(data)?;
        inner.size += data.len() as u64;
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.inner.lock().file.flush()?;
        Ok(())
    }

    fn sync(&mut self) -> StorageResult<()> {
        let inner = self.inner.lock();
        inner.file.sync_all()?;
        Ok(())
    }

    fn len(&self) -> StorageResult<u64> {
        Ok(self.inner.lock().size)
    }

    fn truncate(&mut self, new_len: u64) -> StorageResult<()> {
        let mut inner = self.inner.lock();
        if new_len > inner.size {
            return Err(StorageError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("cannot truncate {} bytes to {new_len}", inner.size),
            )));
        }
        inner.file.set_len(new_len)?;
        inner.size = new_len;
        Ok(())
    }
}
