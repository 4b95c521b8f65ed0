//! Unordered hash collections.
//!
//! A hash collection is an independent on-disk map of byte-string key to
//! byte-string value. Each identifier is its own file; instances share
//! nothing with each other or with the [`crate::Environment`] - plugins use
//! them for state that needs no cross-collection consistency (caches, seen
//! lists).
//!
//! On disk the collection is an append-only record log: `set` and `delete`
//! append framed records, open replays them, and `close` compacts the file
//! down to the live entries. Concurrent writers to one collection are a
//! caller responsibility.

use crate::error::{StoreError, StoreResult};
use crate::frame::{encode_frame, put_bytes, FrameReader, PayloadCursor};
use crate::fsutil;
use crate::path::PathResolver;
use burrow_storage::{Backend, FileBackend, StorageError};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

/// Magic bytes of a hash collection frame.
const HASH_MAGIC: [u8; 4] = *b"BHSH";

const KIND_PUT: u8 = 1;
const KIND_DELETE: u8 = 2;

/// Handle to an unordered hash collection.
pub struct HashStore {
    path: PathBuf,
    backend: Mutex<FileBackend>,
    map: RwLock<HashMap<Vec<u8>, Vec<u8>>>,
    closed: AtomicBool,
}

impl HashStore {
    /// Opens the hash collection named `identifier`.
    ///
    /// An existing file is opened read-write and replayed; a missing one is
    /// created exclusively. See [`PathResolver`] for how `identifier` and
    /// `absolute` resolve to a path.
    ///
    /// # Errors
    ///
    /// Fails with [`StoreError::CollectionExists`] if exclusive creation
    /// lost a race - a concurrency assumption was violated, so this is
    /// surfaced rather than silently opening the other creator's file.
    pub fn open(resolver: &PathResolver, identifier: &str, absolute: bool) -> StoreResult<Self> {
        let path = resolver.resolve(identifier, absolute);

        let (backend, map) = if path.exists() {
            debug!(path = %path.display(), "opening existing hash collection");
            let mut backend = FileBackend::open(&path)?;
            let map = replay(&mut backend)?;
            (backend, map)
        } else {
            debug!(path = %path.display(), "creating empty hash collection");
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let backend = FileBackend::create_new(&path).map_err(|e| match e {
                StorageError::AlreadyExists { path } => StoreError::CollectionExists { path },
                other => StoreError::Storage(other),
            })?;
            (backend, HashMap::new())
        };

        Ok(Self {
            path,
            backend: Mutex::new(backend),
            map: RwLock::new(map),
            closed: AtomicBool::new(false),
        })
    }

    /// Returns the resolved data file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the value stored under `key`.
    pub fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        self.ensure_open()?;
        Ok(self.map.read().get(key).cloned())
    }

    /// Writes `value` under `key`.
    pub fn set(&self, key: impl AsRef<[u8]>, value: impl Into<Vec<u8>>) -> StoreResult<()> {
        self.ensure_open()?;
        let key = key.as_ref();
        let value = value.into();

        let mut payload = Vec::with_capacity(8 + key.len() + value.len());
        put_bytes(&mut payload, key);
        put_bytes(&mut payload, &value);
        let frame = encode_frame(HASH_MAGIC, KIND_PUT, &payload)?;

        let mut backend = self.backend.lock();
        backend.append(&frame)?;
        self.map.write().insert(key.to_vec(), value);
        Ok(())
    }

    /// Removes `key`; returns whether it was present.
    pub fn delete(&self, key: &[u8]) -> StoreResult<bool> {
        self.ensure_open()?;
        if !self.map.read().contains_key(key) {
            return Ok(false);
        }

        let mut payload = Vec::with_capacity(4 + key.len());
        put_bytes(&mut payload, key);
        let frame = encode_frame(HASH_MAGIC, KIND_DELETE, &payload)?;

        let mut backend = self.backend.lock();
        backend.append(&frame)?;
        self.map.write().remove(key);
        Ok(true)
    }

    /// Number of stored entries.
    pub fn len(&self) -> StoreResult<usize> {
        self.ensure_open()?;
        Ok(self.map.read().len())
    }

    /// Whether the collection holds no entries.
    pub fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Iterates every entry, in no particular order.
    ///
    /// The iterator walks a snapshot: it is finite, unaffected by later
    /// writes, and a fresh call restarts from the beginning.
    pub fn iter(&self) -> StoreResult<HashIter> {
        self.ensure_open()?;
        let pairs: Vec<(Vec<u8>, Vec<u8>)> = self
            .map
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Ok(HashIter {
            inner: pairs.into_iter(),
        })
    }

    /// Forces appended records to durable storage.
    pub fn flush(&self) -> StoreResult<()> {
        self.ensure_open()?;
        let mut backend = self.backend.lock();
        backend.flush()?;
        backend.sync()?;
        Ok(())
    }

    /// Compacts the record log down to the live entries and closes the
    /// handle. Idempotent.
    pub fn close(&self) -> StoreResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let _backend = self.backend.lock();
        let map = self.map.read();
        let mut bytes = Vec::new();
        for (key, value) in map.iter() {
            let mut payload = Vec::with_capacity(8 + key.len() + value.len());
            put_bytes(&mut payload, key);
            put_bytes(&mut payload, value);
            bytes.extend_from_slice(&encode_frame(HASH_MAGIC, KIND_PUT, &payload)?);
        }
        fsutil::atomic_write(&self.path, &bytes)
    }

    fn ensure_open(&self) -> StoreResult<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(StoreError::CollectionClosed)
        } else {
            Ok(())
        }
    }
}

impl std::fmt::Debug for HashStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HashStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl Drop for HashStore {
    fn drop(&mut self) {
        if !self.closed.load(Ordering::Acquire) {
            let mut backend = self.backend.lock();
            if let Err(e) = backend.flush().and_then(|()| backend.sync()) {
                debug!(path = %self.path.display(), error = %e, "flush on drop failed");
            }
        }
    }
}

/// Snapshot iterator over `(key, value)` pairs.
#[derive(Debug)]
pub struct HashIter {
    inner: std::vec::IntoIter<(Vec<u8>, Vec<u8>)>,
}

impl Iterator for HashIter {
    type Item = (Vec<u8>, Vec<u8>);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for HashIter {}

/// Rebuilds the in-memory map from the record log.
fn replay(backend: &mut FileBackend) -> StoreResult<HashMap<Vec<u8>, Vec<u8>>> {
    let mut map = HashMap::new();
    let mut torn_at = None;
    {
        let mut reader = FrameReader::new(&*backend, HASH_MAGIC)?;
        loop {
            match reader.next_frame()? {
                Some((_, KIND_PUT, payload)) => {
                    let mut cursor = PayloadCursor::new(&payload);
                    let key = cursor.take_bytes()?;
                    let value = cursor.take_bytes()?;
                    cursor.finish()?;
                    map.insert(key, value);
                }
                Some((_, KIND_DELETE, payload)) => {
                    let mut cursor = PayloadCursor::new(&payload);
                    let key = cursor.take_bytes()?;
                    cursor.finish()?;
                    map.remove(&key);
                }
                Some((_, kind, _)) => {
                    return Err(StoreError::corrupted(format!(
                        "unexpected record kind {kind} in hash collection"
                    )));
                }
                None => break,
            }
        }
        if reader.torn() {
            torn_at = Some(reader.pos());
        }
    }

    if let Some(pos) = torn_at {
        warn!(pos, "truncating torn tail of hash collection");
        backend.truncate(pos)?;
    }
    Ok(map)
}
