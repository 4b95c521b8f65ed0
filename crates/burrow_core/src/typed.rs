//! Typed value accessors.
//!
//! Plugins mostly store structured state - poll archives, per-user settings,
//! cached lookups - not raw bytes. `TypedTree` and `TypedHash` wrap a
//! collection handle and encode values as canonical CBOR through `serde`.
//!
//! `get_or` covers the common plugin idiom of reading a value that may not
//! have been written yet:
//!
//! ```rust,ignore
//! let polls: TypedTree<Vec<Poll>> = TypedTree::new(registry.open_tree("polls", false)?);
//! let running = polls.get_or("running", Vec::new())?;
//! ```

use crate::error::{StoreError, StoreResult};
use crate::hash::HashStore;
use crate::tree::TreeStore;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;

fn encode<T: Serialize>(value: &T) -> StoreResult<Vec<u8>> {
    let mut bytes = Vec::new();
    ciborium::ser::into_writer(value, &mut bytes)
        .map_err(|e| StoreError::codec(e.to_string()))?;
    Ok(bytes)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StoreResult<T> {
    ciborium::de::from_reader(bytes).map_err(|e| StoreError::codec(e.to_string()))
}

/// A tree collection of CBOR-encoded values of one type.
pub struct TypedTree<T> {
    inner: TreeStore,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Serialize + DeserializeOwned> TypedTree<T> {
    /// Wraps a tree handle.
    #[must_use]
    pub fn new(inner: TreeStore) -> Self {
        Self {
            inner,
            _marker: PhantomData,
        }
    }

    /// Reads and decodes the value stored under `key`.
    pub fn get(&self, key: &str) -> StoreResult<Option<T>> {
        match self.inner.get(key)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Reads the value stored under `key`, or returns `default`.
    pub fn get_or(&self, key: &str, default: T) -> StoreResult<T> {
        Ok(self.get(key)?.unwrap_or(default))
    }

    /// Encodes and writes `value` under `key`.
    pub fn set(&self, key: &str, value: &T) -> StoreResult<()> {
        self.inner.set(key, encode(value)?)
    }

    /// Removes `key`; returns whether it was present.
    pub fn delete(&self, key: &str) -> StoreResult<bool> {
        self.inner.delete(key)
    }

    /// Returns the underlying byte-level handle.
    #[must_use]
    pub fn inner(&self) -> &TreeStore {
        &self.inner
    }

    /// Unwraps back into the byte-level handle.
    #[must_use]
    pub fn into_inner(self) -> TreeStore {
        self.inner
    }
}

impl<T> std::fmt::Debug for TypedTree<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypedTree").finish_non_exhaustive()
    }
}

/// A hash collection of CBOR-encoded values of one type.
pub struct TypedHash<T> {
    inner: HashStore,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Serialize + DeserializeOwned> TypedHash<T> {
    /// Wraps a hash handle.
    #[must_use]
    pub fn new(inner: HashStore) -> Self {
        Self {
            inner,
            _marker: PhantomData,
        }
    }

    /// Reads and decodes the value stored under `key`.
    pub fn get(&self, key: impl AsRef<[u8]>) -> StoreResult<Option<T>> {
        match self.inner.get(key.as_ref())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Reads the value stored under `key`, or returns `default`.
    pub fn get_or(&self, key: impl AsRef<[u8]>, default: T) -> StoreResult<T> {
        Ok(self.get(key)?.unwrap_or(default))
    }

    /// Encodes and writes `value` under `key`.
    pub fn set(&self, key: impl AsRef<[u8]>, value: &T) -> StoreResult<()> {
        self.inner.set(key, encode(value)?)
    }

    /// Removes `key`; returns whether it was present.
    pub fn delete(&self, key: impl AsRef<[u8]>) -> StoreResult<bool> {
        self.inner.delete(key.as_ref())
    }

    /// Returns the underlying byte-level handle.
    #[must_use]
    pub fn inner(&self) -> &HashStore {
        &self.inner
    }

    /// Unwraps back into the byte-level handle.
    #[must_use]
    pub fn into_inner(self) -> HashStore {
        self.inner
    }
}

impl<T> std::fmt::Debug for TypedHash<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypedHash").finish_non_exhaustive()
    }
}
