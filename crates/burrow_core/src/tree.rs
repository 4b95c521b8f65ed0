//! Ordered tree collections.
//!
//! A tree collection is an on-disk map of string key to byte-string value,
//! ordered by a [`KeyFold`] strategy (case-insensitive by default). Every
//! tree is opened under the shared [`Environment`]: writes reach the
//! environment's log before they are acknowledged, and the in-memory tree is
//! persisted to its data file at checkpoint and close time.
//!
//! Keys whose folded forms are equal address one slot: `set("Alice", ..)`
//! followed by `set("ALICE", ..)` leaves a single entry, spelled the way the
//! most recent writer spelled it.

use crate::env::Environment;
use crate::error::{StoreError, StoreResult};
use crate::fold::KeyFold;
use crate::frame::{encode_frame, put_bytes, put_u64, FrameReader, PayloadCursor};
use crate::fsutil;
use crate::txn::TreeOp;
use crate::types::Sequence;
use burrow_storage::{Backend, FileBackend, StorageError};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::ops::{Bound, RangeBounds};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Magic bytes of a tree snapshot frame.
pub(crate) const TREE_MAGIC: [u8; 4] = *b"BTRE";

const KIND_HEADER: u8 = 1;
const KIND_ENTRY: u8 = 2;

/// One stored entry: the caller's key spelling plus the value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TreeEntry {
    pub key: String,
    pub value: Vec<u8>,
}

/// State shared between a tree handle, its environment, and transactions.
#[derive(Debug)]
pub(crate) struct TreeShared {
    /// Resolved data file path.
    pub path: PathBuf,
    /// Path as recorded in log records.
    pub path_str: String,
    /// Ordering strategy, fixed at open time.
    pub fold: KeyFold,
    /// Folded key -> entry.
    pub map: RwLock<BTreeMap<String, TreeEntry>>,
    /// Whether the map has changes not yet in the data file.
    dirty: AtomicBool,
    closed: AtomicBool,
}

impl TreeShared {
    pub(crate) fn new(path: PathBuf, fold: KeyFold, map: BTreeMap<String, TreeEntry>) -> Self {
        let path_str = path.display().to_string();
        Self {
            path,
            path_str,
            fold,
            map: RwLock::new(map),
            dirty: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    /// Applies a committed operation. Returns whether the key was present.
    pub(crate) fn apply(&self, op: &TreeOp) -> bool {
        let mut map = self.map.write();
        let present = match op {
            TreeOp::Put { key, value } => map
                .insert(
                    self.fold.fold(key),
                    TreeEntry {
                        key: key.clone(),
                        value: value.clone(),
                    },
                )
                .is_some(),
            TreeOp::Delete { key } => map.remove(&self.fold.fold(key)).is_some(),
        };
        self.dirty.store(true, Ordering::Release);
        present
    }

    /// Writes the current map to the data file and clears the dirty flag.
    pub(crate) fn write_snapshot(&self, seq: Sequence) -> StoreResult<()> {
        let map = self.map.read();
        write_tree_file(&self.path, self.fold, seq, &map)?;
        self.dirty.store(false, Ordering::Release);
        Ok(())
    }

    pub(crate) fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    pub(crate) fn mark_closed(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub(crate) fn ensure_open(&self) -> StoreResult<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(StoreError::CollectionClosed)
        } else {
            Ok(())
        }
    }
}

/// Handle to an ordered tree collection.
///
/// Cheap to clone-like via reopening; all handles for one resolved path
/// share the same underlying state.
pub struct TreeStore {
    env: Arc<Environment>,
    shared: Arc<TreeShared>,
}

impl TreeStore {
    /// Opens the tree named `identifier` under `env`, with case-insensitive
    /// key order.
    ///
    /// An existing data file is loaded; a missing one is created
    /// exclusively. See [`crate::PathResolver`] for how `identifier` and
    /// `absolute` resolve to a path.
    ///
    /// # Errors
    ///
    /// Fails with [`StoreError::CollectionExists`] if exclusive creation
    /// lost a race, or with [`StoreError::EnvironmentClosed`] after
    /// shutdown.
    pub fn open(env: &Arc<Environment>, identifier: &str, absolute: bool) -> StoreResult<Self> {
        Self::open_with_fold(env, identifier, absolute, KeyFold::CaseInsensitive)
    }

    /// Opens the tree with an explicit ordering strategy.
    pub fn open_with_fold(
        env: &Arc<Environment>,
        identifier: &str,
        absolute: bool,
        fold: KeyFold,
    ) -> StoreResult<Self> {
        let shared = env.open_tree(identifier, absolute, fold)?;
        Ok(Self {
            env: Arc::clone(env),
            shared,
        })
    }

    pub(crate) fn from_parts(env: Arc<Environment>, shared: Arc<TreeShared>) -> Self {
        Self { env, shared }
    }

    pub(crate) fn shared_handle(&self) -> Arc<TreeShared> {
        Arc::clone(&self.shared)
    }

    pub(crate) fn belongs_to(&self, env: &Arc<Environment>) -> bool {
        Arc::ptr_eq(&self.env, env)
    }

    /// Returns the resolved data file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    /// Returns the ordering strategy.
    #[must_use]
    pub fn fold(&self) -> KeyFold {
        self.shared.fold
    }

    /// Reads the value stored under `key`, honoring the fold.
    pub fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        self.shared.ensure_open()?;
        let map = self.shared.map.read();
        Ok(map
            .get(&self.shared.fold.fold(key))
            .map(|entry| entry.value.clone()))
    }

    /// Writes `value` under `key` in its own transaction.
    pub fn set(&self, key: &str, value: impl Into<Vec<u8>>) -> StoreResult<()> {
        self.shared.ensure_open()?;
        self.env.commit_single(
            &self.shared,
            TreeOp::Put {
                key: key.to_owned(),
                value: value.into(),
            },
        )?;
        Ok(())
    }

    /// Removes `key` in its own transaction; returns whether it was present.
    pub fn delete(&self, key: &str) -> StoreResult<bool> {
        self.shared.ensure_open()?;
        self.env.commit_single(
            &self.shared,
            TreeOp::Delete {
                key: key.to_owned(),
            },
        )
    }

    /// Number of stored entries.
    pub fn len(&self) -> StoreResult<usize> {
        self.shared.ensure_open()?;
        Ok(self.shared.map.read().len())
    }

    /// Whether the tree holds no entries.
    pub fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Iterates every entry in ascending folded-key order.
    ///
    /// The iterator walks a snapshot: it is finite, unaffected by later
    /// writes, and a fresh call restarts from the beginning.
    pub fn iter(&self) -> StoreResult<TreeIter> {
        self.range::<(Bound<&str>, Bound<&str>)>((Bound::Unbounded, Bound::Unbounded))
    }

    /// Iterates the entries whose folded keys fall in `range`, ascending.
    ///
    /// Bounds are folded before comparison, so `range("alice".."bob")` and
    /// `range("ALICE".."BOB")` select the same entries. An inverted range is
    /// empty, not an error.
    pub fn range<R: RangeBounds<str>>(&self, range: R) -> StoreResult<TreeIter> {
        self.shared.ensure_open()?;
        let fold = self.shared.fold;

        let start = fold_bound(fold, range.start_bound());
        let end = fold_bound(fold, range.end_bound());

        // Boundary check through the comparator: missing (unbounded) ends
        // compare as the empty string.
        let start_key = bound_key(&start);
        let end_key = bound_key(&end);
        if end_key.is_some() {
            match fold.compare(start_key, end_key) {
                std::cmp::Ordering::Greater => return Ok(TreeIter::empty()),
                std::cmp::Ordering::Equal
                    if matches!(start, Bound::Excluded(_)) || matches!(end, Bound::Excluded(_)) =>
                {
                    return Ok(TreeIter::empty());
                }
                _ => {}
            }
        }

        let map = self.shared.map.read();
        let pairs: Vec<(String, Vec<u8>)> = map
            .range::<String, _>((borrow_bound(&start), borrow_bound(&end)))
            .map(|(_, entry)| (entry.key.clone(), entry.value.clone()))
            .collect();
        Ok(TreeIter {
            inner: pairs.into_iter(),
        })
    }

    /// Returns the entry with the smallest folded key.
    pub fn first(&self) -> StoreResult<Option<(String, Vec<u8>)>> {
        self.shared.ensure_open()?;
        let map = self.shared.map.read();
        Ok(map
            .first_key_value()
            .map(|(_, entry)| (entry.key.clone(), entry.value.clone())))
    }

    /// Returns the entry with the largest folded key.
    pub fn last(&self) -> StoreResult<Option<(String, Vec<u8>)>> {
        self.shared.ensure_open()?;
        let map = self.shared.map.read();
        Ok(map
            .last_key_value()
            .map(|(_, entry)| (entry.key.clone(), entry.value.clone())))
    }

    /// Persists the tree and releases it from the environment.
    ///
    /// Further operations on this handle (or any other handle to the same
    /// path) fail with [`StoreError::CollectionClosed`]. Idempotent.
    pub fn close(&self) -> StoreResult<()> {
        self.env.close_tree(&self.shared)
    }
}

impl std::fmt::Debug for TreeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreeStore")
            .field("path", &self.shared.path)
            .field("fold", &self.shared.fold)
            .finish_non_exhaustive()
    }
}

fn fold_bound(fold: KeyFold, bound: Bound<&str>) -> Bound<String> {
    match bound {
        Bound::Included(key) => Bound::Included(fold.fold(key)),
        Bound::Excluded(key) => Bound::Excluded(fold.fold(key)),
        Bound::Unbounded => Bound::Unbounded,
    }
}

fn bound_key<'a>(bound: &'a Bound<String>) -> Option<&'a str> {
    match bound {
        Bound::Included(key) | Bound::Excluded(key) => Some(key.as_str()),
        Bound::Unbounded => None,
    }
}

fn borrow_bound(bound: &Bound<String>) -> Bound<&String> {
    match bound {
        Bound::Included(key) => Bound::Included(key),
        Bound::Excluded(key) => Bound::Excluded(key),
        Bound::Unbounded => Bound::Unbounded,
    }
}

/// Snapshot iterator over `(key, value)` pairs in ascending folded order.
#[derive(Debug)]
pub struct TreeIter {
    inner: std::vec::IntoIter<(String, Vec<u8>)>,
}

impl TreeIter {
    fn empty() -> Self {
        Self {
            inner: Vec::new().into_iter(),
        }
    }
}

impl Iterator for TreeIter {
    type Item = (String, Vec<u8>);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for TreeIter {}

impl DoubleEndedIterator for TreeIter {
    fn next_back(&mut self) -> Option<Self::Item> {
        self.inner.next_back()
    }
}

/// Creates a tree data file exclusively, writing the header frame.
pub(crate) fn create_tree_file(path: &Path, fold: KeyFold) -> StoreResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    debug!(path = %path.display(), "creating empty tree collection");
    let mut backend = FileBackend::create_new(path).map_err(|e| match e {
        StorageError::AlreadyExists { path } => StoreError::CollectionExists { path },
        other => StoreError::Storage(other),
    })?;
    backend.append(&header_frame(fold, Sequence::ZERO)?)?;
    backend.sync()?;
    Ok(())
}

/// Reads a tree data file: fold strategy, snapshot sequence, entries.
pub(crate) fn read_tree_file(path: &Path) -> StoreResult<(KeyFold, Sequence, Vec<TreeEntry>)> {
    debug!(path = %path.display(), "opening existing tree collection");
    let backend = FileBackend::open(path)?;
    let mut reader = FrameReader::new(&backend, TREE_MAGIC)?;

    let (fold, seq) = match reader.next_frame()? {
        Some((_, KIND_HEADER, payload)) => {
            let mut cursor = PayloadCursor::new(&payload);
            let tag = cursor.take_u8()?;
            let seq = Sequence::new(cursor.take_u64()?);
            cursor.finish()?;
            let fold = KeyFold::from_tag(tag)
                .ok_or_else(|| StoreError::corrupted(format!("unknown key fold tag {tag}")))?;
            (fold, seq)
        }
        Some((_, kind, _)) => {
            return Err(StoreError::corrupted(format!(
                "tree file starts with record kind {kind}, expected header"
            )))
        }
        None => {
            return Err(StoreError::corrupted("tree file has no header record"));
        }
    };

    let mut entries = Vec::new();
    while let Some((_, kind, payload)) = reader.next_frame()? {
        if kind != KIND_ENTRY {
            return Err(StoreError::corrupted(format!(
                "unexpected record kind {kind} in tree file"
            )));
        }
        let mut cursor = PayloadCursor::new(&payload);
        let key = cursor.take_string()?;
        let value = cursor.take_bytes()?;
        cursor.finish()?;
        entries.push(TreeEntry { key, value });
    }
    if reader.torn() {
        // snapshots are written atomically, a torn one means real damage
        return Err(StoreError::corrupted("tree file ends mid-record"));
    }

    Ok((fold, seq, entries))
}

/// Writes a complete snapshot of `map` to `path` atomically.
pub(crate) fn write_tree_file(
    path: &Path,
    fold: KeyFold,
    seq: Sequence,
    map: &BTreeMap<String, TreeEntry>,
) -> StoreResult<()> {
    let mut bytes = header_frame(fold, seq)?;
    for entry in map.values() {
        let mut payload = Vec::with_capacity(8 + entry.key.len() + entry.value.len());
        put_bytes(&mut payload, entry.key.as_bytes());
        put_bytes(&mut payload, &entry.value);
        bytes.extend_from_slice(&encode_frame(TREE_MAGIC, KIND_ENTRY, &payload)?);
    }
    fsutil::atomic_write(path, &bytes)
}

fn header_frame(fold: KeyFold, seq: Sequence) -> StoreResult<Vec<u8>> {
    let mut payload = Vec::with_capacity(9);
    payload.push(fold.tag());
    put_u64(&mut payload, seq.as_u64());
    encode_frame(TREE_MAGIC, KIND_HEADER, &payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn entry(key: &str, value: &[u8]) -> TreeEntry {
        TreeEntry {
            key: key.to_owned(),
            value: value.to_vec(),
        }
    }

    #[test]
    fn snapshot_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("users.db");

        let fold = KeyFold::CaseInsensitive;
        let mut map = BTreeMap::new();
        map.insert(fold.fold("Alice"), entry("Alice", b"admin"));
        map.insert(fold.fold("bob"), entry("bob", b"guest"));

        write_tree_file(&path, fold, Sequence::new(7), &map).unwrap();
        let (read_fold, seq, entries) = read_tree_file(&path).unwrap();

        assert_eq!(read_fold, KeyFold::CaseInsensitive);
        assert_eq!(seq, Sequence::new(7));
        assert_eq!(entries, vec![entry("Alice", b"admin"), entry("bob", b"guest")]);
    }

    #[test]
    fn create_is_exclusive() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("users.db");

        create_tree_file(&path, KeyFold::CaseInsensitive).unwrap();
        let second = create_tree_file(&path, KeyFold::CaseInsensitive);
        assert!(matches!(second, Err(StoreError::CollectionExists { .. })));
    }

    #[test]
    fn fresh_file_reads_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("fresh.db");

        create_tree_file(&path, KeyFold::Exact).unwrap();
        let (fold, seq, entries) = read_tree_file(&path).unwrap();
        assert_eq!(fold, KeyFold::Exact);
        assert_eq!(seq, Sequence::ZERO);
        assert!(entries.is_empty());
    }

    #[test]
    fn headerless_file_is_corrupt() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.db");
        std::fs::write(&path, b"").unwrap();
        assert!(matches!(
            read_tree_file(&path),
            Err(StoreError::Corrupted { .. })
        ));
    }

    #[test]
    fn shared_apply_folds_keys_into_one_slot() {
        let shared = TreeShared::new(
            PathBuf::from("/tmp/t.db"),
            KeyFold::CaseInsensitive,
            BTreeMap::new(),
        );

        shared.apply(&TreeOp::Put {
            key: "Alice".into(),
            value: b"admin".to_vec(),
        });
        shared.apply(&TreeOp::Put {
            key: "ALICE".into(),
            value: b"guest".to_vec(),
        });

        let map = shared.map.read();
        assert_eq!(map.len(), 1);
        let stored = map.get("alice").unwrap();
        assert_eq!(stored.key, "ALICE");
        assert_eq!(stored.value, b"guest");
    }

    #[test]
    fn shared_delete_reports_presence() {
        let shared = TreeShared::new(
            PathBuf::from("/tmp/t.db"),
            KeyFold::CaseInsensitive,
            BTreeMap::new(),
        );
        shared.apply(&TreeOp::Put {
            key: "Foo".into(),
            value: vec![1],
        });

        assert!(shared.apply(&TreeOp::Delete { key: "foo".into() }));
        assert!(!shared.apply(&TreeOp::Delete { key: "foo".into() }));
    }
}
