//! The shared transactional environment.
//!
//! One [`Environment`] serves every tree collection of a configuration
//! directory. It owns the write-ahead log, the transaction accounting, the
//! `ENVIRONMENT` manifest, and the `env.lock` advisory lock that keeps a
//! second bot process out.
//!
//! The environment is an explicit object: the hosting process opens it once
//! (directly or through [`crate::Registry`]) and hands the `Arc` to every
//! [`TreeStore`] it opens. There is no hidden global.
//!
//! ## Lifecycle
//!
//! - **Open**: acquire the lock, load the manifest, scan the log, replay
//!   committed-but-unCheckpointed transactions into the collection data
//!   files, then checkpoint. A non-fatal open failure is retried exactly
//!   once with default options.
//! - **Run**: collections commit through the log; periodic housekeeping
//!   calls [`Environment::checkpoint`] and [`Environment::recycle_logs`].
//! - **Shutdown**: check for active transactions first; only when none were
//!   outstanding may the on-disk working state (log segments, manifest,
//!   lock) be removed. Collection data files always survive.

use crate::config::EnvConfig;
use crate::error::{StoreError, StoreResult};
use crate::fold::KeyFold;
use crate::frame::{encode_frame, put_u64, FrameReader, PayloadCursor};
use crate::fsutil;
use crate::log::{LogManager, LogRecord};
use crate::path::PathResolver;
use crate::stats::{Counters, EnvStats};
use crate::tree::{self, TreeEntry, TreeShared, TreeStore};
use crate::txn::{Transaction, TreeOp, TxnRegistry};
use crate::types::{Sequence, TxnId};
use burrow_storage::FileBackend;
use fs2::FileExt;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Magic bytes of the environment manifest frame.
const ENV_MAGIC: [u8; 4] = *b"BENV";

/// Manifest frame kind.
const KIND_MANIFEST: u8 = 1;

/// Manifest file name inside the configuration directory.
const MANIFEST_FILE: &str = "ENVIRONMENT";

/// Lock file name inside the configuration directory.
const LOCK_FILE: &str = "env.lock";

/// Format version written by this build.
const FORMAT_VERSION: u16 = 1;

/// Oldest format version this build can open.
const MIN_FORMAT_VERSION: u16 = 1;

/// Persistent environment metadata.
#[derive(Debug, Clone)]
struct EnvManifest {
    format_version: u16,
    checkpoint_seq: Sequence,
}

impl EnvManifest {
    fn new() -> Self {
        Self {
            format_version: FORMAT_VERSION,
            checkpoint_seq: Sequence::ZERO,
        }
    }

    fn encode(&self) -> StoreResult<Vec<u8>> {
        let mut payload = Vec::with_capacity(10);
        payload.extend_from_slice(&self.format_version.to_le_bytes());
        put_u64(&mut payload, self.checkpoint_seq.as_u64());
        encode_frame(ENV_MAGIC, KIND_MANIFEST, &payload)
    }

    fn load(home: &Path) -> StoreResult<Option<Self>> {
        let path = home.join(MANIFEST_FILE);
        if !path.exists() {
            return Ok(None);
        }

        let backend = FileBackend::open(&path)?;
        let mut reader = FrameReader::new(&backend, ENV_MAGIC)?;
        let manifest = match reader.next_frame()? {
            Some((_, KIND_MANIFEST, payload)) => {
                let mut cursor = PayloadCursor::new(&payload);
                let format_version =
                    u16::from_le_bytes([cursor.take_u8()?, cursor.take_u8()?]);
                let checkpoint_seq = Sequence::new(cursor.take_u64()?);
                cursor.finish()?;
                Self {
                    format_version,
                    checkpoint_seq,
                }
            }
            Some((_, kind, _)) => {
                return Err(StoreError::corrupted(format!(
                    "environment manifest has record kind {kind}"
                )))
            }
            None => return Err(StoreError::corrupted("environment manifest is empty")),
        };

        if manifest.format_version < MIN_FORMAT_VERSION {
            return Err(StoreError::UnsupportedVersion {
                found: manifest.format_version,
                supported: MIN_FORMAT_VERSION,
            });
        }
        Ok(Some(manifest))
    }

    fn save(&self, home: &Path) -> StoreResult<()> {
        fsutil::atomic_write(&home.join(MANIFEST_FILE), &self.encode()?)
    }
}

/// The shared transactional context all tree collections live in.
pub struct Environment {
    home: PathBuf,
    resolver: PathResolver,
    config: EnvConfig,
    log: LogManager,
    txns: TxnRegistry,
    counters: Counters,
    trees: RwLock<HashMap<PathBuf, Arc<TreeShared>>>,
    manifest: Mutex<EnvManifest>,
    lock_file: Mutex<Option<File>>,
    open: RwLock<bool>,
}

impl Environment {
    /// Opens the environment rooted at `home`.
    ///
    /// Transaction support, creation-if-missing, and crash recovery are
    /// always on. The configuration is validated up front; a non-fatal
    /// failure of the open itself is retried exactly once with default
    /// options before surfacing.
    ///
    /// # Errors
    ///
    /// Fails with [`StoreError::InvalidConfig`] for a bad configuration,
    /// [`StoreError::EnvironmentLocked`] when another process holds the
    /// directory, [`StoreError::UnsupportedVersion`] or
    /// [`StoreError::Corrupted`] for unusable on-disk state, or the error of
    /// the failed retry.
    pub fn open(home: &Path, config: EnvConfig) -> StoreResult<Arc<Self>> {
        config.validate()?;

        match Self::open_inner(home, config) {
            Ok(env) => Ok(env),
            Err(e) if e.is_fatal_startup() => Err(e),
            Err(e) => {
                warn!(error = %e, "environment open failed, retrying with default options");
                Self::open_inner(home, EnvConfig::default())
            }
        }
    }

    fn open_inner(home: &Path, config: EnvConfig) -> StoreResult<Arc<Self>> {
        if !home.exists() {
            fs::create_dir_all(home)?;
        }
        if !home.is_dir() {
            return Err(StoreError::invalid_operation(format!(
                "environment path is not a directory: {}",
                home.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(home.join(LOCK_FILE))?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(StoreError::EnvironmentLocked);
        }

        let mut manifest = EnvManifest::load(home)?.unwrap_or_else(EnvManifest::new);
        let (log, records) = LogManager::open(home, config.max_log_size)?;
        debug!(
            home = %home.display(),
            max_log_size = config.max_log_size,
            "environment opened"
        );

        let recovery = recover(home, &records, manifest.checkpoint_seq)?;
        manifest.checkpoint_seq = recovery.checkpoint_seq;
        manifest.save(home)?;

        // transactions the dead process never resolved are rolled back, so
        // they stop pinning their log segments
        for txn in &recovery.unresolved {
            debug!(%txn, "aborting unresolved transaction from previous run");
            log.append(&LogRecord::Abort { txn: *txn })?;
        }
        log.append(&LogRecord::Checkpoint {
            seq: recovery.checkpoint_seq,
        })?;
        log.flush()?;

        Ok(Arc::new(Self {
            home: home.to_path_buf(),
            resolver: PathResolver::new(home),
            config,
            log,
            txns: TxnRegistry::with_state(
                recovery.next_txn,
                recovery.next_seq,
                recovery.committed_seq.as_u64(),
            ),
            counters: Counters::default(),
            trees: RwLock::new(HashMap::new()),
            manifest: Mutex::new(manifest),
            lock_file: Mutex::new(Some(lock_file)),
            open: RwLock::new(true),
        }))
    }

    /// Returns the configuration directory this environment lives in.
    #[must_use]
    pub fn home(&self) -> &Path {
        &self.home
    }

    /// Returns the active configuration.
    #[must_use]
    pub fn config(&self) -> &EnvConfig {
        &self.config
    }

    /// Whether the environment is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        *self.open.read()
    }

    /// Number of transactions currently active.
    #[must_use]
    pub fn active_transactions(&self) -> usize {
        self.txns.active_count()
    }

    /// Highest committed sequence.
    #[must_use]
    pub fn committed_seq(&self) -> Sequence {
        self.txns.committed_seq()
    }

    pub(crate) fn resolver(&self) -> &PathResolver {
        &self.resolver
    }

    fn ensure_open(&self) -> StoreResult<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(StoreError::EnvironmentClosed)
        }
    }

    /// Opens (or joins) the tree collection at the resolved path.
    ///
    /// All handles for one path share state; the first open of an existing
    /// file keeps the fold recorded in the file, warning if the caller asked
    /// for a different one.
    pub(crate) fn open_tree(
        &self,
        identifier: &str,
        absolute: bool,
        fold: KeyFold,
    ) -> StoreResult<Arc<TreeShared>> {
        self.ensure_open()?;
        let path = self.resolver.resolve(identifier, absolute);

        let mut trees = self.trees.write();
        if let Some(shared) = trees.get(&path) {
            if shared.fold != fold {
                warn!(
                    path = %path.display(),
                    "collection already open with a different key fold"
                );
            }
            return Ok(Arc::clone(shared));
        }

        let shared = if path.exists() {
            let (file_fold, _seq, entries) = tree::read_tree_file(&path)?;
            if file_fold != fold {
                warn!(
                    path = %path.display(),
                    requested = ?fold,
                    stored = ?file_fold,
                    "collection file uses a different key fold, keeping the stored one"
                );
            }
            let mut map = BTreeMap::new();
            for entry in entries {
                map.insert(file_fold.fold(&entry.key), entry);
            }
            Arc::new(TreeShared::new(path.clone(), file_fold, map))
        } else {
            tree::create_tree_file(&path, fold)?;
            Arc::new(TreeShared::new(path.clone(), fold, BTreeMap::new()))
        };

        trees.insert(path, Arc::clone(&shared));
        Ok(shared)
    }

    /// Persists and releases one tree collection.
    pub(crate) fn close_tree(&self, shared: &Arc<TreeShared>) -> StoreResult<()> {
        let _guard = self.txns.commit_lock().lock();
        if shared.ensure_open().is_err() {
            return Ok(());
        }
        shared.mark_closed();
        if shared.is_dirty() {
            shared.write_snapshot(self.txns.committed_seq())?;
        }
        self.trees.write().remove(&shared.path);
        Ok(())
    }

    /// Begins an explicit transaction.
    pub fn begin(self: &Arc<Self>) -> StoreResult<Transaction> {
        self.ensure_open()?;
        let id = self.txns.begin();
        if let Err(e) = self.log.append(&LogRecord::Begin { txn: id }) {
            self.txns.resolve(id);
            return Err(e);
        }
        self.counters.record_begin();
        Ok(Transaction::new(id, Arc::clone(self)))
    }

    /// Commits a transaction, making its writes durable and visible.
    pub fn commit(&self, txn: &mut Transaction) -> StoreResult<Sequence> {
        self.ensure_open()?;
        txn.ensure_active()?;
        if !txn.belongs_to(self) {
            return Err(StoreError::invalid_operation(
                "transaction belongs to a different environment",
            ));
        }

        let _guard = self.txns.commit_lock().lock();
        for (shared, _) in &txn.pending {
            shared.ensure_open()?;
        }

        let id = txn.id();
        for (shared, op) in &txn.pending {
            self.log.append(&op_record(id, shared, op))?;
        }
        let seq = self.txns.next_seq();
        self.log.append(&LogRecord::Commit { txn: id, seq })?;
        if self.config.sync_on_commit {
            self.log.flush()?;
        }

        for (shared, op) in &txn.pending {
            shared.apply(op);
            match op {
                TreeOp::Put { .. } => self.counters.record_write(),
                TreeOp::Delete { .. } => self.counters.record_delete(),
            }
        }

        self.txns.set_committed_seq(seq);
        self.txns.resolve(id);
        txn.mark_committed();
        self.counters.record_commit();
        Ok(seq)
    }

    /// Aborts a transaction, discarding its buffered writes.
    pub fn abort(&self, txn: &mut Transaction) -> StoreResult<()> {
        self.ensure_open()?;
        txn.ensure_active()?;
        if !txn.belongs_to(self) {
            return Err(StoreError::invalid_operation(
                "transaction belongs to a different environment",
            ));
        }

        self.log.append(&LogRecord::Abort { txn: txn.id() })?;
        self.txns.resolve(txn.id());
        txn.mark_aborted();
        self.counters.record_abort();
        Ok(())
    }

    /// Commits one operation as its own transaction.
    ///
    /// Returns whether the key was present before the operation.
    pub(crate) fn commit_single(
        &self,
        shared: &Arc<TreeShared>,
        op: TreeOp,
    ) -> StoreResult<bool> {
        self.ensure_open()?;
        let id = self.txns.begin();
        self.counters.record_begin();

        let result = self.commit_single_inner(id, shared, &op);
        if result.is_err() {
            self.txns.resolve(id);
        }
        result
    }

    fn commit_single_inner(
        &self,
        id: TxnId,
        shared: &Arc<TreeShared>,
        op: &TreeOp,
    ) -> StoreResult<bool> {
        let _guard = self.txns.commit_lock().lock();
        shared.ensure_open()?;

        self.log.append(&LogRecord::Begin { txn: id })?;
        self.log.append(&op_record(id, shared, op))?;
        let seq = self.txns.next_seq();
        self.log.append(&LogRecord::Commit { txn: id, seq })?;
        if self.config.sync_on_commit {
            self.log.flush()?;
        }

        let present = shared.apply(op);
        match op {
            TreeOp::Put { .. } => self.counters.record_write(),
            TreeOp::Delete { .. } => self.counters.record_delete(),
        }

        self.txns.set_committed_seq(seq);
        self.txns.resolve(id);
        self.counters.record_commit();
        Ok(present)
    }

    /// Flushes all committed state to the collection data files.
    ///
    /// Maintenance callers treat a failure as a warning, not a fault: the
    /// only consequence is that more log volume accumulates until the next
    /// successful checkpoint.
    pub fn checkpoint(&self) -> StoreResult<()> {
        self.ensure_open()?;
        debug!("checkpointing ...");

        let _guard = self.txns.commit_lock().lock();
        let seq = self.txns.committed_seq();

        let trees = self.trees.read();
        for shared in trees.values() {
            if shared.is_dirty() {
                shared.write_snapshot(seq)?;
            }
        }
        drop(trees);

        let mut manifest = self.manifest.lock();
        manifest.checkpoint_seq = seq;
        manifest.save(&self.home)?;
        drop(manifest);

        self.log.append(&LogRecord::Checkpoint { seq })?;
        self.log.flush()?;
        self.counters.record_checkpoint();
        Ok(())
    }

    /// Flushes the log and deletes segments no longer needed for recovery.
    ///
    /// Returns the deleted segment paths for diagnostic reporting.
    pub fn recycle_logs(&self) -> StoreResult<Vec<String>> {
        self.ensure_open()?;
        debug!("flushing log ...");
        let recycled = self.log.recycle()?;
        if !recycled.is_empty() {
            debug!("deleted recyclable log segments: {}", recycled.join(", "));
        }
        Ok(recycled)
    }

    /// Best-effort diagnostic snapshot.
    ///
    /// Never fails: probes that error are reported as zero.
    #[must_use]
    pub fn stats(&self) -> EnvStats {
        let log_bytes = self.log.total_bytes().unwrap_or_else(|e| {
            debug!(error = %e, "couldn't determine log volume");
            0
        });

        EnvStats {
            active_txns: self.txns.active_count(),
            txns_begun: self.counters.begun(),
            txns_committed: self.counters.committed(),
            txns_aborted: self.counters.aborted(),
            checkpoints: self.counters.checkpoints(),
            writes: self.counters.writes(),
            deletes: self.counters.deletes(),
            committed_seq: self.txns.committed_seq().as_u64(),
            checkpoint_seq: self.manifest.lock().checkpoint_seq.as_u64(),
            log_segments: self.log.segment_count(),
            log_bytes,
            open_trees: self.trees.read().len(),
        }
    }

    /// Shuts the environment down in order.
    ///
    /// The active-transaction check comes first; when any transaction is
    /// outstanding the on-disk working state is kept intact for the next
    /// process to recover from, and only the in-process handles close.
    /// Checkpoint and log-recycling failures along the way are logged and
    /// absorbed, but working state is only removed after a successful
    /// checkpoint - the log must never be the sole copy of committed data
    /// when it is deleted. Idempotent.
    pub fn shutdown(&self) -> StoreResult<()> {
        if !self.is_open() {
            return Ok(());
        }

        debug!("checking transactions ...");
        let active = self.txns.active_count();
        if active > 0 {
            warn!(active, "not all transactions completed at shutdown");
        }

        let checkpointed = match self.checkpoint() {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "checkpoint failed during shutdown");
                false
            }
        };
        match self.recycle_logs() {
            Ok(recycled) if !recycled.is_empty() => {
                debug!("recycled {} log segments at shutdown", recycled.len());
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "log recycling failed during shutdown"),
        }

        {
            let mut trees = self.trees.write();
            for shared in trees.values() {
                shared.mark_closed();
            }
            trees.clear();
        }
        *self.open.write() = false;

        let segment_paths = self.log.segment_paths();
        debug!(home = %self.home.display(), "closing environment");
        self.log.close()?;

        if active == 0 && checkpointed {
            debug!(home = %self.home.display(), "removing environment working state");
            self.remove_state(&segment_paths)?;
        } else {
            debug!("keeping environment files for the next process to recover from");
            *self.lock_file.lock() = None;
        }
        Ok(())
    }

    /// Deletes the log segments, manifest, and lock file.
    ///
    /// Only called when the shutdown found zero active transactions.
    /// Collection data files are never touched.
    fn remove_state(&self, segment_paths: &[PathBuf]) -> StoreResult<()> {
        for path in segment_paths {
            if path.exists() {
                fs::remove_file(path)?;
            }
        }

        let manifest_path = self.home.join(MANIFEST_FILE);
        if manifest_path.exists() {
            fs::remove_file(&manifest_path)?;
        }

        // release the advisory lock before unlinking its file
        *self.lock_file.lock() = None;
        let lock_path = self.home.join(LOCK_FILE);
        if lock_path.exists() {
            fs::remove_file(&lock_path)?;
        }

        fsutil::sync_dir(&self.home)
    }

    /// Opens a tree handle against this environment.
    ///
    /// Convenience wrapper around [`TreeStore::open`].
    pub fn tree(self: &Arc<Self>, identifier: &str, absolute: bool) -> StoreResult<TreeStore> {
        let shared = self.open_tree(identifier, absolute, KeyFold::CaseInsensitive)?;
        Ok(TreeStore::from_parts(Arc::clone(self), shared))
    }
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("home", &self.home)
            .field("open", &self.is_open())
            .field("active_txns", &self.txns.active_count())
            .finish_non_exhaustive()
    }
}

impl Drop for Environment {
    fn drop(&mut self) {
        let _ = self.log.close();
    }
}

fn op_record(id: TxnId, shared: &TreeShared, op: &TreeOp) -> LogRecord {
    match op {
        TreeOp::Put { key, value } => LogRecord::Put {
            txn: id,
            collection: shared.path_str.clone(),
            key: key.clone(),
            value: value.clone(),
        },
        TreeOp::Delete { key } => LogRecord::Delete {
            txn: id,
            collection: shared.path_str.clone(),
            key: key.clone(),
        },
    }
}

/// Outcome of the log replay at open time.
struct Recovery {
    checkpoint_seq: Sequence,
    committed_seq: Sequence,
    next_txn: u64,
    next_seq: u64,
    /// Transactions with log records but no commit or abort.
    unresolved: Vec<TxnId>,
}

/// Replays committed transactions past `checkpoint` into the collection
/// data files.
///
/// Replay is idempotent: operations are absolute (set or delete), so a
/// collection whose snapshot already includes some of them converges to the
/// same state.
fn recover(home: &Path, records: &[LogRecord], checkpoint: Sequence) -> StoreResult<Recovery> {
    let mut ops: HashMap<TxnId, Vec<&LogRecord>> = HashMap::new();
    let mut commits: Vec<(Sequence, TxnId)> = Vec::new();
    let mut max_txn = 0u64;
    let mut max_seq = checkpoint.as_u64();

    for record in records {
        if let Some(txn) = record.txn() {
            max_txn = max_txn.max(txn.as_u64());
        }
        match record {
            LogRecord::Begin { txn } => {
                ops.entry(*txn).or_default();
            }
            LogRecord::Put { txn, .. } | LogRecord::Delete { txn, .. } => {
                ops.entry(*txn).or_default().push(record);
            }
            LogRecord::Commit { txn, seq } => {
                commits.push((*seq, *txn));
                max_seq = max_seq.max(seq.as_u64());
            }
            LogRecord::Abort { txn } => {
                ops.remove(txn);
            }
            LogRecord::Checkpoint { seq } => {
                max_seq = max_seq.max(seq.as_u64());
            }
        }
    }

    commits.sort_unstable_by_key(|&(seq, _)| seq);
    commits.retain(|&(seq, _)| seq > checkpoint);

    let mut loaded: BTreeMap<String, (KeyFold, BTreeMap<String, TreeEntry>)> = BTreeMap::new();
    let mut replayed = 0usize;
    for (_, txn) in &commits {
        let Some(txn_ops) = ops.get(txn) else {
            continue;
        };
        for record in txn_ops {
            let collection = match record {
                LogRecord::Put { collection, .. } | LogRecord::Delete { collection, .. } => {
                    collection
                }
                _ => continue,
            };
            if !loaded.contains_key(collection) {
                loaded.insert(collection.clone(), load_collection(home, collection)?);
            }
            let (fold, map) = loaded
                .get_mut(collection)
                .expect("collection loaded above");
            match record {
                LogRecord::Put { key, value, .. } => {
                    map.insert(
                        fold.fold(key),
                        TreeEntry {
                            key: key.clone(),
                            value: value.clone(),
                        },
                    );
                }
                LogRecord::Delete { key, .. } => {
                    map.remove(&fold.fold(key));
                }
                _ => {}
            }
            replayed += 1;
        }
    }

    let checkpoint_seq = commits
        .last()
        .map_or(checkpoint, |&(seq, _)| seq.max(checkpoint));
    for (collection, (fold, map)) in &loaded {
        tree::write_tree_file(Path::new(collection), *fold, checkpoint_seq, map)?;
    }
    if replayed > 0 {
        debug!(
            operations = replayed,
            collections = loaded.len(),
            "recovered committed transactions from the log"
        );
    }

    // `commits` was filtered to post-checkpoint sequences, so resolvedness
    // is judged against every commit record in the log
    let committed: std::collections::HashSet<TxnId> = records
        .iter()
        .filter_map(|r| match r {
            LogRecord::Commit { txn, .. } => Some(*txn),
            _ => None,
        })
        .collect();
    let mut unresolved: Vec<TxnId> = ops
        .keys()
        .copied()
        .filter(|txn| !committed.contains(txn))
        .collect();
    unresolved.sort_unstable();

    Ok(Recovery {
        checkpoint_seq,
        committed_seq: Sequence::new(max_seq),
        next_txn: max_txn + 1,
        next_seq: max_seq + 1,
        unresolved,
    })
}

/// Loads one collection's snapshot for recovery.
///
/// A missing data file (deleted out from under the log) starts over empty
/// with the default fold.
fn load_collection(
    home: &Path,
    collection: &str,
) -> StoreResult<(KeyFold, BTreeMap<String, TreeEntry>)> {
    let path = PathBuf::from(collection);
    if !path.exists() {
        warn!(
            collection,
            home = %home.display(),
            "collection data file missing during recovery, starting empty"
        );
        return Ok((KeyFold::CaseInsensitive, BTreeMap::new()));
    }

    let (fold, _seq, entries) = tree::read_tree_file(&path)?;
    let mut map = BTreeMap::new();
    for entry in entries {
        map.insert(fold.fold(&entry.key), entry);
    }
    Ok((fold, map))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open_env(home: &Path) -> Arc<Environment> {
        Environment::open(home, EnvConfig::default()).unwrap()
    }

    #[test]
    fn open_creates_working_state() {
        let dir = tempdir().unwrap();
        let env = open_env(dir.path());

        assert!(env.is_open());
        assert!(dir.path().join("env.lock").exists());
        assert!(dir.path().join("ENVIRONMENT").exists());
        assert!(dir.path().join("log.000001").exists());
    }

    #[test]
    fn second_process_is_locked_out() {
        let dir = tempdir().unwrap();
        let _env = open_env(dir.path());

        let second = Environment::open(dir.path(), EnvConfig::default());
        assert!(matches!(second, Err(StoreError::EnvironmentLocked)));
    }

    #[test]
    fn undersized_log_config_is_rejected() {
        let dir = tempdir().unwrap();
        let config = EnvConfig::new().max_log_size(1024);
        let result = Environment::open(dir.path(), config);
        assert!(matches!(result, Err(StoreError::InvalidConfig { .. })));
    }

    #[test]
    fn set_then_get_round_trips() {
        let dir = tempdir().unwrap();
        let env = open_env(dir.path());
        let users = env.tree("users", false).unwrap();

        users.set("Alice", b"admin".to_vec()).unwrap();
        assert_eq!(users.get("Alice").unwrap(), Some(b"admin".to_vec()));
        assert_eq!(users.get("alice").unwrap(), Some(b"admin".to_vec()));
        assert_eq!(users.get("bob").unwrap(), None);
    }

    #[test]
    fn case_equivalent_keys_share_one_slot() {
        let dir = tempdir().unwrap();
        let env = open_env(dir.path());
        let users = env.tree("users", false).unwrap();

        users.set("Alice", b"admin".to_vec()).unwrap();
        users.set("ALICE", b"guest".to_vec()).unwrap();

        assert_eq!(users.len().unwrap(), 1);
        assert_eq!(users.get("alice").unwrap(), Some(b"guest".to_vec()));
        // the most recent spelling is the stored spelling
        let (key, value) = users.first().unwrap().unwrap();
        assert_eq!(key, "ALICE");
        assert_eq!(value, b"guest");
    }

    #[test]
    fn delete_reports_presence() {
        let dir = tempdir().unwrap();
        let env = open_env(dir.path());
        let users = env.tree("users", false).unwrap();

        users.set("Foo", b"x".to_vec()).unwrap();
        assert!(users.delete("foo").unwrap());
        assert!(!users.delete("foo").unwrap());
        assert_eq!(users.get("Foo").unwrap(), None);
    }

    #[test]
    fn range_iterates_in_folded_order() {
        let dir = tempdir().unwrap();
        let env = open_env(dir.path());
        let tree = env.tree("ordered", false).unwrap();

        tree.set("delta", b"4".to_vec()).unwrap();
        tree.set("Alpha", b"1".to_vec()).unwrap();
        tree.set("charlie", b"3".to_vec()).unwrap();
        tree.set("Bravo", b"2".to_vec()).unwrap();

        let keys: Vec<String> = tree.iter().unwrap().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["Alpha", "Bravo", "charlie", "delta"]);

        let mid: Vec<String> = tree.range("BRAVO".."delta").unwrap().map(|(k, _)| k).collect();
        assert_eq!(mid, vec!["Bravo", "charlie"]);

        // inverted ranges are empty, not a fault
        assert_eq!(tree.range("z".."a").unwrap().count(), 0);
        // unbounded ends go through the missing-key comparison path
        assert_eq!(tree.range(.."charlie").unwrap().count(), 2);
        assert_eq!(tree.range("charlie"..).unwrap().count(), 2);
    }

    #[test]
    fn explicit_transaction_spans_collections() {
        let dir = tempdir().unwrap();
        let env = open_env(dir.path());
        let users = env.tree("users", false).unwrap();
        let polls = env.tree("polls", false).unwrap();

        let mut txn = env.begin().unwrap();
        txn.put(&users, "alice", b"admin".to_vec()).unwrap();
        txn.put(&polls, "poll-1", b"open".to_vec()).unwrap();

        // nothing visible before commit
        assert_eq!(users.get("alice").unwrap(), None);
        assert_eq!(polls.get("poll-1").unwrap(), None);
        // but the transaction reads its own writes
        assert_eq!(txn.get(&users, "alice").unwrap(), Some(b"admin".to_vec()));

        env.commit(&mut txn).unwrap();
        assert_eq!(users.get("alice").unwrap(), Some(b"admin".to_vec()));
        assert_eq!(polls.get("poll-1").unwrap(), Some(b"open".to_vec()));
    }

    #[test]
    fn aborted_transaction_leaves_no_trace() {
        let dir = tempdir().unwrap();
        let env = open_env(dir.path());
        let users = env.tree("users", false).unwrap();

        let mut txn = env.begin().unwrap();
        txn.put(&users, "ghost", b"boo".to_vec()).unwrap();
        env.abort(&mut txn).unwrap();

        assert_eq!(users.get("ghost").unwrap(), None);
        assert_eq!(env.active_transactions(), 0);
    }

    #[test]
    fn clean_shutdown_removes_working_state() {
        let dir = tempdir().unwrap();
        let env = open_env(dir.path());
        let users = env.tree("users", false).unwrap();
        users.set("alice", b"admin".to_vec()).unwrap();

        env.shutdown().unwrap();
        assert!(!env.is_open());

        // working state gone, data file kept
        assert!(!dir.path().join("ENVIRONMENT").exists());
        assert!(!dir.path().join("env.lock").exists());
        assert!(!dir.path().join("log.000001").exists());
        assert!(dir.path().join("users.db").exists());

        // handles are dead after shutdown
        assert!(matches!(
            users.get("alice"),
            Err(StoreError::CollectionClosed)
        ));
    }

    #[test]
    fn shutdown_with_active_txn_keeps_state() {
        let dir = tempdir().unwrap();
        let env = open_env(dir.path());
        let users = env.tree("users", false).unwrap();
        users.set("alice", b"admin".to_vec()).unwrap();

        let txn = env.begin().unwrap();
        env.shutdown().unwrap();
        drop(txn);

        // destructive cleanup was skipped
        assert!(dir.path().join("ENVIRONMENT").exists());
        assert!(dir.path().join("env.lock").exists());

        // the next "process" recovers the committed data
        let env2 = open_env(dir.path());
        let users2 = env2.tree("users", false).unwrap();
        assert_eq!(users2.get("alice").unwrap(), Some(b"admin".to_vec()));
    }

    #[test]
    fn shutdown_is_idempotent() {
        let dir = tempdir().unwrap();
        let env = open_env(dir.path());
        env.shutdown().unwrap();
        env.shutdown().unwrap();
    }

    #[test]
    fn data_survives_restart() {
        let dir = tempdir().unwrap();
        {
            let env = open_env(dir.path());
            let users = env.tree("users", false).unwrap();
            users.set("Alice", b"admin".to_vec()).unwrap();
            users.set("bob", b"guest".to_vec()).unwrap();
            env.shutdown().unwrap();
        }

        let env = open_env(dir.path());
        let users = env.tree("users", false).unwrap();
        assert_eq!(users.get("alice").unwrap(), Some(b"admin".to_vec()));
        assert_eq!(users.get("BOB").unwrap(), Some(b"guest".to_vec()));
    }

    #[test]
    fn crash_recovery_replays_committed_writes() {
        let dir = tempdir().unwrap();
        {
            let env = open_env(dir.path());
            let users = env.tree("users", false).unwrap();
            users.set("alice", b"admin".to_vec()).unwrap();
            // no shutdown, no checkpoint: only the log has the write
        }

        let env = open_env(dir.path());
        let users = env.tree("users", false).unwrap();
        assert_eq!(users.get("alice").unwrap(), Some(b"admin".to_vec()));
    }

    #[test]
    fn uncommitted_writes_do_not_survive_crash() {
        let dir = tempdir().unwrap();
        {
            let env = open_env(dir.path());
            let users = env.tree("users", false).unwrap();
            users.set("kept", b"yes".to_vec()).unwrap();

            let mut txn = env.begin().unwrap();
            txn.put(&users, "lost", b"no".to_vec()).unwrap();
            // crash with the transaction still open
        }

        let env = open_env(dir.path());
        let users = env.tree("users", false).unwrap();
        assert_eq!(users.get("kept").unwrap(), Some(b"yes".to_vec()));
        assert_eq!(users.get("lost").unwrap(), None);
    }

    #[test]
    fn recycle_after_checkpoint_deletes_segments() {
        let dir = tempdir().unwrap();
        let config = EnvConfig::new().max_log_size(4 * crate::config::LOG_BUFFER_SIZE as u64);
        let env = Environment::open(dir.path(), config).unwrap();
        let tree = env.tree("bulk", false).unwrap();

        // push enough volume through the log to rotate segments
        let value = vec![0u8; 8 * 1024];
        for i in 0..64 {
            tree.set(&format!("key-{i}"), value.clone()).unwrap();
        }
        assert!(env.stats().log_segments > 1);

        env.checkpoint().unwrap();
        let recycled = env.recycle_logs().unwrap();
        assert!(!recycled.is_empty());
        for path in &recycled {
            assert!(!Path::new(path).exists());
        }

        // recycled segments were really not needed: restart sees all data
        env.shutdown().unwrap();
        let env2 = open_env(dir.path());
        let tree2 = env2.tree("bulk", false).unwrap();
        assert_eq!(tree2.len().unwrap(), 64);
    }

    #[test]
    fn stats_reflect_activity() {
        let dir = tempdir().unwrap();
        let env = open_env(dir.path());
        let tree = env.tree("t", false).unwrap();

        tree.set("a", b"1".to_vec()).unwrap();
        tree.set("b", b"2".to_vec()).unwrap();
        tree.delete("a").unwrap();
        env.checkpoint().unwrap();

        let stats = env.stats();
        assert_eq!(stats.writes, 2);
        assert_eq!(stats.deletes, 1);
        assert_eq!(stats.txns_committed, 3);
        assert_eq!(stats.active_txns, 0);
        assert_eq!(stats.checkpoints, 1);
        assert_eq!(stats.open_trees, 1);
        assert!(stats.committed_seq >= 3);
    }

    #[test]
    fn concurrent_writers_on_two_trees() {
        let dir = tempdir().unwrap();
        let env = open_env(dir.path());
        let seen = env.tree("seen", false).unwrap();
        let quotes = env.tree("quotes", false).unwrap();

        std::thread::scope(|scope| {
            for worker in 0..4 {
                let env = Arc::clone(&env);
                scope.spawn(move || {
                    let tree = env
                        .tree(if worker % 2 == 0 { "seen" } else { "quotes" }, false)
                        .unwrap();
                    for i in 0..25u8 {
                        tree.set(&format!("w{worker}-k{i}"), vec![worker as u8, i])
                            .unwrap();
                    }
                });
            }
        });

        assert_eq!(seen.len().unwrap(), 50);
        assert_eq!(quotes.len().unwrap(), 50);
        for worker in [0u8, 2] {
            for i in 0..25u8 {
                assert_eq!(
                    seen.get(&format!("w{worker}-k{i}")).unwrap(),
                    Some(vec![worker, i])
                );
            }
        }
    }

    #[test]
    fn closed_tree_rejects_operations() {
        let dir = tempdir().unwrap();
        let env = open_env(dir.path());
        let tree = env.tree("t", false).unwrap();
        tree.set("a", b"1".to_vec()).unwrap();

        tree.close().unwrap();
        assert!(matches!(tree.get("a"), Err(StoreError::CollectionClosed)));
        assert!(matches!(
            tree.set("b", b"2".to_vec()),
            Err(StoreError::CollectionClosed)
        ));

        // reopening yields the persisted data
        let tree = env.tree("t", false).unwrap();
        assert_eq!(tree.get("a").unwrap(), Some(b"1".to_vec()));
    }

    #[test]
    fn same_identifier_shares_state() {
        let dir = tempdir().unwrap();
        let env = open_env(dir.path());

        let first = env.tree("shared", false).unwrap();
        let second = env.tree("shared", false).unwrap();
        first.set("k", b"v".to_vec()).unwrap();
        assert_eq!(second.get("k").unwrap(), Some(b"v".to_vec()));
    }
}
