//! Transactions.

use crate::env::Environment;
use crate::error::{StoreError, StoreResult};
use crate::tree::{TreeShared, TreeStore};
use crate::types::{Sequence, TxnId};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A buffered write transaction against one environment.
///
/// Writes recorded through [`Transaction::put`] and [`Transaction::delete`]
/// stay invisible to readers until [`crate::Environment::commit`] applies
/// them; [`crate::Environment::abort`] discards them. A transaction may span
/// any number of tree collections of its environment.
///
/// Dropping an active transaction does **not** abort it - it stays counted
/// as active, and an environment shut down while it is outstanding keeps its
/// on-disk state for the next process to recover from.
pub struct Transaction {
    id: TxnId,
    env: Arc<Environment>,
    state: TxnState,
    pub(crate) pending: Vec<(Arc<TreeShared>, TreeOp)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxnState {
    Active,
    Committed,
    Aborted,
}

/// One buffered tree operation.
#[derive(Debug, Clone)]
pub(crate) enum TreeOp {
    Put { key: String, value: Vec<u8> },
    Delete { key: String },
}

impl TreeOp {
    pub(crate) fn key(&self) -> &str {
        match self {
            Self::Put { key, .. } | Self::Delete { key } => key,
        }
    }
}

impl Transaction {
    pub(crate) fn new(id: TxnId, env: Arc<Environment>) -> Self {
        Self {
            id,
            env,
            state: TxnState::Active,
            pending: Vec::new(),
        }
    }

    /// Returns the transaction ID.
    #[must_use]
    pub fn id(&self) -> TxnId {
        self.id
    }

    /// Whether the transaction is still active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == TxnState::Active
    }

    /// Buffers a write of `key` in `tree`.
    ///
    /// # Errors
    ///
    /// Fails if the transaction is no longer active or `tree` belongs to a
    /// different environment.
    pub fn put(
        &mut self,
        tree: &TreeStore,
        key: &str,
        value: impl Into<Vec<u8>>,
    ) -> StoreResult<()> {
        self.check_tree(tree)?;
        self.pending.push((
            tree.shared_handle(),
            TreeOp::Put {
                key: key.to_owned(),
                value: value.into(),
            },
        ));
        Ok(())
    }

    /// Buffers a removal of `key` in `tree`.
    pub fn delete(&mut self, tree: &TreeStore, key: &str) -> StoreResult<()> {
        self.check_tree(tree)?;
        self.pending.push((
            tree.shared_handle(),
            TreeOp::Delete {
                key: key.to_owned(),
            },
        ));
        Ok(())
    }

    /// Reads `key` from `tree` as this transaction sees it.
    ///
    /// Buffered writes of this transaction shadow committed state.
    pub fn get(&self, tree: &TreeStore, key: &str) -> StoreResult<Option<Vec<u8>>> {
        self.check_tree(tree)?;
        let shared = tree.shared_handle();
        let folded = shared.fold.fold(key);
        for (target, op) in self.pending.iter().rev() {
            if Arc::ptr_eq(target, &shared) && shared.fold.fold(op.key()) == folded {
                return Ok(match op {
                    TreeOp::Put { value, .. } => Some(value.clone()),
                    TreeOp::Delete { .. } => None,
                });
            }
        }
        tree.get(key)
    }

    pub(crate) fn mark_committed(&mut self) {
        self.state = TxnState::Committed;
    }

    pub(crate) fn mark_aborted(&mut self) {
        self.state = TxnState::Aborted;
    }

    pub(crate) fn ensure_active(&self) -> StoreResult<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(StoreError::invalid_operation("transaction is not active"))
        }
    }

    pub(crate) fn belongs_to(&self, env: &Environment) -> bool {
        std::ptr::eq(Arc::as_ptr(&self.env), env)
    }

    fn check_tree(&self, tree: &TreeStore) -> StoreResult<()> {
        self.ensure_active()?;
        if !tree.belongs_to(&self.env) {
            return Err(StoreError::invalid_operation(
                "collection belongs to a different environment",
            ));
        }
        Ok(())
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("pending", &self.pending.len())
            .finish()
    }
}

/// Transaction accounting shared by all collections of one environment.
///
/// A single commit lock serializes committers; readers never see a write
/// before its commit record is durable.
#[derive(Debug)]
pub(crate) struct TxnRegistry {
    next_txn: AtomicU64,
    next_seq: AtomicU64,
    committed_seq: AtomicU64,
    commit_lock: Mutex<()>,
    active: RwLock<Vec<TxnId>>,
}

impl TxnRegistry {
    pub(crate) fn with_state(next_txn: u64, next_seq: u64, committed_seq: u64) -> Self {
        Self {
            next_txn: AtomicU64::new(next_txn),
            next_seq: AtomicU64::new(next_seq),
            committed_seq: AtomicU64::new(committed_seq),
            commit_lock: Mutex::new(()),
            active: RwLock::new(Vec::new()),
        }
    }

    /// Allocates a transaction ID and marks it active.
    pub(crate) fn begin(&self) -> TxnId {
        let id = TxnId::new(self.next_txn.fetch_add(1, Ordering::SeqCst));
        self.active.write().push(id);
        id
    }

    /// Allocates the next commit sequence.
    pub(crate) fn next_seq(&self) -> Sequence {
        Sequence::new(self.next_seq.fetch_add(1, Ordering::SeqCst))
    }

    /// Removes a transaction from the active set.
    pub(crate) fn resolve(&self, id: TxnId) {
        self.active.write().retain(|&t| t != id);
    }

    /// Number of transactions currently active.
    pub(crate) fn active_count(&self) -> usize {
        self.active.read().len()
    }

    pub(crate) fn committed_seq(&self) -> Sequence {
        Sequence::new(self.committed_seq.load(Ordering::SeqCst))
    }

    pub(crate) fn set_committed_seq(&self, seq: Sequence) {
        self.committed_seq.store(seq.as_u64(), Ordering::SeqCst);
    }

    pub(crate) fn commit_lock(&self) -> &Mutex<()> {
        &self.commit_lock
    }
}
