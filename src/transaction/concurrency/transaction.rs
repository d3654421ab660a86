use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

use crate::catalog::value::Value;
use crate::common::types::{Rid, TxnId};
use crate::index::btree::{BPlusTreeIndex, BTreeError};
use crate::storage::table::{TableError, TableHeap, Tuple};

/// Transaction isolation levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
}

/// 2PL transaction states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Growing,
    Shrinking,
    Committed,
    Aborted,
}

/// Why a transaction was forced to abort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    LockOnShrinking,
    LockSharedOnReadUncommitted,
    UpgradeConflict,
    Deadlock,
}

#[derive(Error, Debug)]
pub enum TransactionError {
    #[error("Transaction {txn_id} aborted: {reason:?}")]
    Abort { txn_id: TxnId, reason: AbortReason },

    #[error("Transaction {0} does not hold the expected lock")]
    LockNotHeld(TxnId),

    #[error("Table error: {0}")]
    Table(#[from] TableError),

    #[error("Index error: {0}")]
    Index(#[from] BTreeError),
}

/// One undoable table-heap mutation.
pub enum TableWriteRecord {
    Insert {
        rid: Rid,
        table: Arc<TableHeap>,
    },
    Delete {
        rid: Rid,
        table: Arc<TableHeap>,
    },
    Update {
        rid: Rid,
        old_tuple: Tuple,
        table: Arc<TableHeap>,
    },
}

/// One undoable index mutation.
pub enum IndexWriteRecord {
    Insert {
        key: Value,
        index: Arc<BPlusTreeIndex>,
    },
    Delete {
        key: Value,
        rid: Rid,
        index: Arc<BPlusTreeIndex>,
    },
    Update {
        old_key: Value,
        new_key: Value,
        rid: Rid,
        index: Arc<BPlusTreeIndex>,
    },
}

/// An active transaction: lock ownership, 2PL state and the write log the
/// transaction manager replays backwards on abort. Shared across threads as
/// `Arc<Transaction>` so the deadlock detector can abort it remotely.
pub struct Transaction {
    id: TxnId,
    isolation_level: IsolationLevel,
    state: Mutex<TransactionState>,
    shared_lock_set: Mutex<HashSet<Rid>>,
    exclusive_lock_set: Mutex<HashSet<Rid>>,
    table_write_set: Mutex<Vec<TableWriteRecord>>,
    index_write_set: Mutex<Vec<IndexWriteRecord>>,
}

impl Transaction {
    pub fn new(id: TxnId, isolation_level: IsolationLevel) -> Self {
        Self {
            id,
            isolation_level,
            state: Mutex::new(TransactionState::Growing),
            shared_lock_set: Mutex::new(HashSet::new()),
            exclusive_lock_set: Mutex::new(HashSet::new()),
            table_write_set: Mutex::new(Vec::new()),
            index_write_set: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> TxnId {
        self.id
    }

    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation_level
    }

    pub fn state(&self) -> TransactionState {
        *self.state.lock()
    }

    pub fn set_state(&self, state: TransactionState) {
        *self.state.lock() = state;
    }

    pub fn is_aborted(&self) -> bool {
        self.state() == TransactionState::Aborted
    }

    // ---- lock bookkeeping (driven by the lock manager) ----

    pub fn is_shared_locked(&self, rid: Rid) -> bool {
        self.shared_lock_set.lock().contains(&rid)
    }

    pub fn is_exclusive_locked(&self, rid: Rid) -> bool {
        self.exclusive_lock_set.lock().contains(&rid)
    }

    pub fn shared_lock_count(&self) -> usize {
        self.shared_lock_set.lock().len()
    }

    pub fn exclusive_lock_count(&self) -> usize {
        self.exclusive_lock_set.lock().len()
    }

    /// Snapshot of every held lock, shared then exclusive.
    pub fn held_locks(&self) -> Vec<Rid> {
        let mut rids: Vec<Rid> = self.shared_lock_set.lock().iter().copied().collect();
        rids.extend(self.exclusive_lock_set.lock().iter().copied());
        rids
    }

    pub(crate) fn add_shared_lock(&self, rid: Rid) {
        self.shared_lock_set.lock().insert(rid);
    }

    pub(crate) fn add_exclusive_lock(&self, rid: Rid) {
        self.exclusive_lock_set.lock().insert(rid);
    }

    pub(crate) fn remove_shared_lock(&self, rid: Rid) {
        self.shared_lock_set.lock().remove(&rid);
    }

    pub(crate) fn remove_exclusive_lock(&self, rid: Rid) {
        self.exclusive_lock_set.lock().remove(&rid);
    }

    // ---- write log ----

    pub fn append_table_write_record(&self, record: TableWriteRecord) {
        self.table_write_set.lock().push(record);
    }

    pub fn append_index_write_record(&self, record: IndexWriteRecord) {
        self.index_write_set.lock().push(record);
    }

    pub(crate) fn take_table_write_records(&self) -> Vec<TableWriteRecord> {
        std::mem::take(&mut *self.table_write_set.lock())
    }

    pub(crate) fn take_index_write_records(&self) -> Vec<IndexWriteRecord> {
        std::mem::take(&mut *self.index_write_set.lock())
    }
}
