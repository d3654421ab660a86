use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use log::debug;
use parking_lot::Mutex;

use crate::common::types::TxnId;
use crate::transaction::concurrency::lock_manager::LockManager;
use crate::transaction::concurrency::transaction::{
    IndexWriteRecord, IsolationLevel, TableWriteRecord, Transaction, TransactionError,
    TransactionState,
};

/// Creates and finalises transactions. Commit makes tombstoned deletes
/// permanent; abort replays the write log backwards so heap and index state
/// return to where the transaction found them. Both release every held lock.
pub struct TransactionManager {
    next_txn_id: AtomicU32,
    lock_manager: Arc<LockManager>,
    active_transactions: Mutex<HashMap<TxnId, Arc<Transaction>>>,
}

impl TransactionManager {
    pub fn new(lock_manager: Arc<LockManager>) -> Self {
        Self {
            next_txn_id: AtomicU32::new(1),
            lock_manager,
            active_transactions: Mutex::new(HashMap::new()),
        }
    }

    pub fn begin(&self, isolation_level: IsolationLevel) -> Arc<Transaction> {
        let txn_id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
        let txn = Arc::new(Transaction::new(txn_id, isolation_level));
        self.active_transactions.lock().insert(txn_id, txn.clone());
        debug!("txn {} started ({:?})", txn_id, isolation_level);
        txn
    }

    pub fn get_transaction(&self, txn_id: TxnId) -> Option<Arc<Transaction>> {
        self.active_transactions.lock().get(&txn_id).cloned()
    }

    pub fn commit(&self, txn: &Arc<Transaction>) -> Result<(), TransactionError> {
        // Deletes were only tombstoned while the transaction ran; make them
        // permanent now.
        for record in txn.take_table_write_records() {
            if let TableWriteRecord::Delete { rid, table } = record {
                table.apply_delete(rid)?;
            }
        }
        txn.take_index_write_records();

        self.release_all_locks(txn)?;
        txn.set_state(TransactionState::Committed);
        self.active_transactions.lock().remove(&txn.id());
        debug!("txn {} committed", txn.id());

        Ok(())
    }

    pub fn abort(&self, txn: &Arc<Transaction>) -> Result<(), TransactionError> {
        // Undo heap mutations, newest first.
        for record in txn.take_table_write_records().into_iter().rev() {
            match record {
                TableWriteRecord::Insert { rid, table } => {
                    table.apply_delete(rid)?;
                }
                TableWriteRecord::Delete { rid, table } => {
                    table.rollback_delete(rid)?;
                }
                TableWriteRecord::Update { rid, old_tuple, table } => {
                    table.update_tuple(&old_tuple, rid)?;
                }
            }
        }

        // Undo index mutations, newest first.
        for record in txn.take_index_write_records().into_iter().rev() {
            match record {
                IndexWriteRecord::Insert { key, index } => {
                    index.delete_entry(&key)?;
                }
                IndexWriteRecord::Delete { key, rid, index } => {
                    index.insert_entry(&key, rid)?;
                }
                IndexWriteRecord::Update { old_key, new_key, rid, index } => {
                    index.delete_entry(&new_key)?;
                    index.insert_entry(&old_key, rid)?;
                }
            }
        }

        self.release_all_locks(txn)?;
        txn.set_state(TransactionState::Aborted);
        self.active_transactions.lock().remove(&txn.id());
        debug!("txn {} aborted", txn.id());

        Ok(())
    }

    fn release_all_locks(&self, txn: &Arc<Transaction>) -> Result<(), TransactionError> {
        for rid in txn.held_locks() {
            self.lock_manager.unlock(txn, rid)?;
        }
        Ok(())
    }
}
