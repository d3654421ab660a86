use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, info};
use parking_lot::{Condvar, Mutex};

use crate::common::types::{Rid, TxnId};
use crate::transaction::concurrency::transaction::{
    AbortReason, IsolationLevel, Transaction, TransactionError, TransactionState,
};

const DEFAULT_DETECTION_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

struct LockRequest {
    txn: Arc<Transaction>,
    mode: LockMode,
    granted: bool,
}

/// Per-RID request queue. All queues share the manager's mutex; each has its
/// own condition variable so unlocks only wake waiters for that row.
struct LockQueue {
    requests: VecDeque<LockRequest>,
    reader_count: u32,
    writer_entered: bool,
    upgrading: bool,
    cv: Arc<Condvar>,
}

impl Default for LockQueue {
    fn default() -> Self {
        Self {
            requests: VecDeque::new(),
            reader_count: 0,
            writer_entered: false,
            upgrading: false,
            cv: Arc::new(Condvar::new()),
        }
    }
}

type LockTable = HashMap<Rid, LockQueue>;

struct LockManagerInner {
    lock_table: Mutex<LockTable>,
    shutdown: AtomicBool,
    detection_interval: Duration,
}

/// Row-level strict two-phase locking with shared/exclusive modes, a single
/// upgrade slot per queue, and a background wait-for-graph deadlock detector
/// that aborts the youngest transaction on each cycle.
pub struct LockManager {
    inner: Arc<LockManagerInner>,
    detector: Mutex<Option<JoinHandle<()>>>,
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LockManager {
    pub fn new() -> Self {
        Self::with_detection_interval(DEFAULT_DETECTION_INTERVAL)
    }

    pub fn with_detection_interval(detection_interval: Duration) -> Self {
        let inner = Arc::new(LockManagerInner {
            lock_table: Mutex::new(HashMap::new()),
            shutdown: AtomicBool::new(false),
            detection_interval,
        });

        let thread_inner = inner.clone();
        let handle = thread::spawn(move || {
            while !thread_inner.shutdown.load(Ordering::Relaxed) {
                thread::sleep(thread_inner.detection_interval);
                if thread_inner.shutdown.load(Ordering::Relaxed) {
                    break;
                }
                Self::run_detection(&thread_inner);
            }
        });

        Self {
            inner,
            detector: Mutex::new(Some(handle)),
        }
    }

    /// Acquire a shared lock on `rid`, blocking while a writer is present.
    pub fn lock_shared(&self, txn: &Arc<Transaction>, rid: Rid) -> Result<(), TransactionError> {
        let mut table = self.inner.lock_table.lock();

        Self::check_shrinking(txn)?;

        // Dirty reads are the point of READ_UNCOMMITTED; asking for a shared
        // lock under it is a programming error.
        if txn.isolation_level() == IsolationLevel::ReadUncommitted {
            txn.set_state(TransactionState::Aborted);
            return Err(TransactionError::Abort {
                txn_id: txn.id(),
                reason: AbortReason::LockSharedOnReadUncommitted,
            });
        }

        if txn.is_shared_locked(rid) || txn.is_exclusive_locked(rid) {
            return Ok(());
        }

        let queue = table.entry(rid).or_default();
        queue.requests.push_back(LockRequest {
            txn: txn.clone(),
            mode: LockMode::Shared,
            granted: false,
        });
        let cv = queue.cv.clone();

        debug!("txn {} waiting for shared lock on {}", txn.id(), rid);
        loop {
            let queue = Self::queue_of(&mut table, rid, txn.id())?;
            if !queue.writer_entered || txn.is_aborted() {
                break;
            }
            cv.wait(&mut table);
        }

        if txn.is_aborted() {
            Self::drop_request(&mut table, txn.id(), rid);
            return Err(TransactionError::Abort {
                txn_id: txn.id(),
                reason: AbortReason::Deadlock,
            });
        }

        let queue = Self::queue_of(&mut table, rid, txn.id())?;
        queue.reader_count += 1;
        Self::grant_request(queue, txn.id());
        txn.add_shared_lock(rid);
        debug!("txn {} acquired shared lock on {}", txn.id(), rid);

        Ok(())
    }

    /// Acquire an exclusive lock on `rid`, blocking while any other lock is
    /// held.
    pub fn lock_exclusive(&self, txn: &Arc<Transaction>, rid: Rid) -> Result<(), TransactionError> {
        let mut table = self.inner.lock_table.lock();

        Self::check_shrinking(txn)?;

        if txn.is_exclusive_locked(rid) {
            return Ok(());
        }

        let queue = table.entry(rid).or_default();
        queue.requests.push_back(LockRequest {
            txn: txn.clone(),
            mode: LockMode::Exclusive,
            granted: false,
        });
        let cv = queue.cv.clone();

        debug!("txn {} waiting for exclusive lock on {}", txn.id(), rid);
        loop {
            let queue = Self::queue_of(&mut table, rid, txn.id())?;
            if (!queue.writer_entered && queue.reader_count == 0) || txn.is_aborted() {
                break;
            }
            cv.wait(&mut table);
        }

        if txn.is_aborted() {
            Self::drop_request(&mut table, txn.id(), rid);
            return Err(TransactionError::Abort {
                txn_id: txn.id(),
                reason: AbortReason::Deadlock,
            });
        }

        let queue = Self::queue_of(&mut table, rid, txn.id())?;
        queue.writer_entered = true;
        Self::grant_request(queue, txn.id());
        txn.add_exclusive_lock(rid);
        debug!("txn {} acquired exclusive lock on {}", txn.id(), rid);

        Ok(())
    }

    /// Upgrade a held shared lock to exclusive. Only one upgrade may wait per
    /// queue; a second upgrader aborts with UPGRADE_CONFLICT.
    pub fn lock_upgrade(&self, txn: &Arc<Transaction>, rid: Rid) -> Result<(), TransactionError> {
        let mut table = self.inner.lock_table.lock();

        if !txn.is_shared_locked(rid) {
            return Err(TransactionError::LockNotHeld(txn.id()));
        }

        // Demote our shared grant back to a waiting exclusive request,
        // waking anyone who was only waiting for the readers to drain.
        txn.remove_shared_lock(rid);
        let queue = Self::queue_of(&mut table, rid, txn.id())?;
        queue.reader_count -= 1;
        if queue.reader_count == 0 {
            queue.cv.notify_all();
        }
        if let Some(request) = queue.requests.iter_mut().find(|r| r.txn.id() == txn.id()) {
            request.mode = LockMode::Exclusive;
            request.granted = false;
        }

        if queue.upgrading {
            txn.set_state(TransactionState::Aborted);
            Self::drop_request(&mut table, txn.id(), rid);
            return Err(TransactionError::Abort {
                txn_id: txn.id(),
                reason: AbortReason::UpgradeConflict,
            });
        }

        queue.upgrading = true;
        let cv = queue.cv.clone();

        debug!("txn {} waiting to upgrade lock on {}", txn.id(), rid);
        loop {
            let queue = Self::queue_of(&mut table, rid, txn.id())?;
            if (!queue.writer_entered && queue.reader_count == 0) || txn.is_aborted() {
                break;
            }
            cv.wait(&mut table);
        }

        if txn.is_aborted() {
            let queue = Self::queue_of(&mut table, rid, txn.id())?;
            queue.upgrading = false;
            Self::drop_request(&mut table, txn.id(), rid);
            return Err(TransactionError::Abort {
                txn_id: txn.id(),
                reason: AbortReason::Deadlock,
            });
        }

        let queue = Self::queue_of(&mut table, rid, txn.id())?;
        queue.upgrading = false;
        queue.writer_entered = true;
        Self::grant_request(queue, txn.id());
        txn.add_exclusive_lock(rid);
        debug!("txn {} upgraded lock on {}", txn.id(), rid);

        Ok(())
    }

    /// Release a held lock. Shifts the transaction into SHRINKING except for
    /// shared locks under READ_COMMITTED.
    pub fn unlock(&self, txn: &Arc<Transaction>, rid: Rid) -> Result<(), TransactionError> {
        let mut table = self.inner.lock_table.lock();

        let queue = Self::queue_of(&mut table, rid, txn.id())?;
        let position = queue
            .requests
            .iter()
            .position(|r| r.txn.id() == txn.id())
            .ok_or(TransactionError::LockNotHeld(txn.id()))?;
        let request = match queue.requests.remove(position) {
            Some(request) => request,
            None => return Err(TransactionError::LockNotHeld(txn.id())),
        };

        txn.remove_shared_lock(rid);
        txn.remove_exclusive_lock(rid);

        if txn.state() == TransactionState::Growing
            && !(request.mode == LockMode::Shared
                && txn.isolation_level() == IsolationLevel::ReadCommitted)
        {
            txn.set_state(TransactionState::Shrinking);
        }

        match request.mode {
            LockMode::Shared => {
                queue.reader_count -= 1;
                if queue.reader_count == 0 {
                    queue.cv.notify_all();
                }
            }
            LockMode::Exclusive => {
                queue.writer_entered = false;
                queue.cv.notify_all();
            }
        }
        debug!("txn {} released lock on {}", txn.id(), rid);

        Ok(())
    }

    /// Run one deadlock-detection pass immediately (the background thread
    /// does this on its own every `detection_interval`).
    pub fn run_detection_once(&self) {
        Self::run_detection(&self.inner);
    }

    // ---- internals ----

    fn check_shrinking(txn: &Arc<Transaction>) -> Result<(), TransactionError> {
        if txn.state() == TransactionState::Shrinking {
            txn.set_state(TransactionState::Aborted);
            return Err(TransactionError::Abort {
                txn_id: txn.id(),
                reason: AbortReason::LockOnShrinking,
            });
        }
        Ok(())
    }

    fn queue_of(
        table: &mut LockTable,
        rid: Rid,
        txn_id: TxnId,
    ) -> Result<&mut LockQueue, TransactionError> {
        // The queue cannot vanish while a request of ours sits in it.
        table
            .get_mut(&rid)
            .ok_or(TransactionError::LockNotHeld(txn_id))
    }

    fn grant_request(queue: &mut LockQueue, txn_id: TxnId) {
        if let Some(request) = queue.requests.iter_mut().find(|r| r.txn.id() == txn_id) {
            request.granted = true;
        }
    }

    fn drop_request(table: &mut LockTable, txn_id: TxnId, rid: Rid) {
        if let Some(queue) = table.get_mut(&rid) {
            if let Some(position) = queue.requests.iter().position(|r| r.txn.id() == txn_id) {
                queue.requests.remove(position);
            }
        }
    }

    /// Build a fresh wait-for graph from the queues and abort a victim per
    /// cycle until none remain. Runs entirely under the manager's mutex.
    fn run_detection(inner: &LockManagerInner) {
        let table = inner.lock_table.lock();

        let mut waits_for: BTreeMap<TxnId, Vec<TxnId>> = BTreeMap::new();
        let mut wait_rids: HashMap<TxnId, Rid> = HashMap::new();
        let mut handles: HashMap<TxnId, Arc<Transaction>> = HashMap::new();

        for (rid, queue) in table.iter() {
            let granted: Vec<TxnId> = queue
                .requests
                .iter()
                .filter(|r| r.granted)
                .map(|r| r.txn.id())
                .collect();

            for request in queue.requests.iter().filter(|r| !r.granted) {
                let waiter = request.txn.id();
                handles.insert(waiter, request.txn.clone());
                wait_rids.insert(waiter, *rid);

                let edges = waits_for.entry(waiter).or_default();
                for &holder in &granted {
                    if holder != waiter && !edges.contains(&holder) {
                        edges.push(holder);
                    }
                }
            }
        }

        loop {
            let victim = match Self::find_cycle_victim(&waits_for) {
                Some(victim) => victim,
                None => break,
            };

            info!("deadlock detected, aborting txn {}", victim);
            if let Some(txn) = handles.get(&victim) {
                txn.set_state(TransactionState::Aborted);
            }

            // Remove the victim from the graph and wake it out of its wait.
            waits_for.remove(&victim);
            for edges in waits_for.values_mut() {
                edges.retain(|&t| t != victim);
            }
            if let Some(rid) = wait_rids.get(&victim) {
                if let Some(queue) = table.get(rid) {
                    queue.cv.notify_all();
                }
            }
        }
    }

    /// Deterministic cycle search: vertices in ascending txn id, neighbours
    /// sorted ascending. On a back edge the youngest transaction (highest
    /// id) on the DFS stack is the victim.
    fn find_cycle_victim(waits_for: &BTreeMap<TxnId, Vec<TxnId>>) -> Option<TxnId> {
        for &start in waits_for.keys() {
            let mut on_stack = HashSet::new();
            if let Some(victim) = Self::dfs(start, waits_for, &mut on_stack) {
                return Some(victim);
            }
        }
        None
    }

    fn dfs(
        txn_id: TxnId,
        waits_for: &BTreeMap<TxnId, Vec<TxnId>>,
        on_stack: &mut HashSet<TxnId>,
    ) -> Option<TxnId> {
        on_stack.insert(txn_id);

        let mut neighbours = waits_for.get(&txn_id).cloned().unwrap_or_default();
        neighbours.sort_unstable();

        for next in neighbours {
            if on_stack.contains(&next) {
                return on_stack.iter().copied().max();
            }
            if let Some(victim) = Self::dfs(next, waits_for, on_stack) {
                return Some(victim);
            }
        }

        on_stack.remove(&txn_id);
        None
    }
}

impl Drop for LockManager {
    fn drop(&mut self) {
        self.inner.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.detector.lock().take() {
            let _ = handle.join();
        }
    }
}
