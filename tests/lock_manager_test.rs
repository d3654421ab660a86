use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Result;

mod common;

use crabdb::common::types::Rid;
use crabdb::transaction::{
    AbortReason, IsolationLevel, LockManager, TransactionError, TransactionManager,
    TransactionState,
};

fn setup() -> (Arc<LockManager>, Arc<TransactionManager>) {
    let _ = env_logger::builder().is_test(true).try_init();
    let lock_manager = Arc::new(LockManager::with_detection_interval(Duration::from_millis(10)));
    let transaction_manager = Arc::new(TransactionManager::new(lock_manager.clone()));
    (lock_manager, transaction_manager)
}

#[test]
fn test_shared_locks_coexist() -> Result<()> {
    let (lock_manager, transaction_manager) = setup();
    let rid = Rid::new(1, 1);

    let t1 = transaction_manager.begin(IsolationLevel::RepeatableRead);
    let t2 = transaction_manager.begin(IsolationLevel::RepeatableRead);

    lock_manager.lock_shared(&t1, rid)?;
    lock_manager.lock_shared(&t2, rid)?;

    assert!(t1.is_shared_locked(rid));
    assert!(t2.is_shared_locked(rid));

    transaction_manager.commit(&t1)?;
    transaction_manager.commit(&t2)?;
    Ok(())
}

#[test]
fn test_lock_shared_is_idempotent() -> Result<()> {
    let (lock_manager, transaction_manager) = setup();
    let rid = Rid::new(1, 1);

    let txn = transaction_manager.begin(IsolationLevel::RepeatableRead);
    lock_manager.lock_shared(&txn, rid)?;
    lock_manager.lock_shared(&txn, rid)?;
    assert_eq!(txn.shared_lock_count(), 1);

    transaction_manager.commit(&txn)?;
    Ok(())
}

#[test]
fn test_shared_lock_rejected_under_read_uncommitted() {
    let (lock_manager, transaction_manager) = setup();
    let rid = Rid::new(1, 1);

    let txn = transaction_manager.begin(IsolationLevel::ReadUncommitted);
    let result = lock_manager.lock_shared(&txn, rid);

    assert!(matches!(
        result,
        Err(TransactionError::Abort {
            reason: AbortReason::LockSharedOnReadUncommitted,
            ..
        })
    ));
    assert_eq!(txn.state(), TransactionState::Aborted);
}

#[test]
fn test_lock_on_shrinking_aborts() -> Result<()> {
    let (lock_manager, transaction_manager) = setup();
    let r1 = Rid::new(1, 1);
    let r2 = Rid::new(1, 2);

    let txn = transaction_manager.begin(IsolationLevel::RepeatableRead);
    lock_manager.lock_exclusive(&txn, r1)?;
    lock_manager.unlock(&txn, r1)?;
    assert_eq!(txn.state(), TransactionState::Shrinking);

    let result = lock_manager.lock_shared(&txn, r2);
    assert!(matches!(
        result,
        Err(TransactionError::Abort {
            reason: AbortReason::LockOnShrinking,
            ..
        })
    ));
    assert_eq!(txn.state(), TransactionState::Aborted);

    Ok(())
}

#[test]
fn test_read_committed_shared_release_keeps_growing() -> Result<()> {
    let (lock_manager, transaction_manager) = setup();
    let r1 = Rid::new(1, 1);
    let r2 = Rid::new(1, 2);

    let txn = transaction_manager.begin(IsolationLevel::ReadCommitted);
    lock_manager.lock_shared(&txn, r1)?;
    lock_manager.unlock(&txn, r1)?;

    // Shared unlocks under READ_COMMITTED do not start the shrinking phase.
    assert_eq!(txn.state(), TransactionState::Growing);
    lock_manager.lock_shared(&txn, r2)?;

    transaction_manager.commit(&txn)?;
    Ok(())
}

#[test]
fn test_exclusive_blocks_until_shared_released() -> Result<()> {
    let (lock_manager, transaction_manager) = setup();
    let rid = Rid::new(2, 1);

    let reader = transaction_manager.begin(IsolationLevel::RepeatableRead);
    lock_manager.lock_shared(&reader, rid)?;

    let writer = transaction_manager.begin(IsolationLevel::RepeatableRead);
    let writer_thread = {
        let lock_manager = lock_manager.clone();
        let writer = writer.clone();
        thread::spawn(move || lock_manager.lock_exclusive(&writer, rid))
    };

    // Give the writer time to block, then release the reader.
    thread::sleep(Duration::from_millis(50));
    assert!(!writer.is_exclusive_locked(rid));
    lock_manager.unlock(&reader, rid)?;

    writer_thread.join().unwrap()?;
    assert!(writer.is_exclusive_locked(rid));

    transaction_manager.commit(&writer)?;
    Ok(())
}

#[test]
fn test_upgrade_waits_for_other_readers() -> Result<()> {
    let (lock_manager, transaction_manager) = setup();
    let rid = Rid::new(3, 1);

    let upgrader = transaction_manager.begin(IsolationLevel::RepeatableRead);
    let other = transaction_manager.begin(IsolationLevel::RepeatableRead);
    lock_manager.lock_shared(&upgrader, rid)?;
    lock_manager.lock_shared(&other, rid)?;

    let upgrade_thread = {
        let lock_manager = lock_manager.clone();
        let upgrader = upgrader.clone();
        thread::spawn(move || lock_manager.lock_upgrade(&upgrader, rid))
    };

    thread::sleep(Duration::from_millis(50));
    assert!(!upgrader.is_exclusive_locked(rid));
    lock_manager.unlock(&other, rid)?;

    upgrade_thread.join().unwrap()?;
    assert!(upgrader.is_exclusive_locked(rid));
    assert!(!upgrader.is_shared_locked(rid));

    transaction_manager.commit(&upgrader)?;
    Ok(())
}

#[test]
fn test_second_upgrader_aborts_with_upgrade_conflict() -> Result<()> {
    let (lock_manager, transaction_manager) = setup();
    let rid = Rid::new(3, 2);

    let first = transaction_manager.begin(IsolationLevel::RepeatableRead);
    let second = transaction_manager.begin(IsolationLevel::RepeatableRead);
    lock_manager.lock_shared(&first, rid)?;
    lock_manager.lock_shared(&second, rid)?;

    // First upgrader blocks waiting for the second reader to go away.
    let first_thread = {
        let lock_manager = lock_manager.clone();
        let first = first.clone();
        thread::spawn(move || lock_manager.lock_upgrade(&first, rid))
    };
    thread::sleep(Duration::from_millis(50));

    // Second upgrader must abort immediately.
    let result = lock_manager.lock_upgrade(&second, rid);
    assert!(matches!(
        result,
        Err(TransactionError::Abort {
            reason: AbortReason::UpgradeConflict,
            ..
        })
    ));

    // Its demotion freed the queue, so the first upgrade completes.
    first_thread.join().unwrap()?;
    assert!(first.is_exclusive_locked(rid));

    transaction_manager.commit(&first)?;
    transaction_manager.abort(&second)?;
    Ok(())
}

#[test]
fn test_deadlock_detection_aborts_youngest() -> Result<()> {
    let (lock_manager, transaction_manager) = setup();
    let r1 = Rid::new(4, 1);
    let r2 = Rid::new(4, 2);

    let older = transaction_manager.begin(IsolationLevel::RepeatableRead);
    let younger = transaction_manager.begin(IsolationLevel::RepeatableRead);

    lock_manager.lock_shared(&older, r1)?;
    lock_manager.lock_shared(&younger, r2)?;

    // older waits for r2, younger waits for r1: a cycle.
    let older_thread = {
        let lock_manager = lock_manager.clone();
        let older = older.clone();
        thread::spawn(move || lock_manager.lock_exclusive(&older, r2))
    };
    thread::sleep(Duration::from_millis(30));

    let younger_result = {
        let lock_manager = lock_manager.clone();
        let younger_txn = younger.clone();
        let handle = thread::spawn(move || lock_manager.lock_exclusive(&younger_txn, r1));
        handle.join().unwrap()
    };

    // The detector picks the youngest transaction as the victim; its
    // blocked call returns DEADLOCK and the survivor gets the lock.
    assert!(matches!(
        younger_result,
        Err(TransactionError::Abort {
            reason: AbortReason::Deadlock,
            ..
        })
    ));
    assert_eq!(younger.state(), TransactionState::Aborted);

    transaction_manager.abort(&younger)?;
    older_thread.join().unwrap()?;
    assert!(older.is_exclusive_locked(r2));

    transaction_manager.commit(&older)?;
    Ok(())
}

#[test]
fn test_commit_releases_all_locks() -> Result<()> {
    let (lock_manager, transaction_manager) = setup();
    let r1 = Rid::new(5, 1);
    let r2 = Rid::new(5, 2);

    let txn = transaction_manager.begin(IsolationLevel::RepeatableRead);
    lock_manager.lock_shared(&txn, r1)?;
    lock_manager.lock_exclusive(&txn, r2)?;
    transaction_manager.commit(&txn)?;

    assert_eq!(txn.shared_lock_count(), 0);
    assert_eq!(txn.exclusive_lock_count(), 0);

    // The rows are free for others.
    let other = transaction_manager.begin(IsolationLevel::RepeatableRead);
    lock_manager.lock_exclusive(&other, r1)?;
    lock_manager.lock_exclusive(&other, r2)?;
    transaction_manager.commit(&other)?;

    Ok(())
}

#[test]
fn test_unlock_without_lock_errors() {
    let (lock_manager, transaction_manager) = setup();
    let txn = transaction_manager.begin(IsolationLevel::RepeatableRead);

    assert!(matches!(
        lock_manager.unlock(&txn, Rid::new(6, 1)),
        Err(TransactionError::LockNotHeld(_))
    ));
}
