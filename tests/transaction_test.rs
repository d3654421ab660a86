use std::collections::HashMap;

use anyhow::Result;

mod common;
use common::{account_row, accounts_schema, TestDb};

use crabdb::catalog::expression::{ComparisonOp, Expression};
use crabdb::catalog::value::Value;
use crabdb::query::executor::{
    DeleteExecutor, Executor, InsertExecutor, SeqScanExecutor, UpdateExecutor,
};
use crabdb::query::plan::{DeletePlan, InsertPlan, SeqScanPlan, UpdateAction, UpdatePlan};
use crabdb::storage::table::Tuple;
use crabdb::transaction::IsolationLevel;

fn identity_exprs(column_count: usize) -> Vec<Expression> {
    (0..column_count).map(Expression::column).collect()
}

fn drain(executor: &mut dyn Executor) -> Result<Vec<Tuple>> {
    executor.init()?;
    let mut rows = Vec::new();
    while let Some((tuple, _rid)) = executor.next()? {
        rows.push(tuple);
    }
    Ok(rows)
}

fn scan_all(db: &TestDb, table: &str) -> Result<Vec<Tuple>> {
    let table_info = db.catalog.get_table(table).unwrap();
    let txn = db.begin(IsolationLevel::ReadUncommitted);
    let mut scan = SeqScanExecutor::new(
        db.context(&txn),
        SeqScanPlan {
            table_oid: table_info.oid,
            predicate: None,
            output_exprs: identity_exprs(table_info.schema.column_count()),
        },
    )?;
    let rows = drain(&mut scan)?;
    db.transaction_manager.commit(&txn)?;
    Ok(rows)
}

fn seed(db: &TestDb) -> Result<()> {
    let table_info = db.catalog.create_table("accounts", accounts_schema())?;
    let txn = db.begin(IsolationLevel::RepeatableRead);
    let mut insert = InsertExecutor::new(
        db.context(&txn),
        InsertPlan {
            table_oid: table_info.oid,
            raw_values: Some(vec![
                vec![Value::Integer(1), Value::Text("alice".into()), Value::Integer(100)],
                vec![Value::Integer(2), Value::Text("bob".into()), Value::Integer(200)],
            ]),
        },
        None,
    )?;
    drain(&mut insert)?;
    db.transaction_manager.commit(&txn)?;
    Ok(())
}

#[test]
fn test_aborted_insert_disappears() -> Result<()> {
    let db = TestDb::new()?;
    seed(&db)?;
    let table_info = db.catalog.get_table("accounts").unwrap();

    let txn = db.begin(IsolationLevel::RepeatableRead);
    let mut insert = InsertExecutor::new(
        db.context(&txn),
        InsertPlan {
            table_oid: table_info.oid,
            raw_values: Some(vec![vec![
                Value::Integer(3),
                Value::Text("mallory".into()),
                Value::Integer(666),
            ]]),
        },
        None,
    )?;
    drain(&mut insert)?;
    db.transaction_manager.abort(&txn)?;

    let rows = scan_all(&db, "accounts")?;
    assert_eq!(
        rows,
        vec![account_row(1, "alice", 100), account_row(2, "bob", 200)]
    );

    Ok(())
}

#[test]
fn test_aborted_update_restores_old_values() -> Result<()> {
    let db = TestDb::new()?;
    seed(&db)?;
    let table_info = db.catalog.get_table("accounts").unwrap();

    let txn = db.begin(IsolationLevel::RepeatableRead);
    let context = db.context(&txn);
    let scan = SeqScanExecutor::new(
        context.clone(),
        SeqScanPlan {
            table_oid: table_info.oid,
            predicate: None,
            output_exprs: identity_exprs(3),
        },
    )?;
    let mut update_attrs = HashMap::new();
    update_attrs.insert(2usize, UpdateAction::Set(Value::Integer(0)));
    let mut update = UpdateExecutor::new(
        context,
        UpdatePlan {
            table_oid: table_info.oid,
            update_attrs,
        },
        Box::new(scan),
    )?;
    let updated = drain(&mut update)?;
    assert_eq!(updated.len(), 2);

    db.transaction_manager.abort(&txn)?;

    let rows = scan_all(&db, "accounts")?;
    assert_eq!(
        rows,
        vec![account_row(1, "alice", 100), account_row(2, "bob", 200)]
    );

    Ok(())
}

#[test]
fn test_aborted_delete_resurrects_rows() -> Result<()> {
    let db = TestDb::new()?;
    seed(&db)?;
    let table_info = db.catalog.get_table("accounts").unwrap();

    let txn = db.begin(IsolationLevel::RepeatableRead);
    let context = db.context(&txn);
    let scan = SeqScanExecutor::new(
        context.clone(),
        SeqScanPlan {
            table_oid: table_info.oid,
            predicate: None,
            output_exprs: identity_exprs(3),
        },
    )?;
    let mut delete = DeleteExecutor::new(
        context,
        DeletePlan {
            table_oid: table_info.oid,
        },
        Box::new(scan),
    )?;
    let deleted = drain(&mut delete)?;
    assert_eq!(deleted.len(), 2);

    // Mid-transaction the rows are invisible.
    assert!(table_info.table.get_tuple(
        crabdb::common::types::Rid::new(table_info.table.first_page_id(), 0)
    )?.is_none());

    db.transaction_manager.abort(&txn)?;

    let rows = scan_all(&db, "accounts")?;
    assert_eq!(rows.len(), 2);

    Ok(())
}

#[test]
fn test_committed_delete_is_permanent() -> Result<()> {
    let db = TestDb::new()?;
    seed(&db)?;
    let table_info = db.catalog.get_table("accounts").unwrap();

    let txn = db.begin(IsolationLevel::RepeatableRead);
    let context = db.context(&txn);
    let scan = SeqScanExecutor::new(
        context.clone(),
        SeqScanPlan {
            table_oid: table_info.oid,
            predicate: Some(Expression::compare(
                ComparisonOp::Equal,
                Expression::column(0),
                Expression::constant(Value::Integer(1)),
            )),
            output_exprs: identity_exprs(3),
        },
    )?;
    let mut delete = DeleteExecutor::new(
        context,
        DeletePlan {
            table_oid: table_info.oid,
        },
        Box::new(scan),
    )?;
    drain(&mut delete)?;
    db.transaction_manager.commit(&txn)?;

    let rows = scan_all(&db, "accounts")?;
    assert_eq!(rows, vec![account_row(2, "bob", 200)]);

    Ok(())
}

#[test]
fn test_aborted_update_restores_index_entries() -> Result<()> {
    let db = TestDb::new()?;
    seed(&db)?;
    let index_info = db.catalog.create_index("accounts_id_idx", "accounts", 0)?;
    let table_info = db.catalog.get_table("accounts").unwrap();

    let txn = db.begin(IsolationLevel::RepeatableRead);
    let context = db.context(&txn);
    let scan = SeqScanExecutor::new(
        context.clone(),
        SeqScanPlan {
            table_oid: table_info.oid,
            predicate: Some(Expression::compare(
                ComparisonOp::Equal,
                Expression::column(0),
                Expression::constant(Value::Integer(2)),
            )),
            output_exprs: identity_exprs(3),
        },
    )?;
    let mut update_attrs = HashMap::new();
    update_attrs.insert(0usize, UpdateAction::Set(Value::Integer(20)));
    let mut update = UpdateExecutor::new(
        context,
        UpdatePlan {
            table_oid: table_info.oid,
            update_attrs,
        },
        Box::new(scan),
    )?;
    drain(&mut update)?;

    // Mid-transaction the index reflects the new key.
    assert!(index_info.index.scan_key(&Value::Integer(2))?.is_empty());
    assert_eq!(index_info.index.scan_key(&Value::Integer(20))?.len(), 1);

    db.transaction_manager.abort(&txn)?;

    assert_eq!(index_info.index.scan_key(&Value::Integer(2))?.len(), 1);
    assert!(index_info.index.scan_key(&Value::Integer(20))?.is_empty());

    Ok(())
}
