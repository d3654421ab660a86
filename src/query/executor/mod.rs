//! Volcano-style execution engine.
//!
//! Every operator implements [`Executor`]: `init` prepares it, `next` pulls
//! one output row at a time until `None`. Parents drive children; mutating
//! operators route their row locks through the lock manager before touching
//! the table heap.

pub mod aggregation;
pub mod delete;
pub mod index_scan;
pub mod insert;
pub mod nested_index_join;
pub mod nested_loop_join;
pub mod seq_scan;
pub mod update;

use std::sync::Arc;

use thiserror::Error;

use crate::catalog::expression::Expression;
use crate::catalog::schema::Schema;
use crate::catalog::Catalog;
use crate::common::types::{Rid, TableOid};
use crate::index::btree::BTreeError;
use crate::storage::buffer::{BufferPoolError, BufferPoolManager};
use crate::storage::table::{TableError, Tuple};
use crate::transaction::{LockManager, Transaction, TransactionError, TransactionManager};

pub use aggregation::AggregationExecutor;
pub use delete::DeleteExecutor;
pub use index_scan::IndexScanExecutor;
pub use insert::InsertExecutor;
pub use nested_index_join::NestedIndexJoinExecutor;
pub use nested_loop_join::NestedLoopJoinExecutor;
pub use seq_scan::SeqScanExecutor;
pub use update::UpdateExecutor;

#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Table oid {0} not found")]
    TableOidNotFound(TableOid),

    #[error("Table '{0}' not found")]
    TableNotFound(String),

    #[error("Index '{0}' not found on table '{1}'")]
    IndexNotFound(String, String),

    #[error("Transaction error: {0}")]
    Transaction(#[from] TransactionError),

    #[error("Table error: {0}")]
    Table(#[from] TableError),

    #[error("Index error: {0}")]
    Index(#[from] BTreeError),

    #[error("Buffer pool error: {0}")]
    Buffer(#[from] BufferPoolError),
}

pub type ExecutionResult<T> = Result<T, ExecutionError>;

/// Everything an executor needs, constructor-injected: no globals.
pub struct ExecutorContext {
    pub transaction: Arc<Transaction>,
    pub catalog: Arc<Catalog>,
    pub buffer_pool: Arc<BufferPoolManager>,
    pub lock_manager: Arc<LockManager>,
    pub transaction_manager: Arc<TransactionManager>,
}

impl ExecutorContext {
    pub fn new(
        transaction: Arc<Transaction>,
        catalog: Arc<Catalog>,
        buffer_pool: Arc<BufferPoolManager>,
        lock_manager: Arc<LockManager>,
        transaction_manager: Arc<TransactionManager>,
    ) -> Self {
        Self {
            transaction,
            catalog,
            buffer_pool,
            lock_manager,
            transaction_manager,
        }
    }
}

/// The iterator contract every operator implements.
pub trait Executor {
    fn init(&mut self) -> ExecutionResult<()>;

    fn next(&mut self) -> ExecutionResult<Option<(Tuple, Rid)>>;
}

/// Project a tuple through the output expressions.
pub(crate) fn project(exprs: &[Expression], tuple: &Tuple, schema: &Schema) -> Tuple {
    Tuple::new(exprs.iter().map(|e| e.evaluate(tuple, schema)).collect())
}

/// Project a pair of join tuples through the output expressions.
pub(crate) fn project_join(
    exprs: &[Expression],
    left: &Tuple,
    left_schema: &Schema,
    right: &Tuple,
    right_schema: &Schema,
) -> Tuple {
    Tuple::new(
        exprs
            .iter()
            .map(|e| e.evaluate_join(left, left_schema, right, right_schema))
            .collect(),
    )
}
