use std::sync::Arc;

use anyhow::Result;
use tempfile::NamedTempFile;

use crabdb::catalog::schema::{Column, DataType, Schema};
use crabdb::catalog::value::Value;
use crabdb::catalog::Catalog;
use crabdb::query::executor::ExecutorContext;
use crabdb::storage::buffer::BufferPoolManager;
use crabdb::storage::table::Tuple;
use crabdb::transaction::{IsolationLevel, LockManager, Transaction, TransactionManager};

// Keep temp files alive for as long as the structures built on them.
#[allow(dead_code)]
pub fn create_test_buffer_pool(pool_size: usize) -> Result<(Arc<BufferPoolManager>, NamedTempFile)> {
    let _ = env_logger::builder().is_test(true).try_init();
    let file = NamedTempFile::new()?;
    let buffer_pool = Arc::new(BufferPoolManager::new(pool_size, file.path())?);
    Ok((buffer_pool, file))
}

/// The full engine wired together, for executor and transaction tests.
#[allow(dead_code)]
pub struct TestDb {
    pub buffer_pool: Arc<BufferPoolManager>,
    pub catalog: Arc<Catalog>,
    pub lock_manager: Arc<LockManager>,
    pub transaction_manager: Arc<TransactionManager>,
    _file: NamedTempFile,
}

#[allow(dead_code)]
impl TestDb {
    pub fn new() -> Result<Self> {
        let (buffer_pool, file) = create_test_buffer_pool(256)?;
        let catalog = Arc::new(Catalog::new(buffer_pool.clone()));
        let lock_manager = Arc::new(LockManager::new());
        let transaction_manager = Arc::new(TransactionManager::new(lock_manager.clone()));

        Ok(Self {
            buffer_pool,
            catalog,
            lock_manager,
            transaction_manager,
            _file: file,
        })
    }

    pub fn context(&self, txn: &Arc<Transaction>) -> Arc<ExecutorContext> {
        Arc::new(ExecutorContext::new(
            txn.clone(),
            self.catalog.clone(),
            self.buffer_pool.clone(),
            self.lock_manager.clone(),
            self.transaction_manager.clone(),
        ))
    }

    pub fn begin(&self, isolation: IsolationLevel) -> Arc<Transaction> {
        self.transaction_manager.begin(isolation)
    }
}

/// (id INTEGER, name TEXT, value INTEGER)
#[allow(dead_code)]
pub fn accounts_schema() -> Schema {
    Schema::new(vec![
        Column::new("id", DataType::Integer),
        Column::new("name", DataType::Text),
        Column::new("value", DataType::Integer),
    ])
}

#[allow(dead_code)]
pub fn account_row(id: i64, name: &str, value: i64) -> Tuple {
    Tuple::new(vec![
        Value::Integer(id),
        Value::Text(name.to_string()),
        Value::Integer(value),
    ])
}
