use std::sync::Arc;

use crate::catalog::{IndexInfo, TableInfo};
use crate::common::types::Rid;
use crate::query::executor::{ExecutionError, ExecutionResult, Executor, ExecutorContext};
use crate::query::plan::DeletePlan;
use crate::storage::table::Tuple;
use crate::transaction::{IndexWriteRecord, TableWriteRecord};

/// Tombstones each child row (exclusively locked first) and removes its
/// index entries; the deletion becomes permanent only at commit.
pub struct DeleteExecutor {
    context: Arc<ExecutorContext>,
    table_info: Arc<TableInfo>,
    indexes: Vec<Arc<IndexInfo>>,
    child: Box<dyn Executor>,
}

impl DeleteExecutor {
    pub fn new(
        context: Arc<ExecutorContext>,
        plan: DeletePlan,
        child: Box<dyn Executor>,
    ) -> ExecutionResult<Self> {
        let table_info = context
            .catalog
            .get_table_by_oid(plan.table_oid)
            .ok_or(ExecutionError::TableOidNotFound(plan.table_oid))?;
        let indexes = context.catalog.get_table_indexes(&table_info.name);

        Ok(Self {
            context,
            table_info,
            indexes,
            child,
        })
    }
}

impl Executor for DeleteExecutor {
    fn init(&mut self) -> ExecutionResult<()> {
        self.child.init()
    }

    fn next(&mut self) -> ExecutionResult<Option<(Tuple, Rid)>> {
        let (tuple, rid) = match self.child.next()? {
            Some(row) => row,
            None => return Ok(None),
        };

        let txn = &self.context.transaction;
        if txn.is_shared_locked(rid) {
            self.context.lock_manager.lock_upgrade(txn, rid)?;
        } else if !txn.is_exclusive_locked(rid) {
            self.context.lock_manager.lock_exclusive(txn, rid)?;
        }

        self.table_info.table.mark_delete(rid)?;
        txn.append_table_write_record(TableWriteRecord::Delete {
            rid,
            table: self.table_info.table.clone(),
        });

        for index_info in &self.indexes {
            let key = tuple.value(index_info.key_attr);
            index_info.index.delete_entry(&key)?;
            txn.append_index_write_record(IndexWriteRecord::Delete {
                key,
                rid,
                index: index_info.index.clone(),
            });
        }

        Ok(Some((tuple, rid)))
    }
}
