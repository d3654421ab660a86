use std::sync::Arc;

use crate::catalog::value::Value;
use crate::catalog::{IndexInfo, TableInfo};
use crate::common::types::Rid;
use crate::query::executor::{ExecutionError, ExecutionResult, Executor, ExecutorContext};
use crate::query::plan::{UpdateAction, UpdatePlan};
use crate::storage::table::Tuple;
use crate::transaction::{IndexWriteRecord, TableWriteRecord};

/// Rewrites each child row in place, exclusively locking it first (upgrading
/// a shared lock when the scan below already holds one) and keeping the old
/// image in the write log for rollback.
pub struct UpdateExecutor {
    context: Arc<ExecutorContext>,
    plan: UpdatePlan,
    table_info: Arc<TableInfo>,
    indexes: Vec<Arc<IndexInfo>>,
    child: Box<dyn Executor>,
}

impl UpdateExecutor {
    pub fn new(
        context: Arc<ExecutorContext>,
        plan: UpdatePlan,
        child: Box<dyn Executor>,
    ) -> ExecutionResult<Self> {
        let table_info = context
            .catalog
            .get_table_by_oid(plan.table_oid)
            .ok_or(ExecutionError::TableOidNotFound(plan.table_oid))?;
        let indexes = context.catalog.get_table_indexes(&table_info.name);

        Ok(Self {
            context,
            plan,
            table_info,
            indexes,
            child,
        })
    }

    fn generate_updated_tuple(&self, tuple: &Tuple) -> Tuple {
        let values = tuple
            .values()
            .iter()
            .enumerate()
            .map(|(i, value)| match self.plan.update_attrs.get(&i) {
                Some(UpdateAction::Set(new_value)) => new_value.clone(),
                Some(UpdateAction::Add(delta)) => value.add(&Value::Integer(*delta)),
                None => value.clone(),
            })
            .collect();
        Tuple::new(values)
    }
}

impl Executor for UpdateExecutor {
    fn init(&mut self) -> ExecutionResult<()> {
        self.child.init()
    }

    fn next(&mut self) -> ExecutionResult<Option<(Tuple, Rid)>> {
        let (old_tuple, rid) = match self.child.next()? {
            Some(row) => row,
            None => return Ok(None),
        };

        let new_tuple = self.generate_updated_tuple(&old_tuple);

        let txn = &self.context.transaction;
        if txn.is_shared_locked(rid) {
            self.context.lock_manager.lock_upgrade(txn, rid)?;
        } else if !txn.is_exclusive_locked(rid) {
            self.context.lock_manager.lock_exclusive(txn, rid)?;
        }

        self.table_info.table.update_tuple(&new_tuple, rid)?;
        txn.append_table_write_record(TableWriteRecord::Update {
            rid,
            old_tuple: old_tuple.clone(),
            table: self.table_info.table.clone(),
        });

        for index_info in &self.indexes {
            let old_key = old_tuple.value(index_info.key_attr);
            let new_key = new_tuple.value(index_info.key_attr);

            index_info.index.delete_entry(&old_key)?;
            index_info.index.insert_entry(&new_key, rid)?;
            txn.append_index_write_record(IndexWriteRecord::Update {
                old_key,
                new_key,
                rid,
                index: index_info.index.clone(),
            });
        }

        Ok(Some((new_tuple, rid)))
    }
}
