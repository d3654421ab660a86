use std::sync::Arc;

use crate::catalog::{IndexInfo, TableInfo};
use crate::common::types::Rid;
use crate::query::executor::{ExecutionError, ExecutionResult, Executor, ExecutorContext};
use crate::query::plan::InsertPlan;
use crate::storage::table::Tuple;
use crate::transaction::{IndexWriteRecord, TableWriteRecord};

/// Appends rows to a table and to every index on it. Rows come from the
/// plan's raw values or from the child executor.
pub struct InsertExecutor {
    context: Arc<ExecutorContext>,
    plan: InsertPlan,
    table_info: Arc<TableInfo>,
    indexes: Vec<Arc<IndexInfo>>,
    child: Option<Box<dyn Executor>>,
    raw_cursor: usize,
}

impl InsertExecutor {
    pub fn new(
        context: Arc<ExecutorContext>,
        plan: InsertPlan,
        child: Option<Box<dyn Executor>>,
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
            raw_cursor: 0,
        })
    }

    fn insert_tuple(&self, tuple: &Tuple) -> ExecutionResult<Rid> {
        let txn = &self.context.transaction;

        let rid = self.table_info.table.insert_tuple(tuple)?;
        txn.append_table_write_record(TableWriteRecord::Insert {
            rid,
            table: self.table_info.table.clone(),
        });

        for index_info in &self.indexes {
            let key = tuple.value(index_info.key_attr);
            if index_info.index.insert_entry(&key, rid)? {
                txn.append_index_write_record(IndexWriteRecord::Insert {
                    key,
                    index: index_info.index.clone(),
                });
            }
        }

        Ok(rid)
    }
}

impl Executor for InsertExecutor {
    fn init(&mut self) -> ExecutionResult<()> {
        if self.plan.raw_values.is_none() {
            if let Some(child) = self.child.as_mut() {
                child.init()?;
            }
        }
        Ok(())
    }

    fn next(&mut self) -> ExecutionResult<Option<(Tuple, Rid)>> {
        if let Some(raw_values) = &self.plan.raw_values {
            let values = match raw_values.get(self.raw_cursor) {
                Some(values) => values.clone(),
                None => return Ok(None),
            };
            self.raw_cursor += 1;

            let tuple = Tuple::new(values);
            let rid = self.insert_tuple(&tuple)?;
            return Ok(Some((tuple, rid)));
        }

        let child = match self.child.as_mut() {
            Some(child) => child,
            None => return Ok(None),
        };
        match child.next()? {
            Some((tuple, _)) => {
                let rid = self.insert_tuple(&tuple)?;
                Ok(Some((tuple, rid)))
            }
            None => Ok(None),
        }
    }
}
