use std::sync::Arc;

use crate::catalog::{IndexInfo, TableInfo};
use crate::common::types::Rid;
use crate::index::btree::IndexIterator;
use crate::query::executor::{project, ExecutionError, ExecutionResult, Executor, ExecutorContext};
use crate::query::plan::IndexScanPlan;
use crate::storage::table::Tuple;

/// Key-ordered scan over a B+ tree index, fetching each matching tuple from
/// the table heap.
pub struct IndexScanExecutor {
    context: Arc<ExecutorContext>,
    plan: IndexScanPlan,
    table_info: Arc<TableInfo>,
    index_info: Arc<IndexInfo>,
    iter: Option<IndexIterator>,
}

impl IndexScanExecutor {
    pub fn new(context: Arc<ExecutorContext>, plan: IndexScanPlan) -> ExecutionResult<Self> {
        let table_info = context
            .catalog
            .get_table(&plan.table_name)
            .ok_or_else(|| ExecutionError::TableNotFound(plan.table_name.clone()))?;
        let index_info = context
            .catalog
            .get_index(&plan.index_name, &plan.table_name)
            .ok_or_else(|| {
                ExecutionError::IndexNotFound(plan.index_name.clone(), plan.table_name.clone())
            })?;

        Ok(Self {
            context,
            plan,
            table_info,
            index_info,
            iter: None,
        })
    }
}

impl Executor for IndexScanExecutor {
    fn init(&mut self) -> ExecutionResult<()> {
        self.iter = Some(self.index_info.index.iter()?);
        Ok(())
    }

    fn next(&mut self) -> ExecutionResult<Option<(Tuple, Rid)>> {
        loop {
            let entry = match self.iter.as_mut().and_then(|it| it.next()) {
                Some(entry) => entry?,
                None => return Ok(None),
            };
            let (_key, rid) = entry;

            let tuple = match self.table_info.table.get_tuple(rid)? {
                Some(tuple) => tuple,
                None => continue,
            };

            let passes = self
                .plan
                .predicate
                .as_ref()
                .map_or(true, |p| p.evaluate(&tuple, &self.table_info.schema).is_true());
            if !passes {
                continue;
            }

            let output = project(&self.plan.output_exprs, &tuple, &self.table_info.schema);
            return Ok(Some((output, rid)));
        }
    }
}
