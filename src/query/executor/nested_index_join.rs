use std::sync::Arc;

use crate::catalog::value::Value;
use crate::catalog::{IndexInfo, TableInfo};
use crate::common::types::{Rid, INVALID_PAGE_ID};
use crate::query::executor::{
    project_join, ExecutionError, ExecutionResult, Executor, ExecutorContext,
};
use crate::query::plan::NestedIndexJoinPlan;
use crate::storage::table::Tuple;

/// Join that probes the inner table's index with a key computed from each
/// outer row, fetching matching inner tuples from the heap.
pub struct NestedIndexJoinExecutor {
    #[allow(dead_code)]
    context: Arc<ExecutorContext>,
    plan: NestedIndexJoinPlan,
    child: Box<dyn Executor>,
    inner_table: Arc<TableInfo>,
    index_info: Arc<IndexInfo>,
    current_left: Option<Tuple>,
    pending: Vec<Rid>,
}

impl NestedIndexJoinExecutor {
    pub fn new(
        context: Arc<ExecutorContext>,
        plan: NestedIndexJoinPlan,
        child: Box<dyn Executor>,
    ) -> ExecutionResult<Self> {
        let inner_table = context
            .catalog
            .get_table(&plan.inner_table_name)
            .ok_or_else(|| ExecutionError::TableNotFound(plan.inner_table_name.clone()))?;
        let index_info = context
            .catalog
            .get_index(&plan.index_name, &plan.inner_table_name)
            .ok_or_else(|| {
                ExecutionError::IndexNotFound(plan.index_name.clone(), plan.inner_table_name.clone())
            })?;

        Ok(Self {
            context,
            plan,
            child,
            inner_table,
            index_info,
            current_left: None,
            pending: Vec::new(),
        })
    }
}

impl Executor for NestedIndexJoinExecutor {
    fn init(&mut self) -> ExecutionResult<()> {
        self.child.init()
    }

    fn next(&mut self) -> ExecutionResult<Option<(Tuple, Rid)>> {
        loop {
            if let Some(rid) = self.pending.pop() {
                let left_tuple = match &self.current_left {
                    Some(tuple) => tuple,
                    None => continue,
                };
                let right_tuple = match self.inner_table.table.get_tuple(rid)? {
                    Some(tuple) => tuple,
                    None => continue,
                };

                let output = project_join(
                    &self.plan.output_exprs,
                    left_tuple,
                    &self.plan.outer_schema,
                    &right_tuple,
                    &self.plan.inner_schema,
                );
                return Ok(Some((output, Rid::new(INVALID_PAGE_ID, 0))));
            }

            let (left_tuple, _) = match self.child.next()? {
                Some(row) => row,
                None => return Ok(None),
            };

            // Probe the inner index; non-integer keys (e.g. NULL join keys)
            // simply match nothing.
            let key = self.plan.key_expr.evaluate(&left_tuple, &self.plan.outer_schema);
            self.pending = match key {
                Value::Integer(_) => self.index_info.index.scan_key(&key)?,
                _ => Vec::new(),
            };
            self.current_left = Some(left_tuple);
        }
    }
}
