use std::sync::Arc;

use crate::catalog::TableInfo;
use crate::common::types::Rid;
use crate::query::executor::{project, ExecutionError, ExecutionResult, Executor, ExecutorContext};
use crate::query::plan::SeqScanPlan;
use crate::storage::table::{TableIterator, Tuple};
use crate::transaction::IsolationLevel;

/// Sequential scan over a table heap.
///
/// Under READ_COMMITTED and REPEATABLE_READ each row is shared-locked before
/// it is read; READ_COMMITTED drops the lock again as soon as the row has
/// been emitted or rejected, REPEATABLE_READ keeps it until commit/abort.
pub struct SeqScanExecutor {
    context: Arc<ExecutorContext>,
    plan: SeqScanPlan,
    table_info: Arc<TableInfo>,
    iter: Option<TableIterator>,
}

impl SeqScanExecutor {
    pub fn new(context: Arc<ExecutorContext>, plan: SeqScanPlan) -> ExecutionResult<Self> {
        let table_info = context
            .catalog
            .get_table_by_oid(plan.table_oid)
            .ok_or(ExecutionError::TableOidNotFound(plan.table_oid))?;

        Ok(Self {
            context,
            plan,
            table_info,
            iter: None,
        })
    }

    fn release_if_read_committed(&self, rid: Rid, acquired: bool) -> ExecutionResult<()> {
        let txn = &self.context.transaction;
        if acquired && txn.isolation_level() == IsolationLevel::ReadCommitted {
            self.context.lock_manager.unlock(txn, rid)?;
        }
        Ok(())
    }
}

impl Executor for SeqScanExecutor {
    fn init(&mut self) -> ExecutionResult<()> {
        self.iter = Some(self.table_info.table.iter());
        Ok(())
    }

    fn next(&mut self) -> ExecutionResult<Option<(Tuple, Rid)>> {
        loop {
            let entry = match self.iter.as_mut().and_then(|it| it.next()) {
                Some(entry) => entry?,
                None => return Ok(None),
            };
            let (rid, _) = entry;

            // Take a shared lock before reading, unless dirty reads are fine
            // or we already hold this row exclusively.
            let txn = &self.context.transaction;
            let mut acquired = false;
            if txn.isolation_level() != IsolationLevel::ReadUncommitted
                && !txn.is_exclusive_locked(rid)
                && !txn.is_shared_locked(rid)
            {
                self.context.lock_manager.lock_shared(txn, rid)?;
                acquired = true;
            }

            let tuple = match self.table_info.table.get_tuple(rid)? {
                Some(tuple) => tuple,
                None => {
                    self.release_if_read_committed(rid, acquired)?;
                    continue;
                }
            };

            let passes = self
                .plan
                .predicate
                .as_ref()
                .map_or(true, |p| p.evaluate(&tuple, &self.table_info.schema).is_true());
            if !passes {
                self.release_if_read_committed(rid, acquired)?;
                continue;
            }

            let output = project(&self.plan.output_exprs, &tuple, &self.table_info.schema);
            self.release_if_read_committed(rid, acquired)?;
            return Ok(Some((output, rid)));
        }
    }
}
