use std::sync::Arc;

use crate::common::types::{Rid, INVALID_PAGE_ID};
use crate::query::executor::{project_join, ExecutionResult, Executor, ExecutorContext};
use crate::query::plan::NestedLoopJoinPlan;
use crate::storage::table::Tuple;

/// Classic nested-loop join: for every outer row, rewind and drain the inner
/// child, emitting combined rows where the predicate holds.
pub struct NestedLoopJoinExecutor {
    #[allow(dead_code)]
    context: Arc<ExecutorContext>,
    plan: NestedLoopJoinPlan,
    left: Box<dyn Executor>,
    right: Box<dyn Executor>,
    current_left: Option<Tuple>,
}

impl NestedLoopJoinExecutor {
    pub fn new(
        context: Arc<ExecutorContext>,
        plan: NestedLoopJoinPlan,
        left: Box<dyn Executor>,
        right: Box<dyn Executor>,
    ) -> Self {
        Self {
            context,
            plan,
            left,
            right,
            current_left: None,
        }
    }
}

impl Executor for NestedLoopJoinExecutor {
    fn init(&mut self) -> ExecutionResult<()> {
        self.left.init()?;
        self.right.init()?;
        self.current_left = self.left.next()?.map(|(tuple, _)| tuple);
        Ok(())
    }

    fn next(&mut self) -> ExecutionResult<Option<(Tuple, Rid)>> {
        loop {
            let left_tuple = match &self.current_left {
                Some(tuple) => tuple.clone(),
                None => return Ok(None),
            };

            while let Some((right_tuple, _)) = self.right.next()? {
                let matches = self.plan.predicate.as_ref().map_or(true, |p| {
                    p.evaluate_join(
                        &left_tuple,
                        &self.plan.left_schema,
                        &right_tuple,
                        &self.plan.right_schema,
                    )
                    .is_true()
                });

                if matches {
                    let output = project_join(
                        &self.plan.output_exprs,
                        &left_tuple,
                        &self.plan.left_schema,
                        &right_tuple,
                        &self.plan.right_schema,
                    );
                    return Ok(Some((output, Rid::new(INVALID_PAGE_ID, 0))));
                }
            }

            // Inner child exhausted: advance the outer row and rewind.
            self.current_left = self.left.next()?.map(|(tuple, _)| tuple);
            self.right.init()?;
        }
    }
}
