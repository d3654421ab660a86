use std::collections::HashMap;
use std::sync::Arc;

use crate::catalog::value::Value;
use crate::common::types::{Rid, INVALID_PAGE_ID};
use crate::query::executor::{ExecutionResult, Executor, ExecutorContext};
use crate::query::plan::{AggregationPlan, AggregationType};
use crate::storage::table::Tuple;

/// Hash aggregation: `init` drains the child into buckets keyed by the
/// group-by values, `next` walks the buckets applying HAVING and projecting
/// through the output expressions.
pub struct AggregationExecutor {
    #[allow(dead_code)]
    context: Arc<ExecutorContext>,
    plan: AggregationPlan,
    child: Box<dyn Executor>,
    groups: Vec<(Vec<Value>, Vec<Value>)>,
    cursor: usize,
}

impl AggregationExecutor {
    pub fn new(
        context: Arc<ExecutorContext>,
        plan: AggregationPlan,
        child: Box<dyn Executor>,
    ) -> Self {
        Self {
            context,
            plan,
            child,
            groups: Vec::new(),
            cursor: 0,
        }
    }

    fn initial_aggregates(&self) -> Vec<Value> {
        self.plan
            .agg_types
            .iter()
            .map(|agg_type| match agg_type {
                AggregationType::Count => Value::Integer(0),
                AggregationType::Sum => Value::Integer(0),
                AggregationType::Min | AggregationType::Max => Value::Null,
            })
            .collect()
    }

    fn combine(&self, accumulators: &mut [Value], inputs: &[Value]) {
        for (i, agg_type) in self.plan.agg_types.iter().enumerate() {
            let input = &inputs[i];
            match agg_type {
                AggregationType::Count => {
                    accumulators[i] = accumulators[i].add(&Value::Integer(1));
                }
                AggregationType::Sum => {
                    accumulators[i] = accumulators[i].add(input);
                }
                AggregationType::Min => {
                    if accumulators[i].is_null() || input < &accumulators[i] {
                        accumulators[i] = input.clone();
                    }
                }
                AggregationType::Max => {
                    if accumulators[i].is_null() || input > &accumulators[i] {
                        accumulators[i] = input.clone();
                    }
                }
            }
        }
    }
}

impl Executor for AggregationExecutor {
    fn init(&mut self) -> ExecutionResult<()> {
        self.child.init()?;

        let mut table: HashMap<Vec<Value>, Vec<Value>> = HashMap::new();
        while let Some((tuple, _)) = self.child.next()? {
            let key: Vec<Value> = self
                .plan
                .group_by_exprs
                .iter()
                .map(|e| e.evaluate(&tuple, &self.plan.input_schema))
                .collect();
            let inputs: Vec<Value> = self
                .plan
                .agg_exprs
                .iter()
                .map(|e| e.evaluate(&tuple, &self.plan.input_schema))
                .collect();

            let initial = self.initial_aggregates();
            let accumulators = table.entry(key).or_insert(initial);
            self.combine(accumulators, &inputs);
        }

        self.groups = table.into_iter().collect();
        self.cursor = 0;
        Ok(())
    }

    fn next(&mut self) -> ExecutionResult<Option<(Tuple, Rid)>> {
        while self.cursor < self.groups.len() {
            let (group_bys, aggregates) = &self.groups[self.cursor];
            self.cursor += 1;

            let passes = self
                .plan
                .having
                .as_ref()
                .map_or(true, |h| h.evaluate_aggregate(group_bys, aggregates).is_true());
            if !passes {
                continue;
            }

            let values: Vec<Value> = self
                .plan
                .output_exprs
                .iter()
                .map(|e| e.evaluate_aggregate(group_bys, aggregates))
                .collect();
            return Ok(Some((Tuple::new(values), Rid::new(INVALID_PAGE_ID, 0))));
        }

        Ok(None)
    }
}
