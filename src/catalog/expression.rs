use serde::{Deserialize, Serialize};

use crate::catalog::schema::Schema;
use crate::catalog::value::Value;
use crate::storage::table::Tuple;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComparisonOp {
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
}

impl ComparisonOp {
    fn apply(self, left: &Value, right: &Value) -> Value {
        match self {
            ComparisonOp::Equal => Value::Boolean(left == right),
            ComparisonOp::NotEqual => Value::Boolean(left != right),
            _ => match left.partial_cmp(right) {
                None => Value::Null,
                Some(ordering) => Value::Boolean(match self {
                    ComparisonOp::LessThan => ordering.is_lt(),
                    ComparisonOp::LessThanOrEqual => ordering.is_le(),
                    ComparisonOp::GreaterThan => ordering.is_gt(),
                    ComparisonOp::GreaterThanOrEqual => ordering.is_ge(),
                    ComparisonOp::Equal | ComparisonOp::NotEqual => unreachable!(),
                }),
            },
        }
    }
}

/// Expression tree evaluated against tuples.
///
/// `ColumnRef::tuple_idx` selects the join side (0 = outer, 1 = inner) and is
/// ignored for single-tuple evaluation. `Aggregate` references resolve
/// against the group-by / aggregate vectors of an aggregation hash table
/// entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expression {
    Constant(Value),
    ColumnRef { tuple_idx: usize, col_idx: usize },
    Aggregate { is_group_by: bool, idx: usize },
    Comparison {
        op: ComparisonOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },
}

impl Expression {
    pub fn constant(value: Value) -> Self {
        Expression::Constant(value)
    }

    /// Reference to a column of the (single) input tuple.
    pub fn column(col_idx: usize) -> Self {
        Expression::ColumnRef { tuple_idx: 0, col_idx }
    }

    /// Reference to a column of one side of a join (0 = outer, 1 = inner).
    pub fn join_column(tuple_idx: usize, col_idx: usize) -> Self {
        Expression::ColumnRef { tuple_idx, col_idx }
    }

    pub fn group_by(idx: usize) -> Self {
        Expression::Aggregate { is_group_by: true, idx }
    }

    pub fn aggregate(idx: usize) -> Self {
        Expression::Aggregate { is_group_by: false, idx }
    }

    pub fn compare(op: ComparisonOp, left: Expression, right: Expression) -> Self {
        Expression::Comparison {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Evaluate against a single tuple.
    pub fn evaluate(&self, tuple: &Tuple, schema: &Schema) -> Value {
        match self {
            Expression::Constant(value) => value.clone(),
            Expression::ColumnRef { col_idx, .. } => tuple.value(*col_idx),
            Expression::Aggregate { .. } => Value::Null,
            Expression::Comparison { op, left, right } => {
                op.apply(&left.evaluate(tuple, schema), &right.evaluate(tuple, schema))
            }
        }
    }

    /// Evaluate against a pair of join tuples.
    pub fn evaluate_join(
        &self,
        left_tuple: &Tuple,
        left_schema: &Schema,
        right_tuple: &Tuple,
        right_schema: &Schema,
    ) -> Value {
        match self {
            Expression::Constant(value) => value.clone(),
            Expression::ColumnRef { tuple_idx, col_idx } => {
                if *tuple_idx == 0 {
                    left_tuple.value(*col_idx)
                } else {
                    right_tuple.value(*col_idx)
                }
            }
            Expression::Aggregate { .. } => Value::Null,
            Expression::Comparison { op, left, right } => op.apply(
                &left.evaluate_join(left_tuple, left_schema, right_tuple, right_schema),
                &right.evaluate_join(left_tuple, left_schema, right_tuple, right_schema),
            ),
        }
    }

    /// Evaluate against one group of an aggregation.
    pub fn evaluate_aggregate(&self, group_bys: &[Value], aggregates: &[Value]) -> Value {
        match self {
            Expression::Constant(value) => value.clone(),
            Expression::ColumnRef { .. } => Value::Null,
            Expression::Aggregate { is_group_by, idx } => {
                if *is_group_by {
                    group_bys.get(*idx).cloned().unwrap_or(Value::Null)
                } else {
                    aggregates.get(*idx).cloned().unwrap_or(Value::Null)
                }
            }
            Expression::Comparison { op, left, right } => op.apply(
                &left.evaluate_aggregate(group_bys, aggregates),
                &right.evaluate_aggregate(group_bys, aggregates),
            ),
        }
    }
}
