//! Plan nodes consumed by the executors.
//!
//! A plan node carries the per-operator configuration: which table or index
//! to touch, the predicate to apply, and the expressions that project into
//! the operator's output schema. Executor trees are wired up from plans by
//! the caller, children first.

use std::collections::HashMap;

use crate::catalog::expression::Expression;
use crate::catalog::schema::Schema;
use crate::catalog::value::Value;
use crate::common::types::TableOid;

/// Aggregate functions supported by the aggregation executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregationType {
    Count,
    Sum,
    Min,
    Max,
}

/// Per-column update rule.
#[derive(Debug, Clone)]
pub enum UpdateAction {
    /// Replace the column with a constant.
    Set(Value),
    /// Add a delta to an integer column.
    Add(i64),
}

/// Full scan of a table with an optional filter.
pub struct SeqScanPlan {
    pub table_oid: TableOid,
    pub predicate: Option<Expression>,
    pub output_exprs: Vec<Expression>,
}

/// Scan of a B+ tree index in key order, fetching tuples from the heap.
pub struct IndexScanPlan {
    pub table_name: String,
    pub index_name: String,
    pub predicate: Option<Expression>,
    pub output_exprs: Vec<Expression>,
}

/// Insert of raw literal rows, or of whatever the child produces.
pub struct InsertPlan {
    pub table_oid: TableOid,
    pub raw_values: Option<Vec<Vec<Value>>>,
}

/// Update of the rows produced by the child.
pub struct UpdatePlan {
    pub table_oid: TableOid,
    pub update_attrs: HashMap<usize, UpdateAction>,
}

/// Delete of the rows produced by the child.
pub struct DeletePlan {
    pub table_oid: TableOid,
}

/// Nested-loop join of two child executors.
pub struct NestedLoopJoinPlan {
    pub predicate: Option<Expression>,
    pub output_exprs: Vec<Expression>,
    pub left_schema: Schema,
    pub right_schema: Schema,
}

/// Join driving an index lookup on the inner table per outer row.
pub struct NestedIndexJoinPlan {
    pub inner_table_name: String,
    pub index_name: String,
    /// Evaluated against each outer tuple to produce the probe key.
    pub key_expr: Expression,
    pub output_exprs: Vec<Expression>,
    pub outer_schema: Schema,
    pub inner_schema: Schema,
}

/// Hash aggregation with optional grouping and HAVING.
pub struct AggregationPlan {
    pub group_by_exprs: Vec<Expression>,
    pub agg_exprs: Vec<Expression>,
    pub agg_types: Vec<AggregationType>,
    pub having: Option<Expression>,
    pub output_exprs: Vec<Expression>,
    pub input_schema: Schema,
}
