use std::collections::BTreeMap;

use serde_json::Value;

/// An opaque row: column name to JSON value. Callers deserialize the fields
/// they need; the store layer never knows the shape of a logical table
/// beyond the filters it is asked to apply.
pub type Row = BTreeMap<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
}

#[derive(Debug, Clone)]
pub struct FilterClause {
    pub field: String,
    pub op: FilterOp,
    pub value: Value,
}

/// Conjunction of clauses ("where a = 1 and b > 2"); empty matches every row.
#[derive(Debug, Clone, Default)]
pub struct Filter(pub Vec<FilterClause>);

impl Filter {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.push(FilterClause {
            field: field.into(),
            op: FilterOp::Eq,
            value: value.into(),
        });
        self
    }

    pub fn matches(&self, row: &Row) -> bool {
        self.0.iter().all(|clause| {
            let Some(actual) = row.get(&clause.field) else {
                return false;
            };
            compare(actual, &clause.op, &clause.value)
        })
    }
}

fn compare(actual: &Value, op: &FilterOp, expected: &Value) -> bool {
    match op {
        FilterOp::Eq => actual == expected,
        FilterOp::Ne => actual != expected,
        FilterOp::Lt | FilterOp::Lte | FilterOp::Gt | FilterOp::Gte => {
            let (Some(a), Some(b)) = (actual.as_f64(), expected.as_f64()) else {
                return false;
            };
            match op {
                FilterOp::Lt => a < b,
                FilterOp::Lte => a <= b,
                FilterOp::Gt => a > b,
                FilterOp::Gte => a >= b,
                FilterOp::Eq | FilterOp::Ne => unreachable!(),
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrderBy {
    pub field: String,
    pub descending: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("row store backend error: {0}")]
    Backend(String),
    #[error("unknown table: {0}")]
    UnknownTable(String),
    #[error("transaction rolled back: {0}")]
    RolledBack(String),
}

impl From<sea_orm::DbErr> for StoreError {
    fn from(err: sea_orm::DbErr) -> Self {
        StoreError::Backend(err.to_string())
    }
}
