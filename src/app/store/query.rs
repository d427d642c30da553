//! Field-path queries over schemaless documents
//!
//! Paths are dotted (`scores.providerA`); each segment descends into a
//! nested JSON object. Numbers compare numerically regardless of whether
//! they were stored as integers or floats.

use std::cmp::Ordering;

use serde_json::Value;

use crate::app::models::Fields;

/// Comparison operator for a [`FieldFilter`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Equal,
    LessThan,
    LessOrEqual,
    GreaterThan,
    GreaterOrEqual,
}

/// One predicate on a dotted field path
#[derive(Debug, Clone, PartialEq)]
pub struct FieldFilter {
    pub path: String,
    pub op: FilterOp,
    pub value: Value,
}

impl FieldFilter {
    /// Evaluate against a document body; a missing field never matches
    pub fn matches(&self, data: &Fields) -> bool {
        let Some(actual) = get_path(data, &self.path) else {
            return false;
        };

        let ordering = || compare_values(actual, &self.value);
        match self.op {
            FilterOp::Equal => values_equal(actual, &self.value),
            FilterOp::LessThan => ordering() == Some(Ordering::Less),
            FilterOp::LessOrEqual => matches!(ordering(), Some(Ordering::Less | Ordering::Equal)),
            FilterOp::GreaterThan => ordering() == Some(Ordering::Greater),
            FilterOp::GreaterOrEqual => {
                matches!(ordering(), Some(Ordering::Greater | Ordering::Equal))
            }
        }
    }
}

/// Conjunction of filters with an optional result limit
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub filters: Vec<FieldFilter>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an equality filter
    pub fn where_eq(self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.where_op(path, FilterOp::Equal, value)
    }

    /// Add a filter with an arbitrary operator
    pub fn where_op(
        mut self,
        path: impl Into<String>,
        op: FilterOp,
        value: impl Into<Value>,
    ) -> Self {
        self.filters.push(FieldFilter {
            path: path.into(),
            op,
            value: value.into(),
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether every filter accepts the document
    pub fn matches(&self, data: &Fields) -> bool {
        self.filters.iter().all(|filter| filter.matches(data))
    }
}

/// Resolve a dotted path inside a document body
pub fn get_path<'a>(data: &'a Fields, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = data.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        _ => a == b,
    }
}

fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}
