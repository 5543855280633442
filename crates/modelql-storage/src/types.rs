//! Query specification passed to storage backends.
//!
//! [`QuerySpec`] is the data form of the query-layer interface: the builder
//! methods mirror `filter(expression)`, `order_by(spec)`, `slice(offset,
//! limit)` and `apply_eager_load(hints)` so planners compose a query the
//! same way they would against a fluent ORM handle.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::filter::{FilterExpr, RelationHop};

/// One storage-level ordering key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    /// Column name or count-annotation alias.
    pub field: String,
    pub descending: bool,
}

impl SortKey {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: false,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: true,
        }
    }
}

/// Requests a per-instance count of related instances under `alias`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountAnnotation {
    pub alias: String,
    pub hop: RelationHop,
}

/// How a backend should prefetch a relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchStrategy {
    /// Fetch in the same round trip (join).
    Inline,
    /// Fetch with one extra batched query per relation.
    Batch,
}

impl fmt::Display for FetchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchStrategy::Inline => f.write_str("inline"),
            FetchStrategy::Batch => f.write_str("batch"),
        }
    }
}

/// Eager-load hint for a relation path (`client__address`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EagerLoadHint {
    pub path: String,
    pub strategy: FetchStrategy,
}

impl EagerLoadHint {
    pub fn new(path: impl Into<String>, strategy: FetchStrategy) -> Self {
        Self {
            path: path.into(),
            strategy,
        }
    }
}

/// A complete query against one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuerySpec {
    pub entity: String,
    /// Named view the query runs under, for backends that model views natively.
    pub view: Option<String>,
    pub filter: Option<FilterExpr>,
    pub order_by: Vec<SortKey>,
    pub annotations: Vec<CountAnnotation>,
    pub eager_load: Vec<EagerLoadHint>,
    pub offset: usize,
    pub limit: Option<usize>,
}

impl QuerySpec {
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            view: None,
            filter: None,
            order_by: Vec::new(),
            annotations: Vec::new(),
            eager_load: Vec::new(),
            offset: 0,
            limit: None,
        }
    }

    pub fn in_view(mut self, view: impl Into<String>) -> Self {
        self.view = Some(view.into());
        self
    }

    /// Adds `expr` to the filter, AND-ing with any existing filter.
    pub fn filter(mut self, expr: FilterExpr) -> Self {
        if expr.is_trivial() {
            return self;
        }
        self.filter = Some(match self.filter.take() {
            Some(existing) => FilterExpr::and([existing, expr]),
            None => expr,
        });
        self
    }

    pub fn order_by(mut self, keys: Vec<SortKey>) -> Self {
        self.order_by = keys;
        self
    }

    pub fn annotate_count(mut self, annotation: CountAnnotation) -> Self {
        if !self.annotations.iter().any(|a| a.alias == annotation.alias) {
            self.annotations.push(annotation);
        }
        self
    }

    pub fn slice(mut self, offset: usize, limit: Option<usize>) -> Self {
        self.offset = offset;
        self.limit = limit;
        self
    }

    /// Merges eager-load hints, keeping the first strategy seen per path.
    pub fn apply_eager_load(mut self, hints: impl IntoIterator<Item = EagerLoadHint>) -> Self {
        for hint in hints {
            if !self.eager_load.iter().any(|h| h.path == hint.path) {
                self.eager_load.push(hint);
            }
        }
        self
    }

    /// Same query without ordering or slicing, for counting.
    pub fn unsliced(&self) -> Self {
        let mut spec = self.clone();
        spec.offset = 0;
        spec.limit = None;
        spec.order_by.clear();
        spec
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{Condition, Lookup};
    use serde_json::json;

    #[test]
    fn test_filter_composes_with_and() {
        let spec = QuerySpec::new("Invoice")
            .filter(Condition::field("paid", Lookup::Exact, json!(true)).into())
            .filter(Condition::field("total", Lookup::Gt, json!(100)).into());

        match spec.filter {
            Some(FilterExpr::And(parts)) => assert_eq!(parts.len(), 2),
            other => panic!("expected conjunction, got {other:?}"),
        }
    }

    #[test]
    fn test_trivial_filter_ignored() {
        let spec = QuerySpec::new("Invoice").filter(FilterExpr::and([]));
        assert!(spec.filter.is_none());
    }

    #[test]
    fn test_eager_load_dedup() {
        let spec = QuerySpec::new("Invoice").apply_eager_load([
            EagerLoadHint::new("client", FetchStrategy::Inline),
            EagerLoadHint::new("client", FetchStrategy::Batch),
            EagerLoadHint::new("line_items", FetchStrategy::Batch),
        ]);
        assert_eq!(spec.eager_load.len(), 2);
        assert_eq!(spec.eager_load[0].strategy, FetchStrategy::Inline);
    }

    #[test]
    fn test_unsliced() {
        let spec = QuerySpec::new("Invoice")
            .order_by(vec![SortKey::desc("total")])
            .slice(20, Some(10));
        let counted = spec.unsliced();
        assert_eq!(counted.offset, 0);
        assert!(counted.limit.is_none());
        assert!(counted.order_by.is_empty());
    }
}
