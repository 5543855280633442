//! Filter, annotation and ordering evaluation over resident rows.

use std::cmp::Ordering;

use modelql_core::Record;
use modelql_storage::{
    Condition, ConditionTarget, CountAnnotation, FilterExpr, Lookup, RelationHop, RelationKind,
    SortKey, compare_values, values_equal,
};
use serde_json::Value;

use crate::storage::{InMemoryStorage, TableCache};

/// Per-query view of the tables touched while following relationships.
pub(crate) struct Snapshot<'a> {
    storage: &'a InMemoryStorage,
    tables: TableCache,
}

impl<'a> Snapshot<'a> {
    pub(crate) fn new(storage: &'a InMemoryStorage) -> Self {
        Self {
            storage,
            tables: TableCache::new(),
        }
    }

    fn rows(&mut self, entity: &str) -> &[Record] {
        let storage = self.storage;
        self.tables
            .entry(entity.to_string())
            .or_insert_with(|| storage.table(entity))
            .as_ref()
            .map(|t| t.rows.as_slice())
            .unwrap_or(&[])
    }

    /// Instances reachable from `record` through `hop`.
    pub(crate) fn related(&mut self, record: &Record, hop: &RelationHop) -> Vec<Record> {
        match hop.kind {
            RelationKind::ToOneForward => {
                let Some(id) = record.get(&hop.column).filter(|v| !v.is_null()).cloned() else {
                    return Vec::new();
                };
                self.rows(&hop.target)
                    .iter()
                    .filter(|row| {
                        row.get(&hop.target_identifier)
                            .is_some_and(|v| values_equal(v, &id))
                    })
                    .take(1)
                    .cloned()
                    .collect()
            }
            RelationKind::ToManyForward => {
                let ids = match record.get(&hop.column) {
                    Some(Value::Array(ids)) => ids.clone(),
                    _ => return Vec::new(),
                };
                self.rows(&hop.target)
                    .iter()
                    .filter(|row| {
                        row.get(&hop.target_identifier)
                            .is_some_and(|v| ids.iter().any(|id| values_equal(v, id)))
                    })
                    .cloned()
                    .collect()
            }
            RelationKind::ToOneReverse | RelationKind::ToManyReverse => {
                let Some(source_id) = record.get(&hop.source_identifier).cloned() else {
                    return Vec::new();
                };
                let limit = if hop.kind == RelationKind::ToOneReverse {
                    1
                } else {
                    usize::MAX
                };
                self.rows(&hop.target)
                    .iter()
                    .filter(|row| links_to(row.get(&hop.column), &source_id))
                    .take(limit)
                    .cloned()
                    .collect()
            }
        }
    }
}

fn links_to(link: Option<&Value>, id: &Value) -> bool {
    match link {
        Some(Value::Array(ids)) => ids.iter().any(|v| values_equal(v, id)),
        Some(value) => values_equal(value, id),
        None => false,
    }
}

pub(crate) fn matches_filter(snapshot: &mut Snapshot<'_>, record: &Record, filter: &FilterExpr) -> bool {
    filter.evaluate(&mut |condition| matches_condition(snapshot, record, condition, 0))
}

/// Evaluates a condition with exists-semantics across many-valued hops.
fn matches_condition(
    snapshot: &mut Snapshot<'_>,
    record: &Record,
    condition: &Condition,
    hop_index: usize,
) -> bool {
    let Some(hop) = condition.hops.get(hop_index) else {
        return match &condition.target {
            ConditionTarget::Field(field) => condition
                .lookup
                .matches(record.get(field).unwrap_or(&Value::Null), &condition.value),
            ConditionTarget::Count(hop) => {
                let count = snapshot.related(record, hop).len();
                condition.lookup.matches(&Value::from(count), &condition.value)
            }
        };
    };

    let related = snapshot.related(record, hop);
    if related.is_empty() {
        return condition.lookup == Lookup::IsNull && condition.value.as_bool().unwrap_or(true);
    }
    related
        .iter()
        .any(|next| matches_condition(snapshot, next, condition, hop_index + 1))
}

pub(crate) fn annotate(snapshot: &mut Snapshot<'_>, rows: &mut [Record], annotation: &CountAnnotation) {
    for row in rows.iter_mut() {
        let count = snapshot.related(row, &annotation.hop).len();
        row.insert(annotation.alias.clone(), Value::from(count));
    }
}

/// Stable multi-key sort with nulls last in both directions.
pub(crate) fn sort_records(rows: &mut [Record], keys: &[SortKey]) {
    if keys.is_empty() {
        return;
    }
    rows.sort_by(|a, b| {
        for key in keys {
            let left = a.get(&key.field).unwrap_or(&Value::Null);
            let right = b.get(&key.field).unwrap_or(&Value::Null);
            let ordering = match (left.is_null(), right.is_null()) {
                (true, true) => Ordering::Equal,
                (true, false) => Ordering::Greater,
                (false, true) => Ordering::Less,
                (false, false) => {
                    let ord = compare_values(left, right).unwrap_or(Ordering::Equal);
                    if key.descending { ord.reverse() } else { ord }
                }
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
}
