//! Ordering specs.
//!
//! An ordering spec is a list of names, each optionally prefixed with `-`
//! for descending order. Stored fields and `<relationship>_count` names are
//! sorted by storage; computed attribute names are sorted in memory after
//! materialization.

use std::cmp::Ordering;

use modelql_core::Record;
use modelql_storage::{CountAnnotation, SortKey, compare_values};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SchemaError;
use crate::reader::EntityDescriptor;

/// Suffix of names that order by a related-instance count.
pub const COUNT_SUFFIX: &str = "_count";

/// In-memory sort key over a computed attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertySort {
    pub name: String,
    pub descending: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderingPlan {
    pub storage: Vec<SortKey>,
    pub annotations: Vec<CountAnnotation>,
    pub property: Vec<PropertySort>,
}

impl OrderingPlan {
    /// Validates and splits an ordering spec.
    ///
    /// # Errors
    ///
    /// - `SchemaError::OrderingNotAllowed` if the entity declares an
    ///   allow-list that does not contain the name
    /// - `SchemaError::UnknownOrdering` if the name is neither a field, a
    ///   count nor a computed attribute
    pub fn parse(descriptor: &EntityDescriptor, spec: &[String]) -> Result<Self, SchemaError> {
        let mut plan = Self::default();
        for raw in spec {
            let (name, descending) = match raw.strip_prefix('-') {
                Some(rest) => (rest, true),
                None => (raw.as_str(), false),
            };
            let allowed = descriptor
                .ordering
                .as_ref()
                .is_none_or(|names| names.iter().any(|a| a == name));
            if !allowed {
                return Err(SchemaError::OrderingNotAllowed {
                    entity: descriptor.name.clone(),
                    name: name.to_string(),
                });
            }

            let key = if descending {
                SortKey::desc(name)
            } else {
                SortKey::asc(name)
            };
            if descriptor.field(name).is_some() {
                plan.storage.push(key);
            } else if let Some(rel) = name
                .strip_suffix(COUNT_SUFFIX)
                .and_then(|base| descriptor.relationship(base))
                .filter(|rel| rel.kind.is_many())
            {
                plan.annotations.push(CountAnnotation {
                    alias: name.to_string(),
                    hop: rel.hop(),
                });
                plan.storage.push(key);
            } else if descriptor.computed(name).is_some() {
                plan.property.push(PropertySort {
                    name: name.to_string(),
                    descending,
                });
            } else {
                return Err(SchemaError::UnknownOrdering {
                    entity: descriptor.name.clone(),
                    name: name.to_string(),
                });
            }
        }
        Ok(plan)
    }

    pub fn needs_materialization(&self) -> bool {
        !self.property.is_empty()
    }

    /// Applies the property keys as stable single-key sorts, last key
    /// first, so the first declared key ends up taking precedence.
    pub fn sort_in_memory(&self, descriptor: &EntityDescriptor, records: &mut Vec<Record>) {
        if self.property.is_empty() {
            return;
        }
        let mut keyed: Vec<(Record, Record)> = records
            .drain(..)
            .map(|r| (descriptor.with_computed(&r), r))
            .collect();
        for key in self.property.iter().rev() {
            keyed.sort_by(|(a, _), (b, _)| {
                compare_nulls_last(
                    a.get(&key.name).unwrap_or(&Value::Null),
                    b.get(&key.name).unwrap_or(&Value::Null),
                    key.descending,
                )
            });
        }
        records.extend(keyed.into_iter().map(|(_, r)| r));
    }
}

fn compare_nulls_last(left: &Value, right: &Value, descending: bool) -> Ordering {
    match (left.is_null(), right.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => {
            let ord = compare_values(left, right).unwrap_or(Ordering::Equal);
            if descending { ord.reverse() } else { ord }
        }
    }
}
