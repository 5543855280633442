//! Composite filter arguments.
//!
//! A filter argument is a JSON object whose keys are flat filter keys or the
//! boolean nodes `AND`, `OR` and `NOT`. Sibling keys are AND-ed.
//!
//! Computed attributes have no storage column, so top-level conjuncts that
//! mention one are split off and evaluated against materialized records.

use modelql_core::Record;
use modelql_storage::{Condition, ConditionTarget, FilterExpr, Lookup};
use serde_json::{Map, Value, json};
use time::Date;

use super::node::{FilterOp, FilterSet, FilterTarget, PATH_SEPARATOR, split_key};
use super::presets::preset_bounds;
use crate::error::SchemaError;
use crate::reader::EntityDescriptor;
use crate::types::coerce_identifier;

/// A filter argument split by where it is evaluated.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedFilter {
    /// Pushed down to the storage layer.
    pub storage: Option<FilterExpr>,
    /// Evaluated in memory against materialized records.
    pub in_memory: Option<FilterExpr>,
}

impl ParsedFilter {
    pub fn is_empty(&self) -> bool {
        self.storage.is_none() && self.in_memory.is_none()
    }

    pub fn needs_materialization(&self) -> bool {
        self.in_memory.is_some()
    }

    /// Whether `record` passes the in-memory part of the filter.
    pub fn matches_in_memory(&self, descriptor: &EntityDescriptor, record: &Record) -> bool {
        let Some(expr) = &self.in_memory else {
            return true;
        };
        let record = descriptor.with_computed(record);
        expr.evaluate(&mut |condition: &Condition| match &condition.target {
            ConditionTarget::Field(name) => condition
                .lookup
                .matches(record.get(name).unwrap_or(&Value::Null), &condition.value),
            ConditionTarget::Count(_) => false,
        })
    }
}

impl FilterSet {
    /// Parses a filter argument against the compiled keys.
    ///
    /// `today` anchors the relative date presets.
    ///
    /// # Errors
    ///
    /// - `SchemaError::UnknownFilter` for keys outside the set
    /// - `SchemaError::DepthExceeded` for paths deeper than the compiled depth
    /// - `SchemaError::Validation` for malformed values
    pub fn parse(&self, input: &Value, today: Date) -> Result<ParsedFilter, SchemaError> {
        let expr = match input {
            Value::Null => return Ok(ParsedFilter::default()),
            Value::Object(map) => self.parse_object(map, today)?,
            other => {
                return Err(SchemaError::validation(format!(
                    "Filter for {} must be an object, got {other}",
                    self.entity
                )));
            }
        };

        let conjuncts = match expr {
            FilterExpr::And(parts) => parts,
            other => vec![other],
        };
        let computed = self.computed_attributes();
        let mut storage = Vec::new();
        let mut in_memory = Vec::new();
        for conjunct in conjuncts {
            let conditions = conjunct.conditions();
            let mentions_computed = conditions.iter().any(|c| {
                c.hops.is_empty()
                    && matches!(&c.target, ConditionTarget::Field(f) if computed.contains(f.as_str()))
            });
            if !mentions_computed {
                storage.push(conjunct);
                continue;
            }
            if conditions
                .iter()
                .any(|c| !c.hops.is_empty() || matches!(c.target, ConditionTarget::Count(_)))
            {
                return Err(SchemaError::validation(format!(
                    "Filters on computed attributes of {} cannot be combined with relationship filters in one OR/NOT group",
                    self.entity
                )));
            }
            in_memory.push(conjunct);
        }

        Ok(ParsedFilter {
            storage: (!storage.is_empty()).then(|| FilterExpr::and(storage)),
            in_memory: (!in_memory.is_empty()).then(|| FilterExpr::and(in_memory)),
        })
    }

    fn parse_object(&self, map: &Map<String, Value>, today: Date) -> Result<FilterExpr, SchemaError> {
        let mut parts = Vec::new();
        for (key, value) in map {
            if value.is_null() {
                continue;
            }
            match key.as_str() {
                "AND" => parts.push(FilterExpr::and(self.parse_list(key, value, today)?)),
                "OR" => {
                    let branches = self.parse_list(key, value, today)?;
                    if !branches.is_empty() {
                        parts.push(FilterExpr::Or(branches));
                    }
                }
                "NOT" => {
                    let Value::Object(inner) = value else {
                        return Err(SchemaError::validation("NOT expects a filter object"));
                    };
                    let inner = self.parse_object(inner, today)?;
                    if !inner.is_trivial() {
                        parts.push(FilterExpr::Not(Box::new(inner)));
                    }
                }
                _ => parts.push(self.parse_condition(key, value, today)?),
            }
        }
        Ok(FilterExpr::and(parts))
    }

    fn parse_list(&self, key: &str, value: &Value, today: Date) -> Result<Vec<FilterExpr>, SchemaError> {
        let items: Vec<&Value> = match value {
            Value::Array(items) => items.iter().collect(),
            Value::Object(_) => vec![value],
            _ => {
                return Err(SchemaError::validation(format!(
                    "{key} expects a list of filter objects"
                )));
            }
        };
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            let Value::Object(map) = item else {
                return Err(SchemaError::validation(format!(
                    "{key} expects a list of filter objects"
                )));
            };
            let expr = self.parse_object(map, today)?;
            if !expr.is_trivial() {
                out.push(expr);
            }
        }
        Ok(out)
    }

    fn parse_condition(&self, key: &str, value: &Value, today: Date) -> Result<FilterExpr, SchemaError> {
        let unknown = || SchemaError::UnknownFilter {
            entity: self.entity.clone(),
            key: key.to_string(),
        };

        let (path, op) = split_key(key).ok_or_else(unknown)?;
        let Some(flat) = self.flat.get(path) else {
            let hops = path.split(PATH_SEPARATOR).count().saturating_sub(1);
            if hops > self.depth {
                return Err(SchemaError::DepthExceeded {
                    path: path.to_string(),
                    actual: hops,
                    max: self.depth,
                });
            }
            return Err(unknown());
        };
        if !flat.operations.contains(&op) {
            return Err(unknown());
        }

        validate_value(key, op, value)?;
        if let (Some(choices), FilterOp::Exact | FilterOp::In) = (&flat.choices, op) {
            let candidates: Vec<&Value> = match value {
                Value::Array(items) => items.iter().collect(),
                other => vec![other],
            };
            if let Some(bad) = candidates
                .iter()
                .find(|v| !v.as_str().is_some_and(|s| choices.iter().any(|c| c == s)))
            {
                return Err(SchemaError::validation(format!(
                    "{key}: {bad} is not one of {}",
                    choices.join(", ")
                )));
            }
        }

        let target = match &flat.target {
            FilterTarget::Field { column } | FilterTarget::Relation { column } => {
                ConditionTarget::Field(column.clone())
            }
            FilterTarget::Computed { attribute } => ConditionTarget::Field(attribute.clone()),
            FilterTarget::Count { hop } => ConditionTarget::Count(hop.clone()),
        };

        let (lookup, value, negate) = match op.lookup() {
            Some(lookup) if flat.scalar == "ID" => (lookup, coerce_identifier(value), false),
            Some(lookup) => (lookup, value.clone(), false),
            None => {
                let (low, high) = preset_bounds(op, today).ok_or_else(unknown)?;
                let wanted = value.as_bool().unwrap_or(true);
                (Lookup::Range, json!([low, high]), !wanted)
            }
        };

        let condition = FilterExpr::Condition(Condition {
            hops: flat.hops.clone(),
            target,
            lookup,
            value,
        });
        Ok(if negate {
            FilterExpr::Not(Box::new(condition))
        } else {
            condition
        })
    }
}

fn validate_value(key: &str, op: FilterOp, value: &Value) -> Result<(), SchemaError> {
    let ok = match op {
        FilterOp::In => value.is_array(),
        FilterOp::Range => value.as_array().is_some_and(|items| items.len() == 2),
        FilterOp::Year | FilterOp::Month | FilterOp::Day => value.is_i64() || value.is_u64(),
        FilterOp::Today | FilterOp::ThisMonth | FilterOp::ThisYear | FilterOp::IsNull => {
            value.is_boolean()
        }
        _ => !value.is_array() && !value.is_object(),
    };
    if ok {
        Ok(())
    } else {
        Err(SchemaError::validation(format!(
            "Invalid value for {key}: {value}"
        )))
    }
}
