//! Filter expression language understood by storage backends.
//!
//! A [`FilterExpr`] is a boolean tree of [`Condition`]s. Each condition
//! carries the fully resolved chain of relationship hops leading from the
//! queried entity to the compared field, so a backend never needs the model
//! graph to evaluate it.
//!
//! [`Lookup::matches`] defines the reference scalar semantics. Backends that
//! push conditions down to a database must agree with it; the in-memory
//! backend and the planner's in-memory evaluation call it directly.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::Date;
use time::macros::format_description;

/// Direction and multiplicity of a relationship.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    /// Declared on the source, points at one target (`foreign_key`, `one_to_one`).
    ToOneForward,
    /// Declared on the source, points at many targets (`many_to_many`).
    ToManyForward,
    /// Inferred opposite side of a `one_to_one`.
    ToOneReverse,
    /// Inferred opposite side of a `foreign_key` or `many_to_many`.
    ToManyReverse,
}

impl RelationKind {
    /// Whether following this relationship can yield more than one instance.
    pub fn is_many(&self) -> bool {
        matches!(self, RelationKind::ToManyForward | RelationKind::ToManyReverse)
    }

    /// Whether the link column lives on the source entity.
    pub fn is_forward(&self) -> bool {
        matches!(self, RelationKind::ToOneForward | RelationKind::ToManyForward)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RelationKind::ToOneForward => "to_one_forward",
            RelationKind::ToManyForward => "to_many_forward",
            RelationKind::ToOneReverse => "to_one_reverse",
            RelationKind::ToManyReverse => "to_many_reverse",
        }
    }
}

impl fmt::Display for RelationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One relationship traversal inside a condition path.
///
/// For forward kinds `column` is read on the source record and holds the
/// target identifier (or an array of identifiers). For reverse kinds
/// `column` is read on target records and must equal (or contain) the
/// source identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RelationHop {
    pub name: String,
    pub kind: RelationKind,
    pub target: String,
    pub column: String,
    pub source_identifier: String,
    pub target_identifier: String,
}

/// Comparison operator applied to a field value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lookup {
    Exact,
    IExact,
    IContains,
    StartsWith,
    EndsWith,
    Gt,
    Gte,
    Lt,
    Lte,
    /// Inclusive `[low, high]` range.
    Range,
    In,
    Year,
    Month,
    Day,
    IsNull,
}

impl Lookup {
    /// Parses the suffix used in flat filter keys (`name__icontains`).
    pub fn parse(name: &str) -> Option<Self> {
        let lookup = match name {
            "exact" => Self::Exact,
            "iexact" => Self::IExact,
            "icontains" => Self::IContains,
            "startswith" => Self::StartsWith,
            "endswith" => Self::EndsWith,
            "gt" => Self::Gt,
            "gte" => Self::Gte,
            "lt" => Self::Lt,
            "lte" => Self::Lte,
            "range" => Self::Range,
            "in" => Self::In,
            "year" => Self::Year,
            "month" => Self::Month,
            "day" => Self::Day,
            "isnull" => Self::IsNull,
            _ => return None,
        };
        Some(lookup)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::IExact => "iexact",
            Self::IContains => "icontains",
            Self::StartsWith => "startswith",
            Self::EndsWith => "endswith",
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::Lt => "lt",
            Self::Lte => "lte",
            Self::Range => "range",
            Self::In => "in",
            Self::Year => "year",
            Self::Month => "month",
            Self::Day => "day",
            Self::IsNull => "isnull",
        }
    }

    /// Evaluates the lookup against one candidate value.
    pub fn matches(&self, candidate: &Value, arg: &Value) -> bool {
        if *self == Self::IsNull {
            let want_null = arg.as_bool().unwrap_or(true);
            return candidate.is_null() == want_null;
        }
        if candidate.is_null() {
            return false;
        }

        match self {
            Self::Exact => values_equal(candidate, arg),
            Self::IExact => match (candidate.as_str(), arg.as_str()) {
                (Some(c), Some(a)) => c.to_lowercase() == a.to_lowercase(),
                _ => values_equal(candidate, arg),
            },
            Self::IContains => match (candidate.as_str(), arg.as_str()) {
                (Some(c), Some(a)) => c.to_lowercase().contains(&a.to_lowercase()),
                _ => false,
            },
            Self::StartsWith => match (candidate.as_str(), arg.as_str()) {
                (Some(c), Some(a)) => c.starts_with(a),
                _ => false,
            },
            Self::EndsWith => match (candidate.as_str(), arg.as_str()) {
                (Some(c), Some(a)) => c.ends_with(a),
                _ => false,
            },
            Self::Gt => compare_values(candidate, arg) == Some(Ordering::Greater),
            Self::Gte => matches!(
                compare_values(candidate, arg),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Self::Lt => compare_values(candidate, arg) == Some(Ordering::Less),
            Self::Lte => matches!(
                compare_values(candidate, arg),
                Some(Ordering::Less | Ordering::Equal)
            ),
            Self::Range => match arg.as_array().map(Vec::as_slice) {
                Some([low, high]) => {
                    Self::Gte.matches(candidate, low) && Self::Lte.matches(candidate, high)
                }
                _ => false,
            },
            Self::In => arg
                .as_array()
                .is_some_and(|items| items.iter().any(|item| values_equal(candidate, item))),
            Self::Year | Self::Month | Self::Day => {
                let Some(date) = candidate.as_str().and_then(parse_date_prefix) else {
                    return false;
                };
                let part = match self {
                    Self::Year => i64::from(date.year()),
                    Self::Month => i64::from(u8::from(date.month())),
                    _ => i64::from(date.day()),
                };
                arg.as_i64() == Some(part)
            }
            Self::IsNull => unreachable!("handled above"),
        }
    }
}

impl fmt::Display for Lookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a condition compares.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionTarget {
    /// A stored column on the entity reached after the hops.
    Field(String),
    /// Number of instances reachable through the relationship.
    Count(RelationHop),
}

/// A single comparison, possibly across relationships.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub hops: Vec<RelationHop>,
    pub target: ConditionTarget,
    pub lookup: Lookup,
    pub value: Value,
}

impl Condition {
    /// A condition on a local column.
    pub fn field(field: impl Into<String>, lookup: Lookup, value: Value) -> Self {
        Self {
            hops: Vec::new(),
            target: ConditionTarget::Field(field.into()),
            lookup,
            value,
        }
    }

    pub fn through(mut self, hops: Vec<RelationHop>) -> Self {
        self.hops = hops;
        self
    }
}

/// Boolean filter expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterExpr {
    Condition(Condition),
    And(Vec<FilterExpr>),
    Or(Vec<FilterExpr>),
    Not(Box<FilterExpr>),
}

impl FilterExpr {
    /// Conjunction that flattens nested `And`s and drops empty ones.
    pub fn and(exprs: impl IntoIterator<Item = FilterExpr>) -> Self {
        let mut parts = Vec::new();
        for expr in exprs {
            match expr {
                FilterExpr::And(inner) => parts.extend(inner),
                other => parts.push(other),
            }
        }
        if parts.len() == 1 {
            parts.remove(0)
        } else {
            FilterExpr::And(parts)
        }
    }

    /// Whether the expression is an empty conjunction (matches everything).
    pub fn is_trivial(&self) -> bool {
        matches!(self, FilterExpr::And(parts) if parts.is_empty())
    }

    /// Visits every condition in the tree.
    pub fn conditions(&self) -> Vec<&Condition> {
        let mut out = Vec::new();
        self.collect_conditions(&mut out);
        out
    }

    fn collect_conditions<'a>(&'a self, out: &mut Vec<&'a Condition>) {
        match self {
            FilterExpr::Condition(c) => out.push(c),
            FilterExpr::And(parts) | FilterExpr::Or(parts) => {
                for part in parts {
                    part.collect_conditions(out);
                }
            }
            FilterExpr::Not(inner) => inner.collect_conditions(out),
        }
    }

    /// Evaluates the expression with a caller-supplied condition evaluator.
    pub fn evaluate<F>(&self, eval: &mut F) -> bool
    where
        F: FnMut(&Condition) -> bool,
    {
        match self {
            FilterExpr::Condition(c) => eval(c),
            FilterExpr::And(parts) => parts.iter().all(|p| p.evaluate(eval)),
            FilterExpr::Or(parts) => parts.iter().any(|p| p.evaluate(eval)),
            FilterExpr::Not(inner) => !inner.evaluate(eval),
        }
    }
}

impl From<Condition> for FilterExpr {
    fn from(condition: Condition) -> Self {
        FilterExpr::Condition(condition)
    }
}

/// Equality with numeric normalization (`1 == 1.0`).
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

/// Orders two scalar values of the same JSON kind; `None` when incomparable.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Parses the `YYYY-MM-DD` prefix of a date or RFC 3339 timestamp string.
pub fn parse_date_prefix(value: &str) -> Option<Date> {
    let prefix = value.get(..10)?;
    Date::parse(prefix, format_description!("[year]-[month]-[day]")).ok()
}
