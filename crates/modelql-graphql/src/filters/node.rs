//! Filter nodes, flat filter paths and the compiled filter set.

use std::collections::BTreeSet;
use std::fmt;

use indexmap::IndexMap;
use modelql_storage::{Lookup, RelationHop};
use serde::{Deserialize, Serialize};

use super::advisory::PerformanceAdvisory;
use crate::reader::{CategoryFamily, ScalarCategory};
use crate::types::{FieldDef, TypeDef, TypeRefDef, filter_type_name};

/// Separator between path segments and before the operation name.
pub const PATH_SEPARATOR: &str = "__";

/// Filter operation exposed in filter keys (`total__gte`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    Exact,
    IExact,
    IContains,
    StartsWith,
    EndsWith,
    Gt,
    Gte,
    Lt,
    Lte,
    Range,
    In,
    Year,
    Month,
    Day,
    Today,
    ThisMonth,
    ThisYear,
    IsNull,
}

impl FilterOp {
    pub const ALL: [FilterOp; 18] = [
        Self::Exact,
        Self::IExact,
        Self::IContains,
        Self::StartsWith,
        Self::EndsWith,
        Self::Gt,
        Self::Gte,
        Self::Lt,
        Self::Lte,
        Self::Range,
        Self::In,
        Self::Year,
        Self::Month,
        Self::Day,
        Self::Today,
        Self::ThisMonth,
        Self::ThisYear,
        Self::IsNull,
    ];

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
            Self::Today => "today",
            Self::ThisMonth => "this_month",
            Self::ThisYear => "this_year",
            Self::IsNull => "isnull",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.as_str() == name)
    }

    /// Storage lookup for the operation; presets have none.
    pub fn lookup(&self) -> Option<Lookup> {
        let lookup = match self {
            Self::Exact => Lookup::Exact,
            Self::IExact => Lookup::IExact,
            Self::IContains => Lookup::IContains,
            Self::StartsWith => Lookup::StartsWith,
            Self::EndsWith => Lookup::EndsWith,
            Self::Gt => Lookup::Gt,
            Self::Gte => Lookup::Gte,
            Self::Lt => Lookup::Lt,
            Self::Lte => Lookup::Lte,
            Self::Range => Lookup::Range,
            Self::In => Lookup::In,
            Self::Year => Lookup::Year,
            Self::Month => Lookup::Month,
            Self::Day => Lookup::Day,
            Self::IsNull => Lookup::IsNull,
            Self::Today | Self::ThisMonth | Self::ThisYear => return None,
        };
        Some(lookup)
    }

    pub fn is_preset(&self) -> bool {
        matches!(self, Self::Today | Self::ThisMonth | Self::ThisYear)
    }

    /// Argument type of a filter key using this operation.
    pub fn argument_type(&self, scalar: &str) -> TypeRefDef {
        match self {
            Self::In | Self::Range => TypeRefDef::named_list(scalar),
            Self::Year | Self::Month | Self::Day => TypeRefDef::named("Int"),
            Self::Today | Self::ThisMonth | Self::ThisYear | Self::IsNull => {
                TypeRefDef::named("Boolean")
            }
            _ => TypeRefDef::named(scalar),
        }
    }
}

impl fmt::Display for FilterOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operations comparing a related-instance count.
pub const COUNT_OPERATIONS: [FilterOp; 5] = [
    FilterOp::Exact,
    FilterOp::Gt,
    FilterOp::Gte,
    FilterOp::Lt,
    FilterOp::Lte,
];

/// Operations on a forward to-one link's identifier.
pub const RELATION_OPERATIONS: [FilterOp; 3] = [FilterOp::Exact, FilterOp::In, FilterOp::IsNull];

/// Operation set for a scalar category.
pub fn operations_for(category: ScalarCategory, nullable: bool) -> Vec<FilterOp> {
    let mut ops = match category.family() {
        CategoryFamily::Text => vec![
            FilterOp::Exact,
            FilterOp::IExact,
            FilterOp::IContains,
            FilterOp::StartsWith,
            FilterOp::EndsWith,
        ],
        CategoryFamily::Numeric => vec![
            FilterOp::Exact,
            FilterOp::Gt,
            FilterOp::Gte,
            FilterOp::Lt,
            FilterOp::Lte,
            FilterOp::Range,
        ],
        CategoryFamily::Temporal => vec![
            FilterOp::Exact,
            FilterOp::Range,
            FilterOp::Year,
            FilterOp::Month,
            FilterOp::Day,
            FilterOp::Today,
            FilterOp::ThisMonth,
            FilterOp::ThisYear,
        ],
        CategoryFamily::Boolean => vec![FilterOp::Exact],
        CategoryFamily::Enumerated | CategoryFamily::Identifier => {
            vec![FilterOp::Exact, FilterOp::In]
        }
        CategoryFamily::Opaque => Vec::new(),
    };
    if nullable && !ops.is_empty() {
        ops.push(FilterOp::IsNull);
    }
    ops
}

/// What a flat filter path compares.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FilterTarget {
    /// Stored column on the entity reached after the hops.
    Field { column: String },
    /// Link column of a forward to-one relationship.
    Relation { column: String },
    /// Related-instance count through `hop`.
    Count { hop: RelationHop },
    /// Computed attribute, evaluated in memory.
    Computed { attribute: String },
}

/// One filterable path with its operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlatFilter {
    pub path: String,
    pub hops: Vec<RelationHop>,
    pub target: FilterTarget,
    /// API scalar of the compared value.
    pub scalar: String,
    pub operations: Vec<FilterOp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub choices: Option<Vec<String>>,
}

impl FlatFilter {
    /// Relationships traversed, counting the counted relationship itself.
    pub fn hop_count(&self) -> usize {
        self.hops.len() + usize::from(matches!(self.target, FilterTarget::Count { .. }))
    }

    pub fn key(&self, op: FilterOp) -> String {
        format!("{}{PATH_SEPARATOR}{}", self.path, op.as_str())
    }

    pub fn is_computed(&self) -> bool {
        matches!(self.target, FilterTarget::Computed { .. })
    }
}

/// Hierarchical filter node for presentation consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterNode {
    pub field_path: String,
    pub name: String,
    pub operations: Vec<FilterOp>,
    pub children: Vec<FilterNode>,
    pub is_nested: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub choices: Option<Vec<String>>,
}

impl FilterNode {
    pub(crate) fn leaf(path: String, name: &str, operations: Vec<FilterOp>, choices: Option<Vec<String>>) -> Self {
        Self {
            field_path: path,
            name: name.to_string(),
            operations,
            children: Vec::new(),
            is_nested: false,
            choices,
        }
    }

    /// Depth-first iteration over this node and its descendants.
    pub fn walk(&self) -> Vec<&FilterNode> {
        let mut out = vec![self];
        for child in &self.children {
            out.extend(child.walk());
        }
        out
    }
}

/// Filter keys grouped for presentation.
///
/// Keys crossing at most one relationship stay in `direct`; keys crossing
/// two or more are grouped under their first relationship.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupedFilters {
    pub direct: Vec<String>,
    pub groups: IndexMap<String, Vec<String>>,
}

/// Compiled filters of one entity at one depth.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterSet {
    pub entity: String,
    pub depth: usize,
    pub roots: Vec<FilterNode>,
    /// Path to flat filter, in compilation order.
    pub flat: IndexMap<String, FlatFilter>,
    pub advisory: PerformanceAdvisory,
    /// Entities read while compiling.
    pub dependencies: BTreeSet<String>,
}

impl FilterSet {
    /// Every accepted filter key (`path__op`), in compilation order.
    pub fn filter_keys(&self) -> Vec<String> {
        self.flat
            .values()
            .flat_map(|flat| flat.operations.iter().map(|op| flat.key(*op)))
            .collect()
    }

    pub fn has_key(&self, key: &str) -> bool {
        split_key(key)
            .and_then(|(path, op)| self.flat.get(path).map(|f| f.operations.contains(&op)))
            .unwrap_or(false)
    }

    pub fn grouped(&self) -> GroupedFilters {
        let mut grouped = GroupedFilters::default();
        for flat in self.flat.values() {
            let keys = flat.operations.iter().map(|op| flat.key(*op));
            match flat.hops.first() {
                Some(base) if flat.hop_count() >= 2 => grouped
                    .groups
                    .entry(base.name.clone())
                    .or_default()
                    .extend(keys),
                _ => grouped.direct.extend(keys),
            }
        }
        grouped
    }

    pub fn type_name(&self) -> String {
        filter_type_name(&self.entity)
    }

    /// Filter input object: one optional field per key plus `AND`/`OR`/`NOT`.
    pub fn input_type(&self) -> TypeDef {
        let name = self.type_name();
        let mut ty = TypeDef::input_object(&name)
            .entity(&self.entity)
            .description(Some(format!("Filter over {} instances", self.entity)));
        for flat in self.flat.values() {
            for op in &flat.operations {
                ty.push_field(FieldDef::input(flat.key(*op), op.argument_type(&flat.scalar)));
            }
        }
        ty.push_field(FieldDef::input("AND", TypeRefDef::named_list(&name)));
        ty.push_field(FieldDef::input("OR", TypeRefDef::named_list(&name)));
        ty.push_field(FieldDef::input("NOT", TypeRefDef::named(&name)));
        ty
    }

    /// Names of computed attributes that can be filtered on.
    pub fn computed_attributes(&self) -> BTreeSet<&str> {
        self.flat
            .values()
            .filter_map(|f| match &f.target {
                FilterTarget::Computed { attribute } => Some(attribute.as_str()),
                _ => None,
            })
            .collect()
    }
}

/// Splits `client__name__icontains` into (`client__name`, `IContains`).
pub fn split_key(key: &str) -> Option<(&str, FilterOp)> {
    let (path, op) = key.rsplit_once(PATH_SEPARATOR)?;
    Some((path, FilterOp::parse(op)?))
}
