//! Query planning.
//!
//! Each named view of an entity gets three resolver plans: single, list and
//! paginated. The default view keeps bare field names (`invoice`,
//! `invoices`, `invoices_paged`); other views append `__<view>` to all
//! three.
//!
//! Plans are data. [`QueryPlanner::prepare`] turns a plan plus request
//! arguments into a [`PreparedQuery`], validating filters and ordering
//! before any storage access.

mod executor;
mod ordering;
mod pagination;

use std::sync::Arc;

use modelql_storage::{Condition, EagerLoadHint, FilterExpr, Lookup, QuerySpec};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub use executor::{
    Page, PreparedQuery, QueryArgs, QueryPlanner, related_filter, related_one, single_query,
};
pub use ordering::{COUNT_SUFFIX, OrderingPlan, PropertySort};
pub use pagination::PageWindow;

use crate::filters::FilterSet;
use crate::reader::{EntityDescriptor, NamedView};

/// Separator between a root field name and its view name.
pub const VIEW_SEPARATOR: &str = "__";

/// Descriptor and filters of one entity, shared by its resolvers.
#[derive(Debug, Clone)]
pub struct EntityPlan {
    pub descriptor: Arc<EntityDescriptor>,
    pub filters: Arc<FilterSet>,
}

impl EntityPlan {
    pub fn new(descriptor: Arc<EntityDescriptor>, filters: Arc<FilterSet>) -> Self {
        Self {
            descriptor,
            filters,
        }
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanKind {
    Single,
    List,
    Paginated,
}

/// One generated root query field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolverPlan {
    pub field_name: String,
    pub kind: PlanKind,
    pub entity: String,
    pub view: String,
    pub is_default_view: bool,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub view_conditions: Map<String, Value>,
    /// Prefetch hints for the relations the view conditions reference.
    /// Request filters add their own in [`QueryPlanner::prepare`].
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub eager_load: Vec<EagerLoadHint>,
}

impl ResolverPlan {
    /// Conditions restricting the entity to the plan's view.
    pub fn view_filter(&self) -> Option<FilterExpr> {
        view_filter(&self.view_conditions)
    }

    /// Base query: entity, view restriction and eager-load hints.
    pub fn base_query(&self) -> QuerySpec {
        let mut spec = QuerySpec::new(&self.entity).in_view(&self.view);
        if let Some(filter) = self.view_filter() {
            spec = spec.filter(filter);
        }
        spec.apply_eager_load(self.eager_load.iter().cloned())
    }

    /// Whether a fetched record belongs to the plan's view.
    pub fn in_view(&self, record: &modelql_core::Record) -> bool {
        self.view_conditions.iter().all(|(field, expected)| {
            Lookup::Exact.matches(record.get(field).unwrap_or(&Value::Null), expected)
                || (expected.is_null() && record.get(field).is_none_or(Value::is_null))
        })
    }
}

fn view_filter(conditions: &Map<String, Value>) -> Option<FilterExpr> {
    if conditions.is_empty() {
        return None;
    }
    Some(FilterExpr::and(conditions.iter().map(|(field, value)| {
        let condition = if value.is_null() {
            Condition::field(field, Lookup::IsNull, Value::Bool(true))
        } else {
            Condition::field(field, Lookup::Exact, value.clone())
        };
        FilterExpr::from(condition)
    })))
}

/// Root field names (single, list, paginated) of `view`.
pub fn resolver_field_names(descriptor: &EntityDescriptor, view: &NamedView) -> [String; 3] {
    let single = descriptor.single_field.clone();
    let list = descriptor.plural_field.clone();
    let paged = format!("{list}_paged");
    if view.is_default {
        [single, list, paged]
    } else {
        [single, list, paged].map(|name| format!("{name}{VIEW_SEPARATOR}{}", view.name))
    }
}

/// Resolver plans for every view of an entity.
pub fn plan_resolvers(entity: &EntityPlan) -> Vec<ResolverPlan> {
    let d = &entity.descriptor;
    let mut plans = Vec::with_capacity(d.views.len() * 3);
    for view in &d.views {
        let names = resolver_field_names(d, view);
        let kinds = [PlanKind::Single, PlanKind::List, PlanKind::Paginated];
        for (field_name, kind) in names.into_iter().zip(kinds) {
            plans.push(ResolverPlan {
                field_name,
                kind,
                entity: d.name.clone(),
                view: view.name.clone(),
                is_default_view: view.is_default,
                view_conditions: view.conditions.clone(),
                eager_load: entity
                    .filters
                    .advisory
                    .hints_for(view.conditions.keys().map(String::as_str)),
            });
        }
    }
    plans
}
