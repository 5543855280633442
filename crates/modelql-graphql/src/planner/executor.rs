//! Executing prepared queries against an [`EntityStorage`].

use std::sync::Arc;

use modelql_core::Record;
use modelql_storage::{
    Condition, ConditionTarget, EntityStorage, FilterExpr, Lookup, QuerySpec, RelationKind,
};
use serde_json::Value;
use time::Date;
use tracing::{debug, trace};

use super::ordering::OrderingPlan;
use super::pagination::PageWindow;
use super::{EntityPlan, ResolverPlan};
use crate::config::CompilerConfig;
use crate::error::SchemaError;
use crate::filters::ParsedFilter;
use crate::reader::{EntityDescriptor, RelationshipDescriptor};
use crate::types::coerce_identifier;

/// Request arguments of a list, paginated or relation field.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryArgs {
    pub filter: Option<Value>,
    pub order_by: Vec<String>,
    pub offset: Option<usize>,
    pub limit: Option<usize>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

/// One page of results.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub items: Vec<Record>,
    pub window: PageWindow,
}

/// Validates request arguments and builds storage queries.
#[derive(Debug, Clone, Copy)]
pub struct QueryPlanner {
    default_per_page: usize,
    max_per_page: usize,
}

impl QueryPlanner {
    pub fn new(config: &CompilerConfig) -> Self {
        Self {
            default_per_page: config.default_per_page,
            max_per_page: config.max_per_page,
        }
    }

    /// Effective page size: the default when absent, capped at the maximum.
    pub fn per_page(&self, requested: Option<i64>) -> usize {
        match requested {
            Some(n) if n > 0 => usize::try_from(n)
                .unwrap_or(self.max_per_page)
                .min(self.max_per_page),
            _ => self.default_per_page,
        }
    }

    /// Prepares a root query for `plan`.
    ///
    /// # Errors
    ///
    /// Returns a filter or ordering validation error; nothing is executed.
    pub fn prepare(
        &self,
        plan: &ResolverPlan,
        entity: &EntityPlan,
        args: &QueryArgs,
        today: Date,
    ) -> Result<PreparedQuery, SchemaError> {
        self.prepare_from(plan.base_query(), entity, args, today)
    }

    /// Prepares the query behind a many-valued relation field of `parent`.
    ///
    /// # Errors
    ///
    /// Returns a filter or ordering validation error; nothing is executed.
    pub fn prepare_related(
        &self,
        parent_entity: &EntityDescriptor,
        rel: &RelationshipDescriptor,
        related: &EntityPlan,
        parent: &Record,
        args: &QueryArgs,
        today: Date,
    ) -> Result<PreparedQuery, SchemaError> {
        let base = QuerySpec::new(&related.descriptor.name);
        let mut prepared = self.prepare_from(base, related, args, today)?;
        match related_filter(parent_entity, rel, &related.descriptor, parent) {
            Some(link) => prepared.spec = prepared.spec.filter(link),
            None => prepared.empty = true,
        }
        Ok(prepared)
    }

    fn prepare_from(
        &self,
        base: QuerySpec,
        entity: &EntityPlan,
        args: &QueryArgs,
        today: Date,
    ) -> Result<PreparedQuery, SchemaError> {
        let ordering = OrderingPlan::parse(&entity.descriptor, &args.order_by)?;
        let filter = match &args.filter {
            Some(input) => entity.filters.parse(input, today)?,
            None => ParsedFilter::default(),
        };

        let mut spec = base;
        if let Some(storage) = &filter.storage {
            spec = spec.filter(storage.clone());
            let paths: Vec<String> = storage
                .conditions()
                .iter()
                .filter(|c| !c.hops.is_empty())
                .map(|c| {
                    c.hops
                        .iter()
                        .map(|h| h.name.as_str())
                        .collect::<Vec<_>>()
                        .join(crate::filters::PATH_SEPARATOR)
                })
                .collect();
            spec = spec.apply_eager_load(
                entity
                    .filters
                    .advisory
                    .hints_for(paths.iter().map(String::as_str)),
            );
        }
        for annotation in &ordering.annotations {
            spec = spec.annotate_count(annotation.clone());
        }
        spec = spec.order_by(ordering.storage.clone());

        trace!(
            entity = %entity.name(),
            materialized = filter.needs_materialization() || ordering.needs_materialization(),
            "Prepared query"
        );
        Ok(PreparedQuery {
            spec,
            ordering,
            filter,
            descriptor: Arc::clone(&entity.descriptor),
            planner: *self,
            empty: false,
        })
    }
}

/// A validated query ready to run.
#[derive(Debug, Clone)]
pub struct PreparedQuery {
    pub spec: QuerySpec,
    pub ordering: OrderingPlan,
    pub filter: ParsedFilter,
    descriptor: Arc<EntityDescriptor>,
    planner: QueryPlanner,
    /// Relation query whose parent has no link; yields nothing.
    empty: bool,
}

impl PreparedQuery {
    /// Whether results must be fetched whole and post-processed in memory.
    pub fn is_materialized(&self) -> bool {
        self.filter.needs_materialization() || self.ordering.needs_materialization()
    }

    /// Fetches everything matching, then applies in-memory filters and
    /// property ordering.
    async fn materialize(&self, storage: &dyn EntityStorage) -> Result<Vec<Record>, SchemaError> {
        let mut spec = self.spec.clone();
        spec.offset = 0;
        spec.limit = None;
        let mut records: Vec<Record> = storage
            .fetch(&spec)
            .await?
            .into_iter()
            .filter(|r| self.filter.matches_in_memory(&self.descriptor, r))
            .collect();
        self.ordering.sort_in_memory(&self.descriptor, &mut records);
        debug!(
            entity = %self.spec.entity,
            rows = records.len(),
            "Materialized query for in-memory evaluation"
        );
        Ok(records)
    }

    /// List query with an optional offset/limit slice.
    ///
    /// # Errors
    ///
    /// Propagates storage errors.
    pub async fn list(
        &self,
        storage: &dyn EntityStorage,
        offset: Option<usize>,
        limit: Option<usize>,
    ) -> Result<Vec<Record>, SchemaError> {
        if self.empty {
            return Ok(Vec::new());
        }
        let offset = offset.unwrap_or(0);
        if self.is_materialized() {
            let records = self.materialize(storage).await?;
            let end = limit.map_or(records.len(), |l| offset.saturating_add(l));
            return Ok(records
                .into_iter()
                .skip(offset)
                .take(end.saturating_sub(offset))
                .collect());
        }
        let spec = self.spec.clone().slice(offset, limit);
        Ok(storage.fetch(&spec).await?)
    }

    /// Number of matching instances.
    ///
    /// # Errors
    ///
    /// Propagates storage errors.
    pub async fn count(&self, storage: &dyn EntityStorage) -> Result<usize, SchemaError> {
        if self.empty {
            return Ok(0);
        }
        if self.filter.needs_materialization() {
            return Ok(self.materialize(storage).await?.len());
        }
        let total = storage.count(&self.spec.unsliced()).await?;
        Ok(usize::try_from(total).unwrap_or(usize::MAX))
    }

    /// Paginated query. `per_page` follows [`QueryPlanner::per_page`].
    ///
    /// # Errors
    ///
    /// Propagates storage errors.
    pub async fn page(
        &self,
        storage: &dyn EntityStorage,
        page: Option<i64>,
        per_page: Option<i64>,
    ) -> Result<Page, SchemaError> {
        let per_page = self.planner.per_page(per_page);
        let requested = page.unwrap_or(1);
        if self.empty {
            return Ok(Page {
                items: Vec::new(),
                window: PageWindow::compute(0, requested, per_page),
            });
        }

        if self.is_materialized() {
            let records = self.materialize(storage).await?;
            let window = PageWindow::compute(records.len(), requested, per_page);
            let items = records
                .into_iter()
                .skip(window.offset)
                .take(window.per_page)
                .collect();
            return Ok(Page { items, window });
        }

        let total = self.count(storage).await?;
        let window = PageWindow::compute(total, requested, per_page);
        let items = if window.is_empty() {
            Vec::new()
        } else {
            let spec = self
                .spec
                .clone()
                .slice(window.offset, Some(window.per_page));
            storage.fetch(&spec).await?
        };
        Ok(Page { items, window })
    }
}

/// Single query by identifier under the plan's view.
///
/// A missing instance, or one outside the view, is `Ok(None)`.
///
/// # Errors
///
/// Propagates storage errors.
pub async fn single_query(
    storage: &dyn EntityStorage,
    plan: &ResolverPlan,
    id: &Value,
) -> Result<Option<Record>, SchemaError> {
    let id = coerce_identifier(id);
    let record = storage.get_by_id(&plan.entity, &id).await?;
    Ok(record.filter(|r| plan.in_view(r)))
}

/// Filter selecting the instances `rel` links `parent` to, evaluated on
/// the related entity. `None` when the parent links to nothing.
pub fn related_filter(
    parent_entity: &EntityDescriptor,
    rel: &RelationshipDescriptor,
    related: &EntityDescriptor,
    parent: &Record,
) -> Option<FilterExpr> {
    match rel.kind {
        RelationKind::ToOneForward | RelationKind::ToManyForward => {
            let ids = match parent.get(rel.link_column()) {
                None | Some(Value::Null) => return None,
                Some(Value::Array(ids)) => Value::Array(ids.clone()),
                Some(id) => Value::Array(vec![id.clone()]),
            };
            Some(Condition::field(&related.identifier, Lookup::In, ids).into())
        }
        RelationKind::ToOneReverse | RelationKind::ToManyReverse => {
            let parent_id = parent
                .get(&rel.source_identifier)
                .filter(|v| !v.is_null())?
                .clone();
            // Walk back over the declaring side so array-valued link
            // columns are matched by containment.
            let inverse = related.relationships.iter().find(|r| {
                r.kind.is_forward()
                    && r.link_back.as_deref() == Some(rel.name.as_str())
                    && r.link_column() == rel.link_column()
            });
            let condition = match inverse {
                Some(inverse) => Condition {
                    hops: vec![inverse.hop()],
                    target: ConditionTarget::Field(parent_entity.identifier.clone()),
                    lookup: Lookup::Exact,
                    value: parent_id,
                },
                None => Condition::field(rel.link_column(), Lookup::Exact, parent_id),
            };
            Some(condition.into())
        }
    }
}

/// Resolves a to-one relation of `parent`. Absence is `Ok(None)`.
///
/// # Errors
///
/// Propagates storage errors.
pub async fn related_one(
    storage: &dyn EntityStorage,
    parent_entity: &EntityDescriptor,
    rel: &RelationshipDescriptor,
    related: &EntityDescriptor,
    parent: &Record,
) -> Result<Option<Record>, SchemaError> {
    if rel.kind == RelationKind::ToOneForward {
        let Some(id) = parent.get(rel.link_column()).filter(|v| !v.is_null()) else {
            return Ok(None);
        };
        return Ok(storage.get_by_id(&related.name, id).await?);
    }
    let Some(filter) = related_filter(parent_entity, rel, related, parent) else {
        return Ok(None);
    };
    let spec = QuerySpec::new(&related.name).filter(filter).slice(0, Some(1));
    Ok(storage.fetch(&spec).await?.into_iter().next())
}
