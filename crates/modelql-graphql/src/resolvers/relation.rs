//! Relationship resolvers on entity object types.

use std::sync::Arc;

use async_graphql::dynamic::{FieldFuture, FieldValue, ResolverContext};
use async_graphql::Value;
use tracing::trace;

use super::{ensure_access, get_execution_context, parent_record, query_args};
use crate::access::{AccessOperation, AccessRequest};
use crate::error::SchemaError;
use crate::planner::{EntityPlan, QueryArgs, QueryPlanner, related_one};
use crate::reader::RelationshipDescriptor;

/// Both ends of one relationship, resolved when the schema is rendered.
#[derive(Debug, Clone)]
pub(crate) struct RelationBinding {
    pub parent: EntityPlan,
    pub relationship: Arc<RelationshipDescriptor>,
    pub related: EntityPlan,
}

/// Resolver for relationship fields and their `_count` companions.
pub struct RelationResolver;

impl RelationResolver {
    /// To-one relationship: the related instance or null.
    pub(crate) fn one(binding: RelationBinding) -> impl Fn(ResolverContext<'_>) -> FieldFuture<'_> + Send + Sync + Clone {
        move |ctx| {
            let binding = binding.clone();
            FieldFuture::new(async move {
                let exec = get_execution_context(&ctx)?;
                let parent = parent_record(&ctx)?;
                let related = &binding.related.descriptor;
                let request = AccessRequest::new(AccessOperation::Read, &related.name);
                ensure_access(exec, request, None).await?;

                let record = related_one(
                    exec.storage.as_ref(),
                    &binding.parent.descriptor,
                    &binding.relationship,
                    related,
                    &parent,
                )
                .await
                .map_err(SchemaError::into_graphql)?;
                match record {
                    Some(record) => {
                        ensure_access(exec, request, Some(&record)).await?;
                        Ok(Some(FieldValue::owned_any(record)))
                    }
                    None => Ok(None),
                }
            })
        }
    }

    /// To-many relationship with filter, ordering and offset/limit.
    pub(crate) fn many(
        binding: RelationBinding,
        planner: QueryPlanner,
    ) -> impl Fn(ResolverContext<'_>) -> FieldFuture<'_> + Send + Sync + Clone {
        move |ctx| {
            let binding = binding.clone();
            FieldFuture::new(async move {
                let exec = get_execution_context(&ctx)?;
                let parent = parent_record(&ctx)?;
                let args = query_args(&ctx.args)?;
                let request = AccessRequest::new(AccessOperation::List, &binding.related.descriptor.name);
                ensure_access(exec, request, None).await?;

                let records = planner
                    .prepare_related(
                        &binding.parent.descriptor,
                        &binding.relationship,
                        &binding.related,
                        &parent,
                        &args,
                        exec.today,
                    )
                    .map_err(SchemaError::into_graphql)?
                    .list(exec.storage.as_ref(), args.offset, args.limit)
                    .await
                    .map_err(SchemaError::into_graphql)?;
                trace!(
                    relationship = %binding.relationship.name,
                    rows = records.len(),
                    "Resolved related instances"
                );
                Ok(Some(FieldValue::list(records.into_iter().map(FieldValue::owned_any))))
            })
        }
    }

    /// Number of related instances, optionally filtered.
    pub(crate) fn count(
        binding: RelationBinding,
        planner: QueryPlanner,
    ) -> impl Fn(ResolverContext<'_>) -> FieldFuture<'_> + Send + Sync + Clone {
        move |ctx| {
            let binding = binding.clone();
            FieldFuture::new(async move {
                let exec = get_execution_context(&ctx)?;
                let parent = parent_record(&ctx)?;
                let args = QueryArgs {
                    filter: query_args(&ctx.args)?.filter,
                    ..QueryArgs::default()
                };
                let request = AccessRequest::new(AccessOperation::Count, &binding.related.descriptor.name);
                ensure_access(exec, request, None).await?;

                let total = planner
                    .prepare_related(
                        &binding.parent.descriptor,
                        &binding.relationship,
                        &binding.related,
                        &parent,
                        &args,
                        exec.today,
                    )
                    .map_err(SchemaError::into_graphql)?
                    .count(exec.storage.as_ref())
                    .await
                    .map_err(SchemaError::into_graphql)?;
                Ok(Some(FieldValue::value(Value::Number((total as u64).into()))))
            })
        }
    }
}
