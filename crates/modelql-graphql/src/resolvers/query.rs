//! Root query resolvers.
//!
//! Every root field executes one [`ResolverPlan`]: a single instance by
//! identifier, a list with offset/limit slicing, or a page object.

use std::sync::Arc;

use async_graphql::dynamic::{FieldFuture, FieldValue, ResolverContext};
use tracing::debug;

use super::{ensure_access, get_execution_context, graphql_to_json, query_args};
use crate::access::{AccessOperation, AccessRequest};
use crate::error::SchemaError;
use crate::planner::{EntityPlan, PlanKind, QueryPlanner, ResolverPlan, single_query};

/// Resolver for the root fields generated from resolver plans.
pub struct QueryResolver;

impl QueryResolver {
    pub fn resolve(
        plan: Arc<ResolverPlan>,
        entity: EntityPlan,
        planner: QueryPlanner,
    ) -> impl Fn(ResolverContext<'_>) -> FieldFuture<'_> + Send + Sync + Clone {
        move |ctx| {
            let plan = Arc::clone(&plan);
            let entity = entity.clone();
            FieldFuture::new(async move {
                let exec = get_execution_context(&ctx)?;
                let storage = exec.storage.as_ref();

                match plan.kind {
                    PlanKind::Single => {
                        let id = ctx
                            .args
                            .get("id")
                            .map(|v| graphql_to_json(v.as_value()))
                            .transpose()?
                            .ok_or_else(|| {
                                SchemaError::validation("Missing required argument 'id'").into_graphql()
                            })?;
                        debug!(field = %plan.field_name, id = %id, "Resolving single instance");

                        let request = AccessRequest::new(AccessOperation::Read, &plan.entity).in_view(&plan.view);
                        ensure_access(exec, request, None).await?;
                        let record = single_query(storage, &plan, &id)
                            .await
                            .map_err(SchemaError::into_graphql)?;
                        match record {
                            Some(record) => {
                                ensure_access(exec, request, Some(&record)).await?;
                                Ok(Some(FieldValue::owned_any(record)))
                            }
                            None => {
                                debug!(field = %plan.field_name, id = %id, "Instance not found");
                                Ok(None)
                            }
                        }
                    }
                    PlanKind::List => {
                        let args = query_args(&ctx.args)?;
                        let request = AccessRequest::new(AccessOperation::List, &plan.entity).in_view(&plan.view);
                        ensure_access(exec, request, None).await?;
                        let records = planner
                            .prepare(&plan, &entity, &args, exec.today)
                            .map_err(SchemaError::into_graphql)?
                            .list(storage, args.offset, args.limit)
                            .await
                            .map_err(SchemaError::into_graphql)?;
                        debug!(field = %plan.field_name, rows = records.len(), "Resolved list");
                        Ok(Some(FieldValue::list(records.into_iter().map(FieldValue::owned_any))))
                    }
                    PlanKind::Paginated => {
                        let args = query_args(&ctx.args)?;
                        let request = AccessRequest::new(AccessOperation::List, &plan.entity).in_view(&plan.view);
                        ensure_access(exec, request, None).await?;
                        let page = planner
                            .prepare(&plan, &entity, &args, exec.today)
                            .map_err(SchemaError::into_graphql)?
                            .page(storage, args.page, args.per_page)
                            .await
                            .map_err(SchemaError::into_graphql)?;
                        debug!(
                            field = %plan.field_name,
                            page = page.window.page,
                            total = page.window.total,
                            "Resolved page"
                        );
                        Ok(Some(FieldValue::owned_any(page)))
                    }
                }
            })
        }
    }
}
