//! Projection resolvers: values read straight off the parent.

use std::sync::Arc;

use async_graphql::dynamic::{FieldFuture, FieldValue, ResolverContext};
use async_graphql::{Name, Value};
use serde_json::Value as JsonValue;

use super::{arguments_to_json, json_to_graphql_value, parent_record, request_identity};
use crate::error::SchemaError;
use crate::planner::Page;
use crate::reader::EntityDescriptor;
use crate::schema::{ContributionCall, ContributionResolver};

/// Stored column. Identifier-typed columns are rendered as strings.
pub(crate) fn column(
    column: String,
    as_id: bool,
) -> impl Fn(ResolverContext<'_>) -> FieldFuture<'_> + Send + Sync + Clone {
    move |ctx| {
        let column = column.clone();
        FieldFuture::new(async move {
            let record = parent_record(&ctx)?;
            let value = match record.get(&column) {
                None | Some(JsonValue::Null) => return Ok(None),
                Some(JsonValue::Number(n)) if as_id => Value::String(n.to_string()),
                Some(value) => json_to_graphql_value(value.clone()),
            };
            Ok(Some(FieldValue::value(value)))
        })
    }
}

/// Stored column mapped to the member name of a generated enum.
pub(crate) fn enum_column(
    column: String,
    enum_name: String,
    members: Arc<Vec<(JsonValue, String)>>,
) -> impl Fn(ResolverContext<'_>) -> FieldFuture<'_> + Send + Sync + Clone {
    move |ctx| {
        let column = column.clone();
        let enum_name = enum_name.clone();
        let members = Arc::clone(&members);
        FieldFuture::new(async move {
            let record = parent_record(&ctx)?;
            let stored = match record.get(&column) {
                None | Some(JsonValue::Null) => return Ok(None),
                Some(stored) => stored,
            };
            let member = members
                .iter()
                .find(|(value, _)| value == stored)
                .map(|(_, name)| name.clone())
                .ok_or_else(|| {
                    SchemaError::internal(format!("Stored value {stored} is not a member of {enum_name}"))
                        .into_graphql()
                })?;
            Ok(Some(FieldValue::value(Value::Enum(Name::new(member)))))
        })
    }
}

/// Computed attribute evaluated on the parent record.
pub(crate) fn computed(
    descriptor: Arc<EntityDescriptor>,
    attribute: String,
) -> impl Fn(ResolverContext<'_>) -> FieldFuture<'_> + Send + Sync + Clone {
    move |ctx| {
        let descriptor = Arc::clone(&descriptor);
        let attribute = attribute.clone();
        FieldFuture::new(async move {
            let record = parent_record(&ctx)?;
            let computed = descriptor.computed(&attribute).ok_or_else(|| {
                SchemaError::internal(format!(
                    "{} has no computed attribute {attribute}",
                    descriptor.name
                ))
                .into_graphql()
            })?;
            let value = computed.evaluate(&record);
            Ok((!value.is_null()).then(|| FieldValue::value(json_to_graphql_value(value))))
        })
    }
}

/// Concrete subtype name, falling back to the declared entity.
pub(crate) fn discriminator(
    descriptor: Arc<EntityDescriptor>,
) -> impl Fn(ResolverContext<'_>) -> FieldFuture<'_> + Send + Sync + Clone {
    move |ctx| {
        let descriptor = Arc::clone(&descriptor);
        FieldFuture::new(async move {
            let record = parent_record(&ctx)?;
            let concrete = descriptor
                .discriminator
                .as_deref()
                .and_then(|column| record.get(column))
                .and_then(JsonValue::as_str)
                .unwrap_or(&descriptor.name)
                .to_string();
            Ok(Some(FieldValue::value(Value::String(concrete))))
        })
    }
}

fn parent_page<'a>(ctx: &ResolverContext<'a>) -> Result<&'a Page, async_graphql::Error> {
    ctx.parent_value
        .try_downcast_ref::<Page>()
        .map_err(|_| SchemaError::internal("Parent value is not a page").into_graphql())
}

pub(crate) fn page_items() -> impl Fn(ResolverContext<'_>) -> FieldFuture<'_> + Send + Sync + Clone {
    move |ctx| {
        FieldFuture::new(async move {
            let page = parent_page(&ctx)?;
            Ok(Some(FieldValue::list(
                page.items.iter().cloned().map(FieldValue::owned_any),
            )))
        })
    }
}

pub(crate) fn page_info(key: String) -> impl Fn(ResolverContext<'_>) -> FieldFuture<'_> + Send + Sync + Clone {
    move |ctx| {
        let key = key.clone();
        FieldFuture::new(async move {
            let window = parent_page(&ctx)?.window;
            let count = |n: usize| Value::Number((n as u64).into());
            let value = match key.as_str() {
                "total" => count(window.total),
                "page" => count(window.page),
                "per_page" => count(window.per_page),
                "page_count" => count(window.page_count),
                "has_next_page" => Value::Boolean(window.has_next_page),
                "has_previous_page" => Value::Boolean(window.has_previous_page),
                other => {
                    return Err(SchemaError::internal(format!("Unknown page field {other}")).into_graphql());
                }
            };
            Ok(Some(FieldValue::value(value)))
        })
    }
}

pub(crate) fn constant(value: JsonValue) -> impl Fn(ResolverContext<'_>) -> FieldFuture<'_> + Send + Sync + Clone {
    move |_| {
        let value = value.clone();
        FieldFuture::new(async move {
            Ok(Some(FieldValue::value(json_to_graphql_value(value))))
        })
    }
}

/// Externally contributed root field. The returned JSON is handed to the
/// field's declared type as is.
pub(crate) fn contribution(
    resolver: ContributionResolver,
) -> impl Fn(ResolverContext<'_>) -> FieldFuture<'_> + Send + Sync + Clone {
    move |ctx| {
        let resolver = Arc::clone(&resolver);
        FieldFuture::new(async move {
            let call = ContributionCall {
                args: arguments_to_json(&ctx.args)?,
                identity: request_identity(&ctx),
            };
            let value = resolver(call).await.map_err(SchemaError::into_graphql)?;
            Ok((!value.is_null()).then(|| FieldValue::value(json_to_graphql_value(value))))
        })
    }
}
