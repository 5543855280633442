//! Executable schemas rendered from compiled artifacts.
//!
//! This module turns a [`SchemaArtifact`](crate::schema::SchemaArtifact)
//! into an `async_graphql::dynamic::Schema`:
//! - `render`: types, arguments and limits
//! - `query`: root single, list and paginated fields
//! - `relation`: relationship and related-count fields
//! - `fields`: plain projections (columns, enums, computed attributes, pages)
//!
//! Entity instances travel between resolvers as owned [`Record`] values;
//! contributed fields return JSON and their nested objects are read by key.

mod fields;
mod query;
mod relation;
mod render;

pub use render::DynamicSchemaRenderer;

use std::borrow::Cow;

use async_graphql::dynamic::{ObjectAccessor, ResolverContext, ValueAccessor};
use async_graphql::{Error as GraphQLError, Value};
use modelql_core::Record;
use serde_json::Map;

use crate::access::{AccessRequest, RequestIdentity};
use crate::context::ExecutionContext;
use crate::error::SchemaError;
use crate::planner::QueryArgs;

/// Helper to extract the execution context from resolver context.
pub(crate) fn get_execution_context<'a>(
    ctx: &'a ResolverContext<'_>,
) -> Result<&'a ExecutionContext, GraphQLError> {
    ctx.data::<ExecutionContext>()
        .map_err(|_| SchemaError::internal("Execution context not available").into_graphql())
}

/// Runs the access checker, mapping a denial to a GraphQL error.
pub(crate) async fn ensure_access(
    exec: &ExecutionContext,
    request: AccessRequest<'_>,
    instance: Option<&Record>,
) -> Result<(), GraphQLError> {
    exec.access
        .ensure_operation_access(&request, &exec.identity, instance)
        .await
        .map_err(SchemaError::into_graphql)
}

/// Identity of the request, anonymous when no context is attached.
pub(crate) fn request_identity(ctx: &ResolverContext<'_>) -> RequestIdentity {
    ctx.data_opt::<ExecutionContext>()
        .map(|exec| exec.identity.clone())
        .unwrap_or_default()
}

/// The parent instance of a field: a record produced by a generated
/// resolver, or a JSON object produced by a contribution.
pub(crate) fn parent_record<'a>(ctx: &ResolverContext<'a>) -> Result<Cow<'a, Record>, GraphQLError> {
    if let Ok(record) = ctx.parent_value.try_downcast_ref::<Record>() {
        return Ok(Cow::Borrowed(record));
    }
    match ctx.parent_value.as_value().map(graphql_to_json) {
        Some(Ok(serde_json::Value::Object(map))) => Ok(Cow::Owned(map)),
        _ => Err(SchemaError::internal("Parent value is not an object").into_graphql()),
    }
}

/// Convert a serde_json::Value to async_graphql::Value.
pub(crate) fn json_to_graphql_value(json: serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Boolean(b),
        serde_json::Value::Number(n) => Value::Number(n),
        serde_json::Value::String(s) => Value::String(s),
        serde_json::Value::Array(arr) => {
            Value::List(arr.into_iter().map(json_to_graphql_value).collect())
        }
        serde_json::Value::Object(obj) => {
            let map: async_graphql::indexmap::IndexMap<async_graphql::Name, Value> = obj
                .into_iter()
                .map(|(k, v)| (async_graphql::Name::new(k), json_to_graphql_value(v)))
                .collect();
            Value::Object(map)
        }
    }
}

/// Convert an async_graphql::Value to serde_json::Value.
pub(crate) fn graphql_to_json(value: &Value) -> Result<serde_json::Value, GraphQLError> {
    match value {
        Value::Enum(name) => Ok(serde_json::Value::String(name.to_string())),
        Value::List(items) => items
            .iter()
            .map(graphql_to_json)
            .collect::<Result<Vec<_>, _>>()
            .map(serde_json::Value::Array),
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| graphql_to_json(v).map(|v| (k.to_string(), v)))
            .collect::<Result<Map<_, _>, _>>()
            .map(serde_json::Value::Object),
        other => other
            .clone()
            .into_json()
            .map_err(|e| SchemaError::validation(format!("Unsupported argument value: {e}")).into_graphql()),
    }
}

/// All arguments of a field as a JSON object.
pub(crate) fn arguments_to_json(args: &ObjectAccessor<'_>) -> Result<Map<String, serde_json::Value>, GraphQLError> {
    args.iter()
        .map(|(name, value)| graphql_to_json(value.as_value()).map(|v| (name.to_string(), v)))
        .collect()
}

fn present<'a>(args: &'a ObjectAccessor<'_>, name: &str) -> Option<ValueAccessor<'a>> {
    args.get(name).filter(|v| !v.is_null())
}

fn non_negative(args: &ObjectAccessor<'_>, name: &str) -> Result<Option<usize>, GraphQLError> {
    let Some(value) = present(args, name) else {
        return Ok(None);
    };
    let n = value.i64()?;
    usize::try_from(n).map(Some).map_err(|_| {
        SchemaError::validation(format!("Argument {name} must not be negative, got {n}")).into_graphql()
    })
}

/// Reads the list, paginated and relation arguments a field declares.
pub(crate) fn query_args(args: &ObjectAccessor<'_>) -> Result<QueryArgs, GraphQLError> {
    let filter = present(args, "filter")
        .map(|v| graphql_to_json(v.as_value()))
        .transpose()?;
    let order_by = match present(args, "order_by") {
        Some(list) => list
            .list()?
            .iter()
            .map(|item| item.string().map(str::to_string))
            .collect::<Result<Vec<_>, _>>()?,
        None => Vec::new(),
    };
    Ok(QueryArgs {
        filter,
        order_by,
        offset: non_negative(args, "offset")?,
        limit: non_negative(args, "limit")?,
        page: present(args, "page").map(|v| v.i64()).transpose()?,
        per_page: present(args, "per_page").map(|v| v.i64()).transpose()?,
    })
}

#[cfg(test)]
mod tests {
    use async_graphql::Value;
    use serde_json::json;

    use super::*;

    #[test]
    fn test_json_to_graphql_value_primitives() {
        assert!(matches!(json_to_graphql_value(json!(null)), Value::Null));
        assert!(matches!(json_to_graphql_value(json!(true)), Value::Boolean(true)));
        assert!(matches!(json_to_graphql_value(json!(42)), Value::Number(_)));
        assert!(matches!(json_to_graphql_value(json!(12.5)), Value::Number(_)));
        assert!(matches!(json_to_graphql_value(json!("hello")), Value::String(s) if s == "hello"));
    }

    #[test]
    fn test_json_to_graphql_value_complex() {
        let arr = json_to_graphql_value(json!([1, 2, 3]));
        assert!(matches!(arr, Value::List(ref items) if items.len() == 3));

        let obj = json_to_graphql_value(json!({"name": "Ana"}));
        assert!(matches!(obj, Value::Object(_)));
    }

    #[test]
    fn test_graphql_to_json_keeps_enums_as_names() {
        let value = json_to_graphql_value(json!({"status__in": ["draft"], "AND": [{"paid": false}]}));
        assert_eq!(
            graphql_to_json(&value).unwrap(),
            json!({"status__in": ["draft"], "AND": [{"paid": false}]})
        );
        assert_eq!(
            graphql_to_json(&Value::Enum(async_graphql::Name::new("DRAFT"))).unwrap(),
            json!("DRAFT")
        );
    }
}
