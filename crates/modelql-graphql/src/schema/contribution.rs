//! Externally supplied root fields.
//!
//! Contributions are opaque to the compiler: a field definition, the types
//! it needs, and a resolver returning JSON. The assembler merges them into
//! the query or mutation root and rejects name clashes.

use std::fmt;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::access::RequestIdentity;
use crate::error::SchemaError;
use crate::types::{ArgumentDef, FieldDef, FieldSource, TypeDef, TypeRefDef};

/// Root a contribution is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RootKind {
    Query,
    Mutation,
}

impl RootKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Query => "Query",
            Self::Mutation => "Mutation",
        }
    }
}

/// Arguments handed to a contribution resolver.
#[derive(Debug, Clone, Default)]
pub struct ContributionCall {
    /// Field arguments converted to JSON.
    pub args: Map<String, Value>,
    pub identity: RequestIdentity,
}

/// Resolver of a contributed field. The returned JSON is projected through
/// the declared field type; objects resolve their fields by key.
pub type ContributionResolver =
    Arc<dyn Fn(ContributionCall) -> BoxFuture<'static, Result<Value, SchemaError>> + Send + Sync>;

/// One pre-built root field.
#[derive(Clone)]
pub struct Contribution {
    pub root: RootKind,
    pub field: FieldDef,
    /// Types the field references that the compiler does not generate.
    pub types: Vec<TypeDef>,
    pub resolver: ContributionResolver,
}

impl Contribution {
    fn new<F>(root: RootKind, name: &str, ty: TypeRefDef, resolver: F) -> Self
    where
        F: Fn(ContributionCall) -> BoxFuture<'static, Result<Value, SchemaError>>
            + Send
            + Sync
            + 'static,
    {
        Self {
            root,
            field: FieldDef::new(
                name,
                ty,
                FieldSource::Contribution {
                    name: name.to_string(),
                },
            ),
            types: Vec::new(),
            resolver: Arc::new(resolver),
        }
    }

    /// Query root field.
    pub fn query<F>(name: &str, ty: TypeRefDef, resolver: F) -> Self
    where
        F: Fn(ContributionCall) -> BoxFuture<'static, Result<Value, SchemaError>>
            + Send
            + Sync
            + 'static,
    {
        Self::new(RootKind::Query, name, ty, resolver)
    }

    /// Mutation root field.
    pub fn mutation<F>(name: &str, ty: TypeRefDef, resolver: F) -> Self
    where
        F: Fn(ContributionCall) -> BoxFuture<'static, Result<Value, SchemaError>>
            + Send
            + Sync
            + 'static,
    {
        Self::new(RootKind::Mutation, name, ty, resolver)
    }

    pub fn argument(mut self, arg: ArgumentDef) -> Self {
        self.field.args.push(arg);
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.field.description = Some(description.into());
        self
    }

    /// Adds a supporting type. Object fields default to reading the
    /// same-named key of the resolved JSON object.
    pub fn with_type(mut self, ty: TypeDef) -> Self {
        self.types.push(ty);
        self
    }

    pub fn name(&self) -> &str {
        &self.field.name
    }
}

impl fmt::Debug for Contribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Contribution")
            .field("root", &self.root)
            .field("field", &self.field.name)
            .field("types", &self.types.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use futures_util::FutureExt;
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn test_contribution_resolver_runs() {
        let contribution = Contribution::query("server_time", TypeRefDef::named_nn("String"), |_| {
            async { Ok(json!("12:00")) }.boxed()
        })
        .description("Current server time");

        assert_eq!(contribution.root, RootKind::Query);
        assert_eq!(contribution.name(), "server_time");
        assert_eq!(
            contribution.field.source,
            FieldSource::Contribution {
                name: "server_time".into()
            }
        );
        let value = (contribution.resolver)(ContributionCall::default()).await.unwrap();
        assert_eq!(value, json!("12:00"));
    }

    #[tokio::test]
    async fn test_mutation_receives_arguments() {
        let contribution = Contribution::mutation("echo", TypeRefDef::named("String"), |call| {
            async move { Ok(call.args.get("text").cloned().unwrap_or(Value::Null)) }.boxed()
        })
        .argument(ArgumentDef::new("text", TypeRefDef::named_nn("String")));
        assert_eq!(contribution.field.args.len(), 1);

        let mut args = Map::new();
        args.insert("text".into(), json!("hi"));
        let value = (contribution.resolver)(ContributionCall {
            args,
            identity: RequestIdentity::anonymous(),
        })
        .await
        .unwrap();
        assert_eq!(value, json!("hi"));
    }
}
