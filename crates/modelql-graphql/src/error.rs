//! Error types for schema compilation and resolver execution.
//!
//! Errors carry a stable machine-readable code (see [`SchemaError::error_code`])
//! that resolvers attach to GraphQL error extensions.

use async_graphql::ErrorExtensions;
use modelql_core::ModelError;
use modelql_storage::StorageError;
use tracing::{error, warn};

use crate::ledger::LedgerError;

/// Errors that can occur while compiling, publishing or executing a schema.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    /// Schema has never been built and a build is in progress.
    #[error("Schema {0} is initializing, please retry")]
    SchemaInitializing(String),

    /// No schema registered under the name.
    #[error("Unknown schema: {0}")]
    UnknownSchema(String),

    /// A schema with this name is already registered.
    #[error("Schema {0} is already registered")]
    DuplicateSchema(String),

    /// Schema build failed.
    #[error("Failed to build schema: {0}")]
    BuildFailed(String),

    /// Rebuild did not finish within the caller-supplied timeout.
    #[error("Schema rebuild timed out after {0} ms")]
    RebuildTimeout(u64),

    /// Entity is not part of the model graph.
    #[error("Unknown entity: {0}")]
    UnknownEntity(String),

    /// Filter path deeper than the compiled depth ceiling.
    #[error("Filter {path} crosses {actual} relationships, maximum is {max}")]
    DepthExceeded {
        path: String,
        actual: usize,
        max: usize,
    },

    /// Filter key not present in the compiled filter set.
    #[error("Unknown filter {key} on {entity}")]
    UnknownFilter { entity: String, key: String },

    /// Ordering name rejected by the entity's allow-list.
    #[error("Ordering by {name} is not allowed on {entity}")]
    OrderingNotAllowed { entity: String, name: String },

    /// Ordering name that is neither a field, a count nor a computed attribute.
    #[error("Cannot order {entity} by unknown name {name}")]
    UnknownOrdering { entity: String, name: String },

    /// Two contributions or generated fields share a name.
    #[error("Field {field} is defined more than once on {root}")]
    FieldConflict { root: String, field: String },

    /// Model graph error.
    #[error(transparent)]
    Model(#[from] ModelError),

    /// Version ledger error.
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// Access denied by the authorization checker.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Storage error raised while executing a resolver.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Invalid argument values.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SchemaError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns the HTTP status code a transport should use for this error.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::SchemaInitializing(_) | Self::RebuildTimeout(_) => 503,
            Self::UnknownSchema(_) | Self::UnknownEntity(_) => 404,
            Self::DepthExceeded { .. }
            | Self::UnknownFilter { .. }
            | Self::OrderingNotAllowed { .. }
            | Self::UnknownOrdering { .. }
            | Self::Validation(_) => 400,
            Self::DuplicateSchema(_) | Self::FieldConflict { .. } => 409,
            Self::Forbidden(_) => 403,
            Self::Ledger(err) if err.is_rejection() => 409,
            Self::BuildFailed(_)
            | Self::Model(_)
            | Self::Ledger(_)
            | Self::Storage(_)
            | Self::Internal(_) => 500,
        }
    }

    /// Returns the error code for GraphQL error extensions.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::SchemaInitializing(_) => "SCHEMA_INITIALIZING",
            Self::UnknownSchema(_) => "UNKNOWN_SCHEMA",
            Self::DuplicateSchema(_) => "DUPLICATE_SCHEMA",
            Self::BuildFailed(_) => "SCHEMA_BUILD_FAILED",
            Self::RebuildTimeout(_) => "REBUILD_TIMEOUT",
            Self::UnknownEntity(_) => "UNKNOWN_ENTITY",
            Self::DepthExceeded { .. } => "DEPTH_EXCEEDED",
            Self::UnknownFilter { .. } => "UNKNOWN_FILTER",
            Self::OrderingNotAllowed { .. } => "ORDERING_NOT_ALLOWED",
            Self::UnknownOrdering { .. } => "UNKNOWN_ORDERING",
            Self::FieldConflict { .. } => "FIELD_CONFLICT",
            Self::Model(_) => "MODEL_ERROR",
            Self::Ledger(_) => "LEDGER_ERROR",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::Storage(_) => "STORAGE_ERROR",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Returns the Retry-After value in seconds, if applicable.
    #[must_use]
    pub fn retry_after(&self) -> Option<u32> {
        match self {
            Self::SchemaInitializing(_) => Some(5),
            _ => None,
        }
    }

    /// Converts into a GraphQL error carrying `extensions.code`.
    pub fn into_graphql(self) -> async_graphql::Error {
        let code = self.error_code();
        async_graphql::Error::new(self.to_string()).extend_with(|_, ext| ext.set("code", code))
    }
}

impl From<StorageError> for SchemaError {
    fn from(err: StorageError) -> Self {
        let category = err.category();
        match err {
            StorageError::UnknownEntity { entity } => Self::UnknownEntity(entity),
            StorageError::InvalidQuery { message } => Self::Validation(message),
            StorageError::Unsupported { message } => {
                warn!(%category, %message, "Query not supported by storage backend");
                Self::Validation(format!("not supported by storage backend: {message}"))
            }
            other => {
                error!(%category, error = %other, "Storage backend failed");
                Self::Storage(other.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(SchemaError::SchemaInitializing("main".into()).status_code(), 503);
        assert_eq!(
            SchemaError::OrderingNotAllowed {
                entity: "Invoice".into(),
                name: "secret".into()
            }
            .status_code(),
            400
        );
        assert_eq!(SchemaError::Forbidden("nope".into()).status_code(), 403);
        assert_eq!(
            SchemaError::Ledger(LedgerError::ActiveVersion("v1".into())).status_code(),
            409
        );
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            SchemaError::DepthExceeded {
                path: "a__b__c".into(),
                actual: 3,
                max: 2
            }
            .error_code(),
            "DEPTH_EXCEEDED"
        );
        assert_eq!(SchemaError::RebuildTimeout(10).error_code(), "REBUILD_TIMEOUT");
    }

    #[test]
    fn test_retry_after() {
        assert_eq!(SchemaError::SchemaInitializing("main".into()).retry_after(), Some(5));
        assert_eq!(SchemaError::validation("x").retry_after(), None);
    }

    #[test]
    fn test_storage_conversion() {
        let err: SchemaError = StorageError::unknown_entity("Invoice").into();
        assert!(matches!(err, SchemaError::UnknownEntity(ref e) if e == "Invoice"));

        let err: SchemaError = StorageError::connection_error("down").into();
        assert_eq!(err.error_code(), "STORAGE_ERROR");
        assert_eq!(err.status_code(), 500);

        let err: SchemaError = StorageError::internal("corrupt page").into();
        assert!(matches!(err, SchemaError::Storage(ref m) if m.contains("corrupt page")));

        let err: SchemaError = StorageError::unsupported("regex lookups").into();
        assert!(matches!(err, SchemaError::Validation(ref m) if m.contains("regex lookups")));
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn test_into_graphql_sets_code() {
        let err = SchemaError::validation("bad").into_graphql();
        let code = err
            .extensions
            .as_ref()
            .and_then(|ext| ext.get("code"))
            .cloned();
        assert_eq!(code, Some(async_graphql::Value::from("VALIDATION_ERROR")));
    }
}
