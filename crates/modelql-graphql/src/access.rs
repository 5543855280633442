//! Access control seam for generated resolvers.
//!
//! The compiler does not define authorization semantics. Every generated
//! read resolver calls [`AccessChecker::ensure_operation_access`] before
//! touching storage (and again with the fetched instance for single
//! reads); the embedder decides what a denial means.

use async_trait::async_trait;
use modelql_core::Record;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::SchemaError;

/// Operation a resolver is about to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessOperation {
    /// Single instance by identifier.
    Read,
    /// List or page of instances.
    List,
    /// Related-instance count.
    Count,
}

impl AccessOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::List => "list",
            Self::Count => "count",
        }
    }
}

/// What is being accessed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessRequest<'a> {
    pub operation: AccessOperation,
    pub entity: &'a str,
    /// Named view the resolver serves, when it is a root field.
    pub view: Option<&'a str>,
}

impl<'a> AccessRequest<'a> {
    pub fn new(operation: AccessOperation, entity: &'a str) -> Self {
        Self {
            operation,
            entity,
            view: None,
        }
    }

    pub fn in_view(mut self, view: &'a str) -> Self {
        self.view = Some(view);
        self
    }
}

/// Caller identity attached to a request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestIdentity {
    /// Authenticated subject; `None` for anonymous requests.
    pub subject: Option<String>,
    pub roles: Vec<String>,
    /// Request ID for tracing and correlation.
    pub request_id: Option<String>,
}

impl RequestIdentity {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn subject(subject: impl Into<String>) -> Self {
        Self {
            subject: Some(subject.into()),
            ..Self::default()
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.push(role.into());
        self
    }

    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.subject.is_some()
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

/// Authorization collaborator.
#[async_trait]
pub trait AccessChecker: Send + Sync {
    /// Returns `Ok(())` when `identity` may perform `request`, optionally
    /// on a specific `instance`.
    ///
    /// # Errors
    ///
    /// Returns `SchemaError::Forbidden` (or any other error) on denial.
    async fn ensure_operation_access(
        &self,
        request: &AccessRequest<'_>,
        identity: &RequestIdentity,
        instance: Option<&Record>,
    ) -> Result<(), SchemaError>;
}

/// Checker that permits everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

#[async_trait]
impl AccessChecker for AllowAll {
    async fn ensure_operation_access(
        &self,
        request: &AccessRequest<'_>,
        _identity: &RequestIdentity,
        _instance: Option<&Record>,
    ) -> Result<(), SchemaError> {
        trace!(
            entity = %request.entity,
            operation = request.operation.as_str(),
            "Access allowed"
        );
        Ok(())
    }
}
