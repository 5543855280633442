//! GraphQL execution context.
//!
//! This module provides the context struct that holds everything generated
//! resolvers need at execution time. The context is constructed per-request
//! and attached to the request as data.
//!
//! # Example
//!
//! ```ignore
//! use modelql_graphql::{AllowAll, ExecutionContext, RequestIdentity};
//!
//! let context = ExecutionContext::builder()
//!     .with_storage(storage.clone())
//!     .with_access(Arc::new(AllowAll))
//!     .with_identity(RequestIdentity::subject("ana"))
//!     .build()?;
//!
//! let response = schema.execute(Request::new(query).data(context)).await;
//! ```

use std::sync::Arc;

use modelql_storage::DynStorage;
use time::{Date, OffsetDateTime};

use crate::access::{AccessChecker, AllowAll, RequestIdentity};

/// Per-request execution context.
///
/// The context is `Clone` and `Send + Sync`; shared state sits behind `Arc`.
#[derive(Clone)]
pub struct ExecutionContext {
    /// Storage backend queried by resolvers.
    pub storage: DynStorage,

    /// Authorization collaborator consulted before every read.
    pub access: Arc<dyn AccessChecker>,

    /// Caller identity handed to the access checker.
    pub identity: RequestIdentity,

    /// Date used to evaluate date presets. Defaults to the current UTC date.
    pub today: Date,
}

impl ExecutionContext {
    /// Creates a new builder for ExecutionContext.
    #[must_use]
    pub fn builder() -> ExecutionContextBuilder {
        ExecutionContextBuilder::default()
    }

    /// Context over `storage` that allows every operation.
    pub fn allow_all(storage: DynStorage) -> Self {
        Self {
            storage,
            access: Arc::new(AllowAll),
            identity: RequestIdentity::anonymous(),
            today: OffsetDateTime::now_utc().date(),
        }
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("storage", &self.storage.backend_name())
            .field("identity", &self.identity)
            .field("today", &self.today)
            .finish_non_exhaustive()
    }
}

/// Builder for constructing ExecutionContext.
#[derive(Default)]
pub struct ExecutionContextBuilder {
    storage: Option<DynStorage>,
    access: Option<Arc<dyn AccessChecker>>,
    identity: Option<RequestIdentity>,
    today: Option<Date>,
}

impl ExecutionContextBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_storage(mut self, storage: DynStorage) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Sets the access checker. [`AllowAll`] is used when unset.
    #[must_use]
    pub fn with_access(mut self, access: Arc<dyn AccessChecker>) -> Self {
        self.access = Some(access);
        self
    }

    #[must_use]
    pub fn with_identity(mut self, identity: RequestIdentity) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Pins the date presets are evaluated against.
    #[must_use]
    pub fn with_today(mut self, today: Date) -> Self {
        self.today = Some(today);
        self
    }

    /// Builds the ExecutionContext.
    ///
    /// # Errors
    ///
    /// Returns an error if required fields are missing.
    pub fn build(self) -> Result<ExecutionContext, ContextBuilderError> {
        let storage = self
            .storage
            .ok_or(ContextBuilderError::MissingField("storage"))?;

        Ok(ExecutionContext {
            storage,
            access: self.access.unwrap_or_else(|| Arc::new(AllowAll)),
            identity: self.identity.unwrap_or_default(),
            today: self
                .today
                .unwrap_or_else(|| OffsetDateTime::now_utc().date()),
        })
    }
}

/// Errors that can occur when building an ExecutionContext.
#[derive(Debug, thiserror::Error)]
pub enum ContextBuilderError {
    /// A required field was not provided.
    #[error("Missing required field: {0}")]
    MissingField(&'static str),
}
