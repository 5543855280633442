//! Storage traits for the query-layer abstraction.
//!
//! Generated resolvers talk to storage exclusively through [`EntityStorage`].
//! The schema compiler itself never calls storage: only resolvers do, at
//! execution time.

use std::sync::Arc;

use async_trait::async_trait;
use modelql_core::Record;
use serde_json::Value;

use crate::error::StorageError;
use crate::types::QuerySpec;

/// The storage/query collaborator every backend implements.
///
/// Implementations must be thread-safe (`Send + Sync`).
///
/// # Example
///
/// ```ignore
/// use modelql_storage::{EntityStorage, QuerySpec, SortKey, StorageError};
///
/// async fn newest_invoices(storage: &dyn EntityStorage) -> Result<Vec<Record>, StorageError> {
///     let spec = QuerySpec::new("Invoice")
///         .order_by(vec![SortKey::desc("issued_at")])
///         .slice(0, Some(10));
///     storage.fetch(&spec).await
/// }
/// ```
#[async_trait]
pub trait EntityStorage: Send + Sync {
    /// Reads one instance by identifier.
    ///
    /// Returns `None` if the instance does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error only for infrastructure issues, not for missing instances.
    async fn get_by_id(&self, entity: &str, id: &Value) -> Result<Option<Record>, StorageError>;

    /// Executes a query, honoring filter, ordering, count annotations,
    /// eager-load hints and the offset/limit slice.
    ///
    /// Count annotations are materialized on each returned record under
    /// their alias.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::InvalidQuery` for constructs the backend rejects.
    async fn fetch(&self, spec: &QuerySpec) -> Result<Vec<Record>, StorageError>;

    /// Counts the instances matching the query's filter, ignoring slice and ordering.
    async fn count(&self, spec: &QuerySpec) -> Result<u64, StorageError>;

    /// Name of this backend for logging.
    fn backend_name(&self) -> &'static str;
}

/// Type alias for a shareable storage instance.
pub type DynStorage = Arc<dyn EntityStorage>;
