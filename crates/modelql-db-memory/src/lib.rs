//! In-memory storage backend for modelql resolvers.
//!
//! This crate provides an in-memory implementation of the `EntityStorage`
//! trait from `modelql-storage`, using a `DashMap` of tables for concurrent
//! access. Relationship hops, count annotations and ordering are evaluated
//! against resident rows, so it behaves like a real backend in tests.
//!
//! # Example
//!
//! ```ignore
//! use modelql_db_memory::InMemoryStorage;
//! use modelql_storage::{EntityStorage, QuerySpec};
//!
//! let storage = InMemoryStorage::new();
//! storage.insert("Client", serde_json::json!({"id": 1, "name": "Acme"}))?;
//!
//! let rows = storage.fetch(&QuerySpec::new("Client")).await?;
//! ```

mod eval;
pub mod storage;

pub use modelql_storage::{EntityStorage, StorageError};
pub use storage::InMemoryStorage;

/// Type alias for a shareable storage instance.
pub type DynEntityStorage = std::sync::Arc<dyn EntityStorage>;

/// Creates a new in-memory storage instance.
pub fn create_storage() -> DynEntityStorage {
    std::sync::Arc::new(InMemoryStorage::new())
}
