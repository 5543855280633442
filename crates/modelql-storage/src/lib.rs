//! # modelql-storage
//!
//! Storage abstraction for resolvers generated by the modelql schema compiler.
//!
//! This crate defines the contract storage backends implement and the
//! expression language queries are written in. It does not contain a
//! backend - see `modelql-db-memory` for the in-memory one.
//!
//! ## Overview
//!
//! - [`EntityStorage`] - `get_by_id`, `fetch`, `count`
//! - [`QuerySpec`] - filter, ordering, count annotations, eager-load hints, slice
//! - [`FilterExpr`] - boolean expression over [`Condition`]s with resolved relationship hops
//! - [`Lookup`] - comparison operators and their reference semantics

mod error;
pub mod filter;
mod traits;
mod types;

pub use error::{ErrorCategory, StorageError};
pub use filter::{
    Condition, ConditionTarget, FilterExpr, Lookup, RelationHop, RelationKind, compare_values,
    parse_date_prefix, values_equal,
};
pub use traits::{DynStorage, EntityStorage};
pub use types::{CountAnnotation, EagerLoadHint, FetchStrategy, QuerySpec, SortKey};

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
