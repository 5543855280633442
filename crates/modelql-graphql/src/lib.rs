//! # modelql-graphql
//!
//! Compiles a declarative data model into a GraphQL schema.
//!
//! The pipeline reads entity definitions from a model graph, compiles
//! object and input types, expands relationship-traversing filters up to
//! a depth ceiling, plans root query resolvers per named view, and
//! assembles everything into a versioned, content-hashed artifact.
//!
//! ## Overview
//!
//! Schemas are registered by name with [`SchemaService`] and built on
//! first request. Structural model changes evict dependent cache entries
//! and mark schemas stale; a rebuild publishes the new artifact
//! atomically and records it in the [`VersionLedger`]. A failed rebuild
//! keeps serving the previous artifact.
//!
//! ## Configuration
//!
//! Add to the embedder's TOML file:
//!
//! ```toml
//! [compiler]
//! max_filter_depth = 2
//! default_per_page = 20
//! max_per_page = 100
//! introspection = true
//! ```
//!
//! ## Modules
//!
//! - [`config`] - Configuration options
//! - [`reader`] - Entity descriptors from the model graph
//! - [`types`] - Data-first type definitions and the type compiler
//! - [`filters`] - Filter compilation, composite parsing and advisories
//! - [`planner`] - Resolver plans and query execution
//! - [`schema`] - Assembly, publishing and rebuilds
//! - [`ledger`] - Schema version records
//! - [`resolvers`] - Executable `async_graphql` schemas
//! - [`access`] - Authorization seam
//! - [`context`] - Per-request execution context
//! - [`error`] - Error types

pub mod access;
pub mod config;
pub mod context;
pub mod error;
pub mod filters;
pub mod ledger;
pub mod planner;
pub mod reader;
pub mod resolvers;
pub mod schema;
pub mod types;

#[cfg(test)]
mod test_support;

// Re-export main types
pub use access::{AccessChecker, AccessOperation, AccessRequest, AllowAll, RequestIdentity};
pub use config::CompilerConfig;
pub use context::{ContextBuilderError, ExecutionContext, ExecutionContextBuilder};
pub use error::SchemaError;
pub use filters::{FilterCompiler, FilterSet, PerformanceAdvisory};
pub use ledger::{VersionLedger, VersionRecord};
pub use planner::{QueryPlanner, ResolverPlan};
pub use reader::{CompileContext, EntityDescriptor, ModelGraphReader};
pub use resolvers::DynamicSchemaRenderer;
pub use schema::{
    Contribution, ContributionCall, RootKind, SchemaArtifact, SchemaOptions, SchemaService,
    SchemaState,
};
pub use types::{TypeCompiler, TypeDef};

/// Result type for schema operations.
pub type Result<T> = std::result::Result<T, SchemaError>;
