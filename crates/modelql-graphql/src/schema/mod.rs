//! Schema assembly, publishing and versioning.
//!
//! ## Components
//!
//! - [`SchemaAssembler`] - runs every compilation stage and produces a [`SchemaArtifact`]
//! - [`SchemaService`] - named schemas with coalesced rebuilds and atomic publishing
//! - [`Contribution`] - externally supplied query and mutation fields
//! - [`render_sdl`] - deterministic SDL text behind the artifact hash
//!
//! ## Architecture
//!
//! The build process:
//! 1. Registering a schema builds nothing
//! 2. The first request builds it; until then readers get `SchemaInitializing`
//! 3. Structural changes evict dependent cache entries and mark schemas stale
//! 4. A rebuild publishes a new artifact atomically and records a ledger version
//! 5. A failed rebuild leaves the previous artifact in place

mod artifact;
mod assembler;
mod contribution;
mod sdl;
mod service;

pub use artifact::{ArtifactRuntime, SchemaArtifact};
pub use assembler::SchemaAssembler;
pub use contribution::{Contribution, ContributionCall, ContributionResolver, RootKind};
pub use sdl::{content_hash, render_sdl};
pub use service::{SchemaOptions, SchemaService, SchemaState};
