//! # modelql-core
//!
//! Declarative data model for the modelql schema compiler.
//!
//! - [`model`] - entity, attribute and view definitions
//! - [`graph`] - validated, immutable model graph
//! - [`registry`] - swappable model registry that emits structural-change events
//! - [`events`] - structural-change event types and broadcaster

pub mod error;
pub mod events;
pub mod graph;
pub mod model;
pub mod registry;

pub use error::{ModelError, Result};
pub use events::{ChangeBroadcaster, StructuralChange, StructuralChangeKind};
pub use graph::ModelGraph;
pub use model::{
    AttributeDef, AutoPopulate, ComputeFn, EntityDef, OperationKind, Record, ViewDef,
    to_camel_case, to_snake_case,
};
pub use registry::ModelRegistry;
