//! Structural-change notification.
//!
//! The model registry emits a [`StructuralChange`] whenever an entity's
//! shape changes; schema services subscribe through a [`ChangeBroadcaster`]
//! and rebuild affected schemas.

pub mod broadcaster;
pub mod types;

pub use broadcaster::ChangeBroadcaster;
pub use types::{StructuralChange, StructuralChangeKind};
