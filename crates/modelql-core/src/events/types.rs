//! Structural-change event types.
//!
//! Events are emitted only by the model layer when an entity's shape
//! changes. Row-level data changes never produce these events.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// What changed about an entity's shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StructuralChangeKind {
    /// A new entity was added to the model.
    EntityAdded,
    /// An entity was removed from the model.
    EntityRemoved,
    /// Fields, computed attributes or operation candidates were added, removed or altered.
    FieldsChanged,
    /// A relationship was added, removed or retargeted.
    RelationshipsChanged,
    /// Named views, inheritance or ordering declarations changed.
    DefinitionChanged,
}

impl StructuralChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StructuralChangeKind::EntityAdded => "entity_added",
            StructuralChangeKind::EntityRemoved => "entity_removed",
            StructuralChangeKind::FieldsChanged => "fields_changed",
            StructuralChangeKind::RelationshipsChanged => "relationships_changed",
            StructuralChangeKind::DefinitionChanged => "definition_changed",
        }
    }
}

impl std::fmt::Display for StructuralChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event announcing that an entity's shape changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuralChange {
    pub entity: String,
    pub kind: StructuralChangeKind,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl StructuralChange {
    pub fn new(entity: impl Into<String>, kind: StructuralChangeKind) -> Self {
        Self {
            entity: entity.into(),
            kind,
            timestamp: OffsetDateTime::now_utc(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = StructuralChange::new("Invoice", StructuralChangeKind::FieldsChanged);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["entity"], "Invoice");
        assert_eq!(json["kind"], "fields_changed");
        assert!(json["timestamp"].is_string());
    }
}
