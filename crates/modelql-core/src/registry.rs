//! Model registry with atomic swaps and change notification.
//!
//! The registry owns the current [`ModelGraph`] behind an `ArcSwap` so
//! compilers read a consistent snapshot without locking. Every successful
//! change emits one [`StructuralChange`] per affected entity: the entity
//! itself plus every entity whose inferred reverse side changed.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;
use tracing::{debug, info};

use crate::error::{ModelError, Result};
use crate::events::{ChangeBroadcaster, StructuralChangeKind};
use crate::graph::ModelGraph;
use crate::model::{EntityDef, IMPLICIT_VIEW};

/// Shared, swappable model graph.
pub struct ModelRegistry {
    graph: ArcSwap<ModelGraph>,
    write_lock: Mutex<()>,
    broadcaster: ChangeBroadcaster,
}

impl ModelRegistry {
    pub fn new(graph: ModelGraph) -> Self {
        Self::with_broadcaster(graph, ChangeBroadcaster::new())
    }

    pub fn with_broadcaster(graph: ModelGraph, broadcaster: ChangeBroadcaster) -> Self {
        Self {
            graph: ArcSwap::from_pointee(graph),
            write_lock: Mutex::new(()),
            broadcaster,
        }
    }

    /// Current snapshot of the model graph (lock-free).
    pub fn graph(&self) -> Arc<ModelGraph> {
        self.graph.load_full()
    }

    pub fn broadcaster(&self) -> &ChangeBroadcaster {
        &self.broadcaster
    }

    /// Inserts or replaces an entity definition.
    ///
    /// Returns the change kind emitted for the entity, or `None` when the new
    /// definition has the same shape as the old one.
    ///
    /// # Errors
    ///
    /// Returns an error if the resulting graph fails validation; the current
    /// graph is left untouched.
    pub fn upsert_entity(&self, def: EntityDef) -> Result<Option<StructuralChangeKind>> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| ModelError::invalid("model registry lock poisoned"))?;

        let current = self.graph.load_full();
        let previous = current.entity(&def.name).cloned();
        let kind = match &previous {
            None => Some(StructuralChangeKind::EntityAdded),
            Some(old) => classify_change(old, &def),
        };
        let Some(kind) = kind else {
            debug!(entity = %def.name, "Entity definition unchanged, no event");
            return Ok(None);
        };

        let mut affected = relation_targets(previous.as_ref());
        affected.extend(relation_targets(Some(&def)));

        let name = def.name.clone();
        let next = current.with_entity(def)?;
        self.graph.store(Arc::new(next));
        info!(entity = %name, kind = %kind, "Model entity changed");

        self.broadcaster.notify(name.clone(), kind);
        if kind == StructuralChangeKind::RelationshipsChanged || kind == StructuralChangeKind::EntityAdded {
            for target in affected.into_iter().filter(|t| *t != name) {
                self.broadcaster
                    .notify(target, StructuralChangeKind::RelationshipsChanged);
            }
        }
        Ok(Some(kind))
    }

    /// Removes an entity definition.
    ///
    /// # Errors
    ///
    /// Fails if the entity is unknown or still referenced by another entity.
    pub fn remove_entity(&self, name: &str) -> Result<()> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| ModelError::invalid("model registry lock poisoned"))?;

        let current = self.graph.load_full();
        let previous = current.require(name)?.clone();
        let next = current.without_entity(name)?;
        self.graph.store(Arc::new(next));
        info!(entity = %name, "Model entity removed");

        self.broadcaster
            .notify(name, StructuralChangeKind::EntityRemoved);
        for target in relation_targets(Some(&previous))
            .into_iter()
            .filter(|t| t != name)
        {
            self.broadcaster
                .notify(target, StructuralChangeKind::RelationshipsChanged);
        }
        Ok(())
    }
}

impl std::fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelRegistry")
            .field("entities", &self.graph.load().len())
            .finish()
    }
}

fn relation_targets(def: Option<&EntityDef>) -> BTreeSet<String> {
    def.map(|d| {
        d.attributes
            .iter()
            .filter(|a| a.is_relation())
            .filter_map(|a| a.target.clone())
            .collect()
    })
    .unwrap_or_default()
}

fn only_implicit_view(def: &EntityDef) -> bool {
    matches!(def.views.as_slice(), [view] if view.name == IMPLICIT_VIEW && view.conditions.is_empty())
}

/// Compares two definitions of the same entity.
fn classify_change(old: &EntityDef, new: &EntityDef) -> Option<StructuralChangeKind> {
    let relations = |d: &EntityDef| -> Vec<_> {
        d.attributes.iter().filter(|a| a.is_relation()).cloned().collect()
    };
    let others = |d: &EntityDef| -> Vec<_> {
        d.attributes.iter().filter(|a| !a.is_relation()).cloned().collect()
    };
    let same_attrs = |a: &[crate::model::AttributeDef], b: &[crate::model::AttributeDef]| {
        a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.same_shape(y))
    };

    if !same_attrs(&relations(old), &relations(new)) {
        return Some(StructuralChangeKind::RelationshipsChanged);
    }
    if !same_attrs(&others(old), &others(new)) {
        return Some(StructuralChangeKind::FieldsChanged);
    }
    let same_definition = old.parent == new.parent
        && old.discriminator == new.discriminator
        && old.identifier == new.identifier
        && old.ordering == new.ordering
        && old.plural == new.plural
        && (old.views == new.views || (new.views.is_empty() && only_implicit_view(old)));
    if !same_definition {
        return Some(StructuralChangeKind::DefinitionChanged);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AttributeDef;

    fn registry() -> ModelRegistry {
        let graph = ModelGraph::new([
            EntityDef::new("Client").attribute(AttributeDef::new("name", "varchar")),
            EntityDef::new("Invoice")
                .attribute(AttributeDef::new("total", "decimal")),
        ])
        .unwrap();
        ModelRegistry::new(graph)
    }

    #[test]
    fn test_field_change_emits_event() {
        let registry = registry();
        let mut rx = registry.broadcaster().subscribe();

        let kind = registry
            .upsert_entity(
                EntityDef::new("Client")
                    .attribute(AttributeDef::new("name", "varchar"))
                    .attribute(AttributeDef::new("email", "email")),
            )
            .unwrap();
        assert_eq!(kind, Some(StructuralChangeKind::FieldsChanged));

        let event = rx.try_recv().unwrap();
        assert_eq!(event.entity, "Client");
        assert_eq!(event.kind, StructuralChangeKind::FieldsChanged);
        assert!(registry.graph().entity("Client").unwrap().get_attribute("email").is_some());
    }

    #[test]
    fn test_unchanged_definition_is_silent() {
        let registry = registry();
        let mut rx = registry.broadcaster().subscribe();

        let kind = registry
            .upsert_entity(
                EntityDef::new("Client")
                    .attribute(AttributeDef::new("name", "varchar").help("changed help")),
            )
            .unwrap();
        assert_eq!(kind, None);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_relationship_change_notifies_target() {
        let registry = registry();
        let mut rx = registry.broadcaster().subscribe();

        registry
            .upsert_entity(
                EntityDef::new("Invoice")
                    .attribute(AttributeDef::new("total", "decimal"))
                    .attribute(AttributeDef::relation("client", "foreign_key", "Client")),
            )
            .unwrap();

        let first = rx.try_recv().unwrap();
        let second = rx.try_recv().unwrap();
        assert_eq!(first.entity, "Invoice");
        assert_eq!(first.kind, StructuralChangeKind::RelationshipsChanged);
        assert_eq!(second.entity, "Client");
    }

    #[test]
    fn test_invalid_change_keeps_graph() {
        let registry = registry();
        let before = registry.graph();

        let result = registry.upsert_entity(
            EntityDef::new("Invoice")
                .attribute(AttributeDef::relation("client", "foreign_key", "Customer")),
        );
        assert!(result.is_err());
        assert!(Arc::ptr_eq(&before, &registry.graph()));
    }

    #[test]
    fn test_remove_entity() {
        let registry = registry();
        let mut rx = registry.broadcaster().subscribe();

        registry.remove_entity("Invoice").unwrap();
        assert!(registry.graph().entity("Invoice").is_none());
        assert_eq!(rx.try_recv().unwrap().kind, StructuralChangeKind::EntityRemoved);
        assert!(registry.remove_entity("Invoice").is_err());
    }
}
