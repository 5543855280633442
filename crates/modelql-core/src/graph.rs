//! Validated model graph.
//!
//! A [`ModelGraph`] is an immutable, validated set of entity definitions.
//! Validation happens once at construction, so downstream compilers can rely
//! on every relationship target and parent entity existing and on every
//! entity having exactly one default view.

use std::collections::HashSet;

use indexmap::IndexMap;
use serde::Deserialize;
use tracing::debug;

use crate::error::{ModelError, Result};
use crate::model::{EntityDef, IMPLICIT_VIEW, ViewDef};

/// On-disk layout of a model file (TOML or JSON).
#[derive(Debug, Deserialize)]
struct ModelFile {
    #[serde(default)]
    entities: Vec<EntityDef>,
}

/// Immutable, validated collection of entities.
#[derive(Debug, Clone, Default)]
pub struct ModelGraph {
    entities: IndexMap<String, EntityDef>,
}

impl ModelGraph {
    /// Builds a graph from entity definitions, validating cross references.
    ///
    /// # Errors
    ///
    /// Returns a [`ModelError`] describing the first inconsistency found.
    pub fn new(defs: impl IntoIterator<Item = EntityDef>) -> Result<Self> {
        let mut entities = IndexMap::new();
        for mut def in defs {
            if entities.contains_key(&def.name) {
                return Err(ModelError::DuplicateEntity(def.name));
            }
            if def.views.is_empty() {
                def.views.push(ViewDef::default_view(IMPLICIT_VIEW));
            }
            entities.insert(def.name.clone(), def);
        }

        let graph = Self { entities };
        graph.validate()?;
        debug!(entities = graph.entities.len(), "Model graph validated");
        Ok(graph)
    }

    /// Parses a TOML model file (`[[entities]]` tables).
    pub fn from_toml(source: &str) -> Result<Self> {
        let file: ModelFile = toml::from_str(source)?;
        Self::new(file.entities)
    }

    /// Parses a JSON model file (`{"entities": [...]}`).
    pub fn from_json(source: &str) -> Result<Self> {
        let file: ModelFile = serde_json::from_str(source)?;
        Self::new(file.entities)
    }

    fn validate(&self) -> Result<()> {
        for entity in self.entities.values() {
            let mut seen = HashSet::new();
            for attr in &entity.attributes {
                if !seen.insert(attr.name.as_str()) {
                    return Err(ModelError::DuplicateAttribute {
                        entity: entity.name.clone(),
                        attribute: attr.name.clone(),
                    });
                }
                if attr.is_relation() {
                    let target = attr.target.as_ref().ok_or_else(|| ModelError::MissingTarget {
                        entity: entity.name.clone(),
                        attribute: attr.name.clone(),
                    })?;
                    if !self.entities.contains_key(target) {
                        return Err(ModelError::UnknownTarget {
                            entity: entity.name.clone(),
                            attribute: attr.name.clone(),
                            target: target.clone(),
                        });
                    }
                }
            }

            if let Some(parent) = &entity.parent {
                if !self.entities.contains_key(parent) {
                    return Err(ModelError::UnknownParent {
                        entity: entity.name.clone(),
                        parent: parent.clone(),
                    });
                }
            }

            let defaults = entity.views.iter().filter(|v| v.is_default).count();
            if defaults != 1 {
                return Err(ModelError::DefaultViews {
                    entity: entity.name.clone(),
                    count: defaults,
                });
            }
            let mut view_names = HashSet::new();
            for view in &entity.views {
                if !view_names.insert(view.name.as_str()) {
                    return Err(ModelError::DuplicateView {
                        entity: entity.name.clone(),
                        view: view.name.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Looks up an entity by name.
    pub fn entity(&self, name: &str) -> Option<&EntityDef> {
        self.entities.get(name)
    }

    /// Looks up an entity, failing with [`ModelError::UnknownEntity`].
    pub fn require(&self, name: &str) -> Result<&EntityDef> {
        self.entity(name)
            .ok_or_else(|| ModelError::UnknownEntity(name.to_string()))
    }

    /// Entity names in declaration order.
    pub fn entity_names(&self) -> impl Iterator<Item = &str> {
        self.entities.keys().map(String::as_str)
    }

    /// All entities in declaration order.
    pub fn entities(&self) -> impl Iterator<Item = &EntityDef> {
        self.entities.values()
    }

    /// Direct subtypes of `name` (entities declaring it as parent).
    pub fn children_of<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a EntityDef> + use<'a> {
        let name = name.to_string();
        self.entities
            .values()
            .filter(move |e| e.parent.as_deref() == Some(name.as_str()))
    }

    /// All transitive subtypes of `name`.
    pub fn descendants_of(&self, name: &str) -> Vec<&EntityDef> {
        let mut out = Vec::new();
        let mut stack = vec![name.to_string()];
        while let Some(current) = stack.pop() {
            for child in self.children_of(&current) {
                stack.push(child.name.clone());
                out.push(child);
            }
        }
        out
    }

    /// Returns a new graph with `def` inserted or replaced.
    pub fn with_entity(&self, def: EntityDef) -> Result<Self> {
        let mut defs: Vec<EntityDef> = self.entities.values().cloned().collect();
        match defs.iter_mut().find(|e| e.name == def.name) {
            Some(slot) => *slot = def,
            None => defs.push(def),
        }
        Self::new(defs)
    }

    /// Returns a new graph without the named entity.
    pub fn without_entity(&self, name: &str) -> Result<Self> {
        if !self.entities.contains_key(name) {
            return Err(ModelError::UnknownEntity(name.to_string()));
        }
        Self::new(self.entities.values().filter(|e| e.name != name).cloned())
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AttributeDef;

    #[test]
    fn test_implicit_default_view() {
        let graph = ModelGraph::new([EntityDef::new("Client")]).unwrap();
        let client = graph.entity("Client").unwrap();
        assert_eq!(client.views.len(), 1);
        assert!(client.views[0].is_default);
        assert_eq!(client.views[0].name, IMPLICIT_VIEW);
    }

    #[test]
    fn test_unknown_target_rejected() {
        let invoice = EntityDef::new("Invoice")
            .attribute(AttributeDef::relation("client", "foreign_key", "Client"));
        let err = ModelGraph::new([invoice]).unwrap_err();
        assert!(matches!(err, ModelError::UnknownTarget { .. }));
    }

    #[test]
    fn test_two_default_views_rejected() {
        let client = EntityDef::new("Client")
            .view(ViewDef::default_view("all"))
            .view(ViewDef::default_view("active"));
        let err = ModelGraph::new([client]).unwrap_err();
        assert!(matches!(err, ModelError::DefaultViews { count: 2, .. }));
    }

    #[test]
    fn test_views_without_default_rejected() {
        let client = EntityDef::new("Client").view(ViewDef::new("active"));
        let err = ModelGraph::new([client]).unwrap_err();
        assert!(matches!(err, ModelError::DefaultViews { count: 0, .. }));
    }

    #[test]
    fn test_descendants() {
        let graph = ModelGraph::new([
            EntityDef::new("Party"),
            EntityDef::new("Person").parent("Party"),
            EntityDef::new("Employee").parent("Person"),
            EntityDef::new("Company").parent("Party"),
        ])
        .unwrap();

        let mut names: Vec<_> = graph
            .descendants_of("Party")
            .into_iter()
            .map(|e| e.name.as_str())
            .collect();
        names.sort_unstable();
        assert_eq!(names, vec!["Company", "Employee", "Person"]);
        assert!(graph.descendants_of("Company").is_empty());
    }

    #[test]
    fn test_children_outlive_the_queried_name() {
        let graph = ModelGraph::new([
            EntityDef::new("Party"),
            EntityDef::new("Person").parent("Party"),
        ])
        .unwrap();

        let children: Vec<&EntityDef> = {
            let name = String::from("Party");
            graph.children_of(&name).collect()
        };
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].name, "Person");
    }

    #[test]
    fn test_with_and_without_entity() {
        let graph = ModelGraph::new([EntityDef::new("Client")]).unwrap();
        let graph = graph
            .with_entity(EntityDef::new("Address"))
            .unwrap();
        assert_eq!(graph.len(), 2);

        let graph = graph.without_entity("Address").unwrap();
        assert_eq!(graph.entity_names().collect::<Vec<_>>(), vec!["Client"]);
        assert!(graph.without_entity("Address").is_err());
    }

    #[test]
    fn test_from_json() {
        let graph = ModelGraph::from_json(
            r#"{"entities": [
                {"name": "Country", "attributes": [{"name": "name", "storage_type": "varchar"}]},
                {"name": "Address", "attributes": [
                    {"name": "country", "storage_type": "foreign_key", "target": "Country"}
                ]}
            ]}"#,
        )
        .unwrap();
        assert_eq!(graph.len(), 2);
        assert!(graph.entity("Address").unwrap().attributes[0].is_relation());
    }
}
