//! Descriptors produced by the model graph reader.

use std::collections::BTreeSet;
use std::fmt;

use modelql_core::{AttributeDef, AutoPopulate, ComputeFn, OperationKind, Record};
use modelql_storage::{RelationHop, RelationKind};
use serde_json::{Map, Value};

use super::classify::ScalarCategory;

/// A stored scalar field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    pub name: String,
    pub category: ScalarCategory,
    pub nullable: bool,
    pub blank: bool,
    pub has_default: bool,
    pub auto: Option<AutoPopulate>,
    pub help_text: Option<String>,
    pub choices: Vec<String>,
    pub is_identifier: bool,
    pub create_required: bool,
    pub update_required: bool,
}

impl FieldDescriptor {
    /// Builds a field from a declared attribute.
    ///
    /// Create-required: not blank-allowed, no default, not auto-populated
    /// and not the identifier. Update-required: the identifier only.
    pub fn from_attribute(attr: &AttributeDef, category: ScalarCategory, identifier: &str) -> Self {
        let is_identifier = attr.name == identifier;
        let has_default = attr.default.is_some();
        Self {
            name: attr.name.clone(),
            category,
            nullable: attr.nullable,
            blank: attr.blank,
            has_default,
            auto: attr.auto,
            help_text: attr.help_text.clone(),
            choices: attr.choices.clone(),
            is_identifier,
            create_required: !attr.blank && !has_default && attr.auto.is_none() && !is_identifier,
            update_required: is_identifier,
        }
    }

    /// Identifier field for entities that do not declare one.
    pub fn implicit_identifier(name: &str) -> Self {
        let attr = AttributeDef::new(name, "bigserial").auto(AutoPopulate::Create);
        Self::from_attribute(&attr, ScalarCategory::Int, name)
    }
}

/// Whether a relationship yields one or many instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    One,
    Many,
}

/// A forward or inferred reverse relationship.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationshipDescriptor {
    pub name: String,
    pub kind: RelationKind,
    pub related: String,
    pub nullable: bool,
    /// Column holding the link. Lives on this entity for forward kinds and
    /// on the related entity for reverse kinds.
    pub link_fields: Vec<String>,
    pub source_identifier: String,
    pub related_identifier: String,
    /// Name of the opposite relationship on the related entity.
    pub link_back: Option<String>,
    pub help_text: Option<String>,
}

impl RelationshipDescriptor {
    pub fn cardinality(&self) -> Cardinality {
        if self.kind.is_many() {
            Cardinality::Many
        } else {
            Cardinality::One
        }
    }

    pub fn link_column(&self) -> &str {
        self.link_fields.first().map(String::as_str).unwrap_or_default()
    }

    /// Traversal description handed to storage backends.
    pub fn hop(&self) -> RelationHop {
        RelationHop {
            name: self.name.clone(),
            kind: self.kind,
            target: self.related.clone(),
            column: self.link_column().to_string(),
            source_identifier: self.source_identifier.clone(),
            target_identifier: self.related_identifier.clone(),
        }
    }
}

/// A computed attribute evaluated over materialized records.
#[derive(Clone)]
pub struct ComputedDescriptor {
    pub name: String,
    pub category: ScalarCategory,
    pub help_text: Option<String>,
    pub compute: ComputeFn,
}

impl ComputedDescriptor {
    pub fn evaluate(&self, record: &Record) -> Value {
        (self.compute)(record)
    }
}

impl fmt::Debug for ComputedDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputedDescriptor")
            .field("name", &self.name)
            .field("category", &self.category)
            .finish_non_exhaustive()
    }
}

/// A named, pre-filtered subset of an entity's instances.
#[derive(Debug, Clone, PartialEq)]
pub struct NamedView {
    pub name: String,
    pub is_default: bool,
    pub conditions: Map<String, Value>,
    pub description: Option<String>,
}

/// An operation the entity declares support for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationCandidate {
    pub name: String,
    pub kind: OperationKind,
}

/// Attribute the reader could not classify.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedAttribute {
    pub name: String,
    pub reason: String,
}

/// Everything downstream compilers need to know about one entity.
#[derive(Debug, Clone)]
pub struct EntityDescriptor {
    pub name: String,
    pub description: Option<String>,
    pub identifier: String,
    pub single_field: String,
    pub plural_field: String,
    pub fields: Vec<FieldDescriptor>,
    pub relationships: Vec<RelationshipDescriptor>,
    pub computed: Vec<ComputedDescriptor>,
    pub views: Vec<NamedView>,
    pub operations: Vec<OperationCandidate>,
    /// Transitive subtypes, in graph order.
    pub descendants: Vec<String>,
    /// Column naming the concrete subtype of a stored instance.
    pub discriminator: Option<String>,
    /// Ordering allow-list, when declared.
    pub ordering: Option<Vec<String>>,
    pub skipped: Vec<SkippedAttribute>,
    /// Entities whose definitions were read while describing this one.
    pub dependencies: BTreeSet<String>,
}

impl EntityDescriptor {
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn relationship(&self, name: &str) -> Option<&RelationshipDescriptor> {
        self.relationships.iter().find(|r| r.name == name)
    }

    pub fn computed(&self, name: &str) -> Option<&ComputedDescriptor> {
        self.computed.iter().find(|c| c.name == name)
    }

    pub fn view(&self, name: &str) -> Option<&NamedView> {
        self.views.iter().find(|v| v.name == name)
    }

    pub fn default_view(&self) -> Option<&NamedView> {
        self.views.iter().find(|v| v.is_default)
    }

    pub fn identifier_field(&self) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.is_identifier)
    }

    pub fn is_polymorphic(&self) -> bool {
        !self.descendants.is_empty()
    }

    pub fn supports(&self, kind: OperationKind) -> bool {
        self.operations.iter().any(|op| op.kind == kind)
    }

    pub fn depends_on(&self, entity: &str) -> bool {
        self.dependencies.contains(entity)
    }

    /// Record with computed attributes evaluated and inserted.
    pub fn with_computed(&self, record: &Record) -> Record {
        let mut out = record.clone();
        for computed in &self.computed {
            out.insert(computed.name.clone(), computed.evaluate(record));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// Every (nullable, blank, default, auto) combination for a plain field.
    #[test]
    fn test_required_ness_table() {
        for nullable in [false, true] {
            for blank in [false, true] {
                for has_default in [false, true] {
                    for auto in [None, Some(AutoPopulate::Create), Some(AutoPopulate::Update)] {
                        let mut attr = AttributeDef::new("title", "text");
                        attr.nullable = nullable;
                        attr.blank = blank;
                        attr.auto = auto;
                        if has_default {
                            attr.default = Some(json!("x"));
                        }

                        let field = FieldDescriptor::from_attribute(&attr, ScalarCategory::Text, "id");
                        let expected = !blank && !has_default && auto.is_none();
                        assert_eq!(
                            field.create_required, expected,
                            "nullable={nullable} blank={blank} default={has_default} auto={auto:?}"
                        );
                        assert!(!field.update_required);
                    }
                }
            }
        }
    }

    #[test]
    fn test_identifier_required_only_for_update() {
        let attr = AttributeDef::new("id", "integer");
        let field = FieldDescriptor::from_attribute(&attr, ScalarCategory::Int, "id");
        assert!(!field.create_required);
        assert!(field.update_required);
        assert!(field.is_identifier);
    }

    #[test]
    fn test_relationship_hop() {
        let rel = RelationshipDescriptor {
            name: "client".into(),
            kind: RelationKind::ToOneForward,
            related: "Client".into(),
            nullable: false,
            link_fields: vec!["client_id".into()],
            source_identifier: "id".into(),
            related_identifier: "id".into(),
            link_back: Some("invoices".into()),
            help_text: None,
        };
        let hop = rel.hop();
        assert_eq!(hop.column, "client_id");
        assert_eq!(hop.target, "Client");
        assert_eq!(rel.cardinality(), Cardinality::One);
    }
}
