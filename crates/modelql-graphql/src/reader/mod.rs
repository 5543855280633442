//! Model graph reader.
//!
//! Turns one entity definition into an [`EntityDescriptor`]: classified
//! fields, forward and inferred reverse relationships, computed
//! attributes, named views and operation candidates. Inheritance plumbing
//! (parent-pointer and discriminator columns) never reaches the
//! descriptor.

mod classify;
mod descriptor;

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use dashmap::DashMap;
use modelql_core::{AttributeDef, EntityDef, ModelGraph, to_snake_case};
use modelql_storage::RelationKind;
use tracing::{debug, trace, warn};

pub use classify::{AttributeClass, CategoryFamily, ScalarCategory, classify, scalar_category};
pub use descriptor::{
    Cardinality, ComputedDescriptor, EntityDescriptor, FieldDescriptor, NamedView,
    OperationCandidate, RelationshipDescriptor, SkippedAttribute,
};

use crate::config::CompilerConfig;
use crate::error::SchemaError;

/// Memoizing reader over a model graph.
///
/// Descriptors stay cached until [`ModelGraphReader::invalidate`] is called
/// for an entity they depend on.
#[derive(Debug, Clone, Default)]
pub struct ModelGraphReader {
    memo: DashMap<String, Arc<EntityDescriptor>>,
}

impl ModelGraphReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Describes `entity`, reusing the memoized descriptor when present.
    ///
    /// # Errors
    ///
    /// Returns `SchemaError::UnknownEntity` if the graph has no such entity.
    pub fn describe(
        &self,
        graph: &ModelGraph,
        entity: &str,
    ) -> Result<Arc<EntityDescriptor>, SchemaError> {
        if let Some(hit) = self.memo.get(entity) {
            trace!(entity = %entity, "Descriptor cache hit");
            return Ok(Arc::clone(hit.value()));
        }
        trace!(entity = %entity, "Descriptor cache miss");
        let descriptor = Arc::new(describe_entity(graph, entity)?);
        Ok(Arc::clone(
            self.memo
                .entry(entity.to_string())
                .or_insert(descriptor)
                .value(),
        ))
    }

    /// Evicts every descriptor that read `entity`. Returns the eviction count.
    pub fn invalidate(&self, entity: &str) -> usize {
        let before = self.memo.len();
        self.memo.retain(|_, d| !d.depends_on(entity));
        before - self.memo.len()
    }

    pub fn clear(&self) {
        self.memo.clear();
    }

    pub fn len(&self) -> usize {
        self.memo.len()
    }

    pub fn is_empty(&self) -> bool {
        self.memo.is_empty()
    }
}

/// Inputs shared by every compiler stage during one build.
#[derive(Clone, Copy)]
pub struct CompileContext<'a> {
    pub graph: &'a ModelGraph,
    pub reader: &'a ModelGraphReader,
    pub config: &'a CompilerConfig,
}

impl<'a> CompileContext<'a> {
    pub fn new(
        graph: &'a ModelGraph,
        reader: &'a ModelGraphReader,
        config: &'a CompilerConfig,
    ) -> Self {
        Self {
            graph,
            reader,
            config,
        }
    }

    /// Memoized descriptor for `entity`.
    ///
    /// # Errors
    ///
    /// Returns `SchemaError::UnknownEntity` if the graph has no such entity.
    pub fn describe(&self, entity: &str) -> Result<Arc<EntityDescriptor>, SchemaError> {
        self.reader.describe(self.graph, entity)
    }
}

/// Describes one entity without memoization.
///
/// # Errors
///
/// Returns `SchemaError::UnknownEntity` if the graph has no such entity.
pub fn describe_entity(graph: &ModelGraph, name: &str) -> Result<EntityDescriptor, SchemaError> {
    let entity = graph
        .entity(name)
        .ok_or_else(|| SchemaError::UnknownEntity(name.to_string()))?;
    let lineage = ancestors(graph, entity);

    let mut dependencies: BTreeSet<String> = BTreeSet::from([entity.name.clone()]);
    dependencies.extend(lineage.iter().map(|a| a.name.clone()));
    let descendants: Vec<String> = graph
        .descendants_of(name)
        .into_iter()
        .map(|d| d.name.clone())
        .collect();
    dependencies.extend(descendants.iter().cloned());

    let discriminator = entity
        .discriminator
        .clone()
        .or_else(|| lineage.iter().rev().find_map(|a| a.discriminator.clone()));
    let plumbing: HashSet<&str> = lineage
        .iter()
        .chain(std::iter::once(&entity))
        .filter_map(|def| def.discriminator.as_deref())
        .collect();

    let mut descriptor = EntityDescriptor {
        name: entity.name.clone(),
        description: entity.description.clone(),
        identifier: entity.identifier.clone(),
        single_field: entity.field_name(),
        plural_field: entity.plural_field_name(),
        fields: Vec::new(),
        relationships: Vec::new(),
        computed: Vec::new(),
        views: entity
            .views
            .iter()
            .map(|v| NamedView {
                name: v.name.clone(),
                is_default: v.is_default,
                conditions: v.conditions.clone(),
                description: v.description.clone(),
            })
            .collect(),
        operations: Vec::new(),
        descendants,
        discriminator,
        ordering: entity.ordering.clone(),
        skipped: Vec::new(),
        dependencies: BTreeSet::new(),
    };

    for (owner, attr) in inherited_attributes(&lineage, entity) {
        if attr.parent_link || plumbing.contains(attr.name.as_str()) {
            trace!(entity = %name, attribute = %attr.name, "Excluding inheritance plumbing");
            continue;
        }
        match classify(attr) {
            Ok(AttributeClass::Field(category)) => descriptor.fields.push(
                FieldDescriptor::from_attribute(attr, category, &entity.identifier),
            ),
            Ok(AttributeClass::Relationship(kind)) => {
                match forward_relationship(graph, entity, owner, attr, kind) {
                    Ok(rel) => {
                        dependencies.insert(rel.related.clone());
                        descriptor.relationships.push(rel);
                    }
                    Err(reason) => skip(&mut descriptor, attr, reason),
                }
            }
            Ok(AttributeClass::Computed(category)) => match &attr.compute {
                Some(compute) => descriptor.computed.push(ComputedDescriptor {
                    name: attr.name.clone(),
                    category,
                    help_text: attr.help_text.clone(),
                    compute: Arc::clone(compute),
                }),
                None => skip(&mut descriptor, attr, "missing compute function".into()),
            },
            Ok(AttributeClass::Operation(kind)) => {
                descriptor.operations.push(OperationCandidate {
                    name: attr.name.clone(),
                    kind,
                });
            }
            Err(reason) => skip(&mut descriptor, attr, reason),
        }
    }

    if descriptor.identifier_field().is_none() {
        descriptor
            .fields
            .insert(0, FieldDescriptor::implicit_identifier(&entity.identifier));
    }

    let owners: HashSet<&str> = lineage
        .iter()
        .map(|a| a.name.as_str())
        .chain(std::iter::once(entity.name.as_str()))
        .collect();
    for source in graph.entities() {
        for attr in &source.attributes {
            if !attr.is_relation() || attr.parent_link {
                continue;
            }
            if !attr.target.as_deref().is_some_and(|t| owners.contains(t)) {
                continue;
            }
            let reverse_name = reverse_name(source, attr);
            if descriptor.relationship(&reverse_name).is_some() || descriptor.field(&reverse_name).is_some() {
                warn!(
                    entity = %name,
                    relationship = %reverse_name,
                    source = %source.name,
                    "Reverse relationship name collides with a declared attribute, skipping"
                );
                continue;
            }
            let kind = if attr.storage_type == "one_to_one" {
                RelationKind::ToOneReverse
            } else {
                RelationKind::ToManyReverse
            };
            dependencies.insert(source.name.clone());
            descriptor.relationships.push(RelationshipDescriptor {
                name: reverse_name,
                kind,
                related: source.name.clone(),
                nullable: true,
                link_fields: vec![link_column(attr)],
                source_identifier: entity.identifier.clone(),
                related_identifier: source.identifier.clone(),
                link_back: Some(attr.name.clone()),
                help_text: None,
            });
        }
    }

    descriptor.dependencies = dependencies;
    debug!(
        entity = %name,
        fields = descriptor.fields.len(),
        relationships = descriptor.relationships.len(),
        computed = descriptor.computed.len(),
        skipped = descriptor.skipped.len(),
        "Described entity"
    );
    Ok(descriptor)
}

fn skip(descriptor: &mut EntityDescriptor, attr: &AttributeDef, reason: String) {
    warn!(
        entity = %descriptor.name,
        attribute = %attr.name,
        reason = %reason,
        "Skipping attribute that cannot be introspected"
    );
    descriptor.skipped.push(SkippedAttribute {
        name: attr.name.clone(),
        reason,
    });
}

/// Ancestors of `entity`, root first.
fn ancestors<'a>(graph: &'a ModelGraph, entity: &EntityDef) -> Vec<&'a EntityDef> {
    let mut chain = Vec::new();
    let mut seen = HashSet::from([entity.name.as_str()]);
    let mut current = entity.parent.as_deref();
    while let Some(parent) = current.and_then(|p| graph.entity(p)) {
        if !seen.insert(parent.name.as_str()) {
            break;
        }
        chain.push(parent);
        current = parent.parent.as_deref();
    }
    chain.reverse();
    chain
}

/// Attributes of the lineage with their declaring entity, root first.
/// Redeclarations replace the inherited attribute in place.
fn inherited_attributes<'a>(
    lineage: &[&'a EntityDef],
    entity: &'a EntityDef,
) -> Vec<(&'a EntityDef, &'a AttributeDef)> {
    let mut attrs: Vec<(&EntityDef, &AttributeDef)> = Vec::new();
    for def in lineage.iter().copied().chain(std::iter::once(entity)) {
        for attr in &def.attributes {
            match attrs.iter().position(|(_, a)| a.name == attr.name) {
                Some(pos) => attrs[pos] = (def, attr),
                None => attrs.push((def, attr)),
            }
        }
    }
    attrs
}

fn forward_relationship(
    graph: &ModelGraph,
    entity: &EntityDef,
    owner: &EntityDef,
    attr: &AttributeDef,
    kind: RelationKind,
) -> Result<RelationshipDescriptor, String> {
    let target = attr
        .target
        .as_deref()
        .ok_or_else(|| "relationship declares no target".to_string())?;
    let related = graph
        .entity(target)
        .ok_or_else(|| format!("relationship target {target} is not in the model graph"))?;
    Ok(RelationshipDescriptor {
        name: attr.name.clone(),
        kind,
        related: related.name.clone(),
        nullable: attr.nullable || kind.is_many(),
        link_fields: vec![link_column(attr)],
        source_identifier: entity.identifier.clone(),
        related_identifier: related.identifier.clone(),
        link_back: Some(reverse_name(owner, attr)),
        help_text: attr.help_text.clone(),
    })
}

/// Column holding a forward link: explicit, `<name>_id` or `<name>_ids`.
pub(crate) fn link_column(attr: &AttributeDef) -> String {
    if let Some(column) = &attr.column {
        return column.clone();
    }
    if attr.storage_type == "many_to_many" {
        format!("{}_ids", attr.name)
    } else {
        format!("{}_id", attr.name)
    }
}

/// Name of the inferred reverse side of a forward relationship.
fn reverse_name(source: &EntityDef, attr: &AttributeDef) -> String {
    if let Some(name) = &attr.related_name {
        return name.clone();
    }
    let base = to_snake_case(&source.name);
    if attr.storage_type == "one_to_one" {
        base
    } else {
        format!("{base}_set")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modelql_core::{AutoPopulate, OperationKind, Record, ViewDef};
    use serde_json::{Value, json};

    fn graph() -> ModelGraph {
        ModelGraph::new([
            EntityDef::new("Country").attribute(AttributeDef::new("name", "text")),
            EntityDef::new("Address")
                .attribute(AttributeDef::new("city", "text"))
                .attribute(AttributeDef::relation("country", "foreign_key", "Country")),
            EntityDef::new("Client")
                .attribute(AttributeDef::new("name", "text"))
                .attribute(AttributeDef::relation("address", "one_to_one", "Address").nullable()),
            EntityDef::new("Invoice")
                .attribute(AttributeDef::new("id", "serial").auto(AutoPopulate::Create))
                .attribute(AttributeDef::new("total", "decimal"))
                .attribute(AttributeDef::new("issued_at", "date"))
                .attribute(AttributeDef::new("notes", "text").blank().nullable())
                .attribute(
                    AttributeDef::relation("client", "foreign_key", "Client").related_name("invoices"),
                )
                .attribute(AttributeDef::new("shape", "polygon"))
                .attribute(AttributeDef::computed(
                    "label",
                    "text",
                    Arc::new(|r: &Record| json!(format!("INV-{}", r.get("id").cloned().unwrap_or(Value::Null)))),
                ))
                .attribute(AttributeDef::operation("create", OperationKind::Create))
                .view(ViewDef::default_view("all"))
                .view(ViewDef::new("unpaid").with_condition("paid", json!(false))),
            EntityDef::new("LineItem")
                .attribute(AttributeDef::new("amount", "decimal"))
                .attribute(
                    AttributeDef::relation("invoice", "foreign_key", "Invoice")
                        .related_name("line_items"),
                ),
        ])
        .unwrap()
    }

    #[test]
    fn test_describe_classifies_attributes() {
        let d = describe_entity(&graph(), "Invoice").unwrap();
        let names: Vec<_> = d.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["id", "total", "issued_at", "notes"]);
        assert_eq!(d.computed.len(), 1);
        assert_eq!(d.operations.len(), 1);
        assert_eq!(d.views.len(), 2);
        assert_eq!(d.skipped.len(), 1);
        assert_eq!(d.skipped[0].name, "shape");
    }

    #[test]
    fn test_reverse_relationships_are_inferred() {
        let g = graph();
        let client = describe_entity(&g, "Client").unwrap();
        let invoices = client.relationship("invoices").unwrap();
        assert_eq!(invoices.kind, RelationKind::ToManyReverse);
        assert_eq!(invoices.link_column(), "client_id");
        assert_eq!(invoices.link_back.as_deref(), Some("client"));

        let address = describe_entity(&g, "Address").unwrap();
        let client = address.relationship("client").unwrap();
        assert_eq!(client.kind, RelationKind::ToOneReverse);

        let country = describe_entity(&g, "Country").unwrap();
        assert!(country.relationship("address_set").is_some());
    }

    #[test]
    fn test_forward_link_back() {
        let d = describe_entity(&graph(), "Invoice").unwrap();
        let client = d.relationship("client").unwrap();
        assert_eq!(client.link_back.as_deref(), Some("invoices"));
        assert!(d.depends_on("Client"));
        assert!(d.depends_on("LineItem"));
        assert!(!d.depends_on("Country"));
    }

    #[test]
    fn test_inheritance_plumbing_excluded() {
        let g = ModelGraph::new([
            EntityDef::new("Person")
                .discriminator("kind")
                .attribute(AttributeDef::new("name", "text"))
                .attribute(AttributeDef::new("kind", "text")),
            EntityDef::new("Employee")
                .parent("Person")
                .attribute(AttributeDef::relation("person_ptr", "one_to_one", "Person").parent_link())
                .attribute(AttributeDef::new("salary", "decimal")),
        ])
        .unwrap();

        let person = describe_entity(&g, "Person").unwrap();
        assert!(person.field("kind").is_none());
        assert!(person.is_polymorphic());
        assert_eq!(person.discriminator.as_deref(), Some("kind"));
        assert!(person.relationship("employee").is_none());

        let employee = describe_entity(&g, "Employee").unwrap();
        assert!(employee.field("name").is_some());
        assert!(employee.field("salary").is_some());
        assert!(employee.field("kind").is_none());
        assert!(employee.relationship("person_ptr").is_none());
    }

    #[test]
    fn test_implicit_identifier() {
        let d = describe_entity(&graph(), "Country").unwrap();
        let id = d.identifier_field().unwrap();
        assert_eq!(id.name, "id");
        assert!(id.update_required);
        assert!(!id.create_required);
    }

    #[test]
    fn test_reader_memoizes_and_invalidates_dependants() {
        let g = graph();
        let reader = ModelGraphReader::new();
        let first = reader.describe(&g, "Invoice").unwrap();
        let second = reader.describe(&g, "Invoice").unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        reader.describe(&g, "Country").unwrap();
        assert_eq!(reader.invalidate("LineItem"), 1);
        assert_eq!(reader.len(), 1);
        let third = reader.describe(&g, "Invoice").unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
    }

    #[test]
    fn test_unknown_entity() {
        let err = describe_entity(&graph(), "Nope").unwrap_err();
        assert!(matches!(err, SchemaError::UnknownEntity(_)));
    }
}
