//! Schema assembly.
//!
//! [`SchemaAssembler`] runs the reader, type, filter and planning stages
//! for every discovered entity and view, merges contributions, synthesizes
//! the query and mutation roots and hashes the result. It is synchronous
//! and touches no storage.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

use modelql_core::OperationKind;
use serde_json::Value;
use time::OffsetDateTime;
use tracing::{debug, trace};

use super::artifact::{ArtifactRuntime, SchemaArtifact};
use super::contribution::{Contribution, RootKind};
use super::sdl::{content_hash, render_document};
use crate::error::SchemaError;
use crate::filters::FilterCompiler;
use crate::planner::{EntityPlan, PlanKind, ResolverPlan, plan_resolvers};
use crate::reader::{CompileContext, EntityDescriptor};
use crate::types::{
    ArgumentDef, FieldDef, FieldSource, InputOperation, TypeCompiler, TypeDef, TypeRefDef,
    filter_type_name, is_custom_scalar, page_type_name, scalar_typedefs,
};

/// Scalars every GraphQL schema has.
const BUILTIN_SCALARS: &[&str] = &["String", "Int", "Float", "Boolean", "ID"];

/// Pagination metadata fields of page objects.
const PAGE_INFO_FIELDS: &[(&str, &str)] = &[
    ("total", "Int"),
    ("page", "Int"),
    ("per_page", "Int"),
    ("page_count", "Int"),
    ("has_next_page", "Boolean"),
    ("has_previous_page", "Boolean"),
];

/// Builds schema artifacts from a compile context and shared caches.
pub struct SchemaAssembler<'a> {
    ctx: CompileContext<'a>,
    types: &'a TypeCompiler,
    filters: &'a FilterCompiler,
    contributions: &'a [Contribution],
    selection: Option<&'a [String]>,
}

impl<'a> SchemaAssembler<'a> {
    pub fn new(ctx: CompileContext<'a>, types: &'a TypeCompiler, filters: &'a FilterCompiler) -> Self {
        Self {
            ctx,
            types,
            filters,
            contributions: &[],
            selection: None,
        }
    }

    pub fn contributions(mut self, contributions: &'a [Contribution]) -> Self {
        self.contributions = contributions;
        self
    }

    /// Restricts the schema to `entities` and everything they reach.
    pub fn entities(mut self, entities: Option<&'a [String]>) -> Self {
        self.selection = entities;
        self
    }

    /// Entities the schema covers, sorted by name.
    ///
    /// Without a selection this is the whole graph; with one it is the
    /// closure of the selection over relationship targets.
    ///
    /// # Errors
    ///
    /// Returns `SchemaError::UnknownEntity` for a selected entity outside
    /// the graph.
    pub fn discover(&self) -> Result<Vec<String>, SchemaError> {
        let Some(selection) = self.selection else {
            let mut names: Vec<String> = self
                .ctx
                .graph
                .entity_names()
                .map(str::to_string)
                .collect();
            names.sort();
            return Ok(names);
        };

        let mut seen: BTreeSet<String> = BTreeSet::new();
        let mut queue: VecDeque<String> = selection.iter().cloned().collect();
        while let Some(name) = queue.pop_front() {
            if seen.contains(&name) {
                continue;
            }
            let d = self.ctx.describe(&name)?;
            queue.extend(d.relationships.iter().map(|r| r.related.clone()));
            seen.insert(name);
        }
        Ok(seen.into_iter().collect())
    }

    /// Runs every stage and produces an artifact stamped with `version`.
    ///
    /// # Errors
    ///
    /// Returns the first stage error, `SchemaError::FieldConflict` for
    /// clashing root fields, or `SchemaError::BuildFailed` for conflicting
    /// or missing type definitions. No partial artifact is produced.
    pub fn assemble(&self, name: &str, version: u64) -> Result<SchemaArtifact, SchemaError> {
        debug!(schema = %name, version, "Starting schema assembly");
        let entities = self.discover()?;

        let mut registry = TypeRegistry::default();
        let mut query = TypeDef::object("Query").description(Some("Query root".to_string()));
        let mut mutation =
            TypeDef::object("Mutation").description(Some("Mutation root".to_string()));
        let mut resolvers = Vec::new();
        let mut plans = HashMap::new();
        let mut advisories = BTreeMap::new();

        for entity in &entities {
            let plan = self.compile_entity(entity, &mut registry)?;
            for resolver in plan_resolvers(&plan) {
                push_root(&mut query, root_field(&plan.descriptor, &resolver))?;
                trace!(entity = %entity, field = %resolver.field_name, "Added query field");
                resolvers.push(resolver);
            }
            advisories.insert(entity.clone(), plan.filters.advisory.clone());
            plans.insert(entity.clone(), plan);
        }

        let mut contributed = HashMap::new();
        for contribution in self.contributions {
            let root = match contribution.root {
                RootKind::Query => &mut query,
                RootKind::Mutation => &mut mutation,
            };
            let key = contribution_key(contribution.root, contribution.name());
            let mut field = contribution.field.clone();
            field.source = FieldSource::Contribution { name: key.clone() };
            push_root(root, field)?;
            for ty in &contribution.types {
                registry.insert(ty.clone())?;
            }
            contributed.insert(key, Arc::clone(&contribution.resolver));
        }

        if mutation.fields.is_empty() {
            mutation.push_field(
                FieldDef::new(
                    "_noop",
                    TypeRefDef::named("Boolean"),
                    FieldSource::Constant { value: Value::Bool(true) },
                )
                .description(Some("Placeholder keeping the mutation root valid".to_string())),
            );
        }

        registry.add_referenced_scalars(&query, &mutation)?;
        registry.validate(&query, &mutation)?;

        let types = registry.into_types();
        let hash = content_hash(&render_document(&types, &query, &mutation));
        debug!(
            schema = %name,
            version,
            entities = entities.len(),
            types = types.len(),
            hash = %hash,
            "Schema assembly complete"
        );

        Ok(SchemaArtifact {
            name: name.to_string(),
            version,
            hash,
            types,
            query,
            mutation,
            resolvers,
            entities,
            advisories,
            built_at: OffsetDateTime::now_utc(),
            runtime: Arc::new(ArtifactRuntime {
                entities: plans,
                contributions: contributed,
                config: self.ctx.config.clone(),
            }),
        })
    }

    /// Entity plans for the current graph, used to revive restored
    /// artifacts.
    ///
    /// # Errors
    ///
    /// Returns the first reader or filter compilation error.
    pub fn entity_plans(&self, entities: &[String]) -> Result<HashMap<String, EntityPlan>, SchemaError> {
        entities
            .iter()
            .map(|e| {
                let descriptor = self.ctx.describe(e)?;
                let filters =
                    self.filters
                        .compile_filters(&self.ctx, e, self.ctx.config.effective_depth())?;
                Ok((e.clone(), EntityPlan::new(descriptor, filters)))
            })
            .collect()
    }

    fn compile_entity(&self, entity: &str, registry: &mut TypeRegistry) -> Result<EntityPlan, SchemaError> {
        let descriptor = self.ctx.describe(entity)?;
        let object = self.types.compile_object_type(&self.ctx, entity)?;
        for ty in object.types() {
            registry.insert(ty.clone())?;
        }

        let filters = self
            .filters
            .compile_filters(&self.ctx, entity, self.ctx.config.effective_depth())?;
        registry.insert(filters.input_type())?;
        registry.insert(page_type(&descriptor.name))?;

        let mut inputs = Vec::new();
        if descriptor.supports(OperationKind::Create) {
            inputs.push((InputOperation::Create, false));
            inputs.push((InputOperation::Create, true));
        }
        if descriptor.supports(OperationKind::Update) {
            inputs.push((InputOperation::Update, false));
        }
        for (operation, partial) in inputs {
            let compiled = self
                .types
                .compile_input_type(&self.ctx, entity, operation, partial)?;
            for ty in compiled.types() {
                registry.insert(ty.clone())?;
            }
        }

        trace!(entity = %entity, "Compiled entity stages");
        Ok(EntityPlan::new(descriptor, filters))
    }
}

pub(crate) fn contribution_key(root: RootKind, field: &str) -> String {
    format!("{}.{field}", root.type_name())
}

fn push_root(root: &mut TypeDef, field: FieldDef) -> Result<(), SchemaError> {
    if root.get_field(&field.name).is_some() {
        return Err(SchemaError::FieldConflict {
            root: root.name.clone(),
            field: field.name,
        });
    }
    root.push_field(field);
    Ok(())
}

fn root_field(d: &EntityDescriptor, plan: &ResolverPlan) -> FieldDef {
    let source = FieldSource::Query {
        plan: plan.field_name.clone(),
    };
    let description = d.view(&plan.view).and_then(|v| v.description.clone());
    let filter = TypeRefDef::named(filter_type_name(&d.name));
    let order_by = TypeRefDef::named_list("String");
    let int = TypeRefDef::named("Int");

    let field = match plan.kind {
        PlanKind::Single => FieldDef::new(&plan.field_name, TypeRefDef::named(&d.name), source)
            .argument(ArgumentDef::new("id", TypeRefDef::named_nn("ID"))),
        PlanKind::List => FieldDef::new(
            &plan.field_name,
            TypeRefDef::named_nn_list_nn(&d.name),
            source,
        )
        .argument(ArgumentDef::new("filter", filter))
        .argument(ArgumentDef::new("order_by", order_by))
        .argument(ArgumentDef::new("offset", int.clone()))
        .argument(ArgumentDef::new("limit", int)),
        PlanKind::Paginated => FieldDef::new(
            &plan.field_name,
            TypeRefDef::named_nn(page_type_name(&d.name)),
            source,
        )
        .argument(ArgumentDef::new("filter", filter))
        .argument(ArgumentDef::new("order_by", order_by))
        .argument(ArgumentDef::new("page", int.clone()))
        .argument(ArgumentDef::new("per_page", int)),
    };
    field.description(description)
}

fn page_type(entity: &str) -> TypeDef {
    let mut ty = TypeDef::object(page_type_name(entity))
        .entity(entity)
        .description(Some(format!("One page of {entity} instances")))
        .field(FieldDef::new(
            "items",
            TypeRefDef::named_nn_list_nn(entity),
            FieldSource::PageItems,
        ));
    for (key, scalar) in PAGE_INFO_FIELDS {
        ty.push_field(FieldDef::new(
            *key,
            TypeRefDef::named_nn(*scalar),
            FieldSource::PageInfo {
                key: (*key).to_string(),
            },
        ));
    }
    ty
}

/// Named types collected during assembly.
#[derive(Debug, Default)]
struct TypeRegistry {
    types: BTreeMap<String, TypeDef>,
}

impl TypeRegistry {
    /// Adds a type. Re-adding an identical definition is a no-op.
    fn insert(&mut self, ty: TypeDef) -> Result<(), SchemaError> {
        match self.types.get(&ty.name) {
            Some(existing) if *existing == ty => Ok(()),
            Some(_) => Err(SchemaError::BuildFailed(format!(
                "conflicting definitions for type {}",
                ty.name
            ))),
            None => {
                self.types.insert(ty.name.clone(), ty);
                Ok(())
            }
        }
    }

    fn referenced<'t>(&'t self, query: &'t TypeDef, mutation: &'t TypeDef) -> BTreeSet<&'t str> {
        self.types
            .values()
            .chain([query, mutation])
            .flat_map(TypeDef::referenced_types)
            .collect()
    }

    fn add_referenced_scalars(&mut self, query: &TypeDef, mutation: &TypeDef) -> Result<(), SchemaError> {
        let used: BTreeSet<String> = self
            .referenced(query, mutation)
            .into_iter()
            .filter(|name| is_custom_scalar(name))
            .map(str::to_string)
            .collect();
        for scalar in scalar_typedefs() {
            if used.contains(&scalar.name) && !self.types.contains_key(&scalar.name) {
                self.insert(scalar)?;
            }
        }
        Ok(())
    }

    fn validate(&self, query: &TypeDef, mutation: &TypeDef) -> Result<(), SchemaError> {
        for name in self.referenced(query, mutation) {
            let defined = BUILTIN_SCALARS.contains(&name)
                || matches!(name, "Query" | "Mutation")
                || self.types.contains_key(name);
            if !defined {
                return Err(SchemaError::BuildFailed(format!(
                    "type {name} is referenced but not defined"
                )));
            }
        }
        Ok(())
    }

    fn into_types(self) -> Vec<TypeDef> {
        self.types.into_values().collect()
    }
}

#[cfg(test)]
mod tests {
    use futures_util::FutureExt;
    use serde_json::json;

    use super::*;
    use crate::test_support::{Harness, employee_graph, invoice_graph};
    use crate::types::TypeKind;

    fn assemble(h: &Harness) -> SchemaArtifact {
        let types = TypeCompiler::new();
        let filters = FilterCompiler::new();
        SchemaAssembler::new(h.ctx(), &types, &filters)
            .assemble("main", 1)
            .unwrap()
    }

    #[test]
    fn test_query_root_per_view() {
        let h = Harness::new(invoice_graph());
        let artifact = assemble(&h);

        assert_eq!(
            artifact.entities,
            vec!["Address", "Client", "Country", "Invoice", "LineItem"]
        );
        let field = |name: &str| {
            artifact
                .query
                .get_field(name)
                .unwrap_or_else(|| panic!("missing {name}"))
        };
        assert_eq!(field("invoice").ty.to_string(), "Invoice");
        assert_eq!(field("invoice").args[0].ty.to_string(), "ID!");
        assert_eq!(field("invoices").ty.to_string(), "[Invoice!]!");
        assert_eq!(field("invoices_paged").ty.to_string(), "InvoicePage!");
        assert_eq!(field("invoices_paged__unpaid").ty.to_string(), "InvoicePage!");
        assert_eq!(field("countries").ty.to_string(), "[Country!]!");
        assert_eq!(artifact.resolvers.len(), artifact.query.fields.len());
    }

    #[test]
    fn test_types_and_placeholder_mutation() {
        let h = Harness::new(invoice_graph());
        let artifact = assemble(&h);

        for name in [
            "Invoice",
            "InvoiceFilter",
            "InvoicePage",
            "InvoiceStatus",
            "InvoiceCreateInput",
            "InvoicePartialCreateInput",
            "InvoiceUpdateInput",
            "InvoiceCreateInput_LineItems",
            "LineItemFilter",
            "Date",
            "DateTime",
        ] {
            assert!(artifact.type_def(name).is_some(), "missing type {name}");
        }
        assert!(artifact.type_def("ClientCreateInput").is_none());
        assert!(artifact.type_def("UUID").is_none());
        assert_eq!(artifact.type_def("Date").unwrap().kind, TypeKind::Scalar);

        let noop = artifact.mutation.get_field("_noop").unwrap();
        assert_eq!(noop.source, FieldSource::Constant { value: json!(true) });
        assert_eq!(artifact.hash.len(), 64);
        assert!(artifact.is_executable());
        assert!(artifact.advisories.contains_key("Invoice"));
    }

    #[test]
    fn test_hash_is_deterministic() {
        let h = Harness::new(invoice_graph());
        let a = assemble(&h);
        let b = assemble(&h);
        assert_eq!(a.hash, b.hash);
        assert_eq!(a.sdl(), b.sdl());
    }

    #[test]
    fn test_selection_closure() {
        let h = Harness::new(invoice_graph());
        let types = TypeCompiler::new();
        let filters = FilterCompiler::new();
        let selection = vec!["Address".to_string()];
        let assembler = SchemaAssembler::new(h.ctx(), &types, &filters).entities(Some(&selection));
        assert_eq!(
            assembler.discover().unwrap(),
            vec!["Address", "Client", "Country", "Invoice", "LineItem"]
        );

        let only_country = vec!["Country".to_string()];
        let assembler =
            SchemaAssembler::new(h.ctx(), &types, &filters).entities(Some(&only_country));
        // Country reaches Address through its reverse relationship.
        assert!(assembler.discover().unwrap().contains(&"Address".to_string()));

        let unknown = vec!["Ghost".to_string()];
        let err = SchemaAssembler::new(h.ctx(), &types, &filters)
            .entities(Some(&unknown))
            .discover()
            .unwrap_err();
        assert!(matches!(err, SchemaError::UnknownEntity(_)));
    }

    #[test]
    fn test_contributions_merge_and_conflict() {
        let h = Harness::new(invoice_graph());
        let types = TypeCompiler::new();
        let filters = FilterCompiler::new();

        let contributions = vec![
            Contribution::query("server_time", TypeRefDef::named_nn("String"), |_| {
                async { Ok(json!("now")) }.boxed()
            }),
            Contribution::mutation("ping", TypeRefDef::named_nn("Pong"), |_| {
                async { Ok(json!({"ok": true})) }.boxed()
            })
            .with_type(TypeDef::object("Pong").field(FieldDef::new(
                "ok",
                TypeRefDef::named_nn("Boolean"),
                FieldSource::Column { column: "ok".into() },
            ))),
        ];
        let artifact = SchemaAssembler::new(h.ctx(), &types, &filters)
            .contributions(&contributions)
            .assemble("main", 1)
            .unwrap();
        assert!(artifact.query.get_field("server_time").is_some());
        assert!(artifact.mutation.get_field("_noop").is_none());
        assert_eq!(
            artifact.mutation.get_field("ping").unwrap().source,
            FieldSource::Contribution {
                name: "Mutation.ping".into()
            }
        );
        assert!(artifact.type_def("Pong").is_some());
        assert!(artifact.runtime().contributions.contains_key("Query.server_time"));

        let clashing = vec![Contribution::query(
            "invoices",
            TypeRefDef::named("String"),
            |_| async { Ok(Value::Null) }.boxed(),
        )];
        let err = SchemaAssembler::new(h.ctx(), &types, &filters)
            .contributions(&clashing)
            .assemble("main", 1)
            .unwrap_err();
        assert!(matches!(
            err,
            SchemaError::FieldConflict { ref root, ref field } if root == "Query" && field == "invoices"
        ));
    }

    #[test]
    fn test_undefined_contributed_type_fails() {
        let h = Harness::new(employee_graph());
        let types = TypeCompiler::new();
        let filters = FilterCompiler::new();
        let contributions = vec![Contribution::query(
            "ghost",
            TypeRefDef::named("Ghost"),
            |_| async { Ok(Value::Null) }.boxed(),
        )];
        let err = SchemaAssembler::new(h.ctx(), &types, &filters)
            .contributions(&contributions)
            .assemble("main", 1)
            .unwrap_err();
        assert!(matches!(err, SchemaError::BuildFailed(ref m) if m.contains("Ghost")));
    }

    #[test]
    fn test_conflicting_type_definitions_fail() {
        let mut registry = TypeRegistry::default();
        registry.insert(TypeDef::object("Pong")).unwrap();
        registry.insert(TypeDef::object("Pong")).unwrap();
        let err = registry.insert(TypeDef::input_object("Pong")).unwrap_err();
        assert!(matches!(err, SchemaError::BuildFailed(_)));
    }
}
