//! Read object and input type compilation with caching.

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use modelql_core::OperationKind;
use modelql_storage::RelationKind;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::typedef::{
    ArgumentDef, CompiledType, DirectiveDef, EnumValueDef, FieldDef, FieldSource, TypeDef,
    TypeRefDef, enum_value_name,
};
use super::{
    COMPUTED_DIRECTIVE, enum_type_name, filter_type_name, input_type_name, nested_input_name,
};
use crate::error::SchemaError;
use crate::reader::{
    CompileContext, EntityDescriptor, FieldDescriptor, RelationshipDescriptor, ScalarCategory,
};

/// Write operation an input type is compiled for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputOperation {
    Create,
    Update,
}

impl InputOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
        }
    }

    pub(crate) fn type_suffix(&self) -> &'static str {
        match self {
            Self::Create => "Create",
            Self::Update => "Update",
        }
    }

    /// Input operation backing a declared operation candidate.
    pub fn for_candidate(kind: OperationKind) -> Option<Self> {
        match kind {
            OperationKind::Create => Some(Self::Create),
            OperationKind::Update => Some(Self::Update),
            OperationKind::Delete | OperationKind::Custom => None,
        }
    }
}

impl fmt::Display for InputOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeFlavor {
    Object,
    Input(InputOperation),
}

/// Cache key: (entity, config, operation kind, partiality).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypeCacheKey {
    pub entity: String,
    pub config: u64,
    pub flavor: TypeFlavor,
    pub partial: bool,
}

/// Caching type compiler.
///
/// Entries are immutable once produced and handed out as `Arc`s, so two
/// calls with the same key return pointer-equal results until the entry
/// is invalidated.
#[derive(Debug, Clone, Default)]
pub struct TypeCompiler {
    cache: DashMap<TypeCacheKey, Arc<CompiledType>>,
}

impl TypeCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compiles the read object type for `entity`.
    ///
    /// # Errors
    ///
    /// Returns `SchemaError::UnknownEntity` for entities outside the graph.
    pub fn compile_object_type(
        &self,
        ctx: &CompileContext<'_>,
        entity: &str,
    ) -> Result<Arc<CompiledType>, SchemaError> {
        let key = TypeCacheKey {
            entity: entity.to_string(),
            config: ctx.config.cache_key(),
            flavor: TypeFlavor::Object,
            partial: false,
        };
        self.cached(key, || build_object_type(ctx, entity))
    }

    /// Compiles a create or update input type for `entity`.
    ///
    /// With `partial` set, nothing except an update's identifier is required.
    ///
    /// # Errors
    ///
    /// Returns `SchemaError::UnknownEntity` for entities outside the graph.
    pub fn compile_input_type(
        &self,
        ctx: &CompileContext<'_>,
        entity: &str,
        operation: InputOperation,
        partial: bool,
    ) -> Result<Arc<CompiledType>, SchemaError> {
        let key = TypeCacheKey {
            entity: entity.to_string(),
            config: ctx.config.cache_key(),
            flavor: TypeFlavor::Input(operation),
            partial,
        };
        self.cached(key, || build_input_type(ctx, entity, operation, partial))
    }

    fn cached(
        &self,
        key: TypeCacheKey,
        build: impl FnOnce() -> Result<CompiledType, SchemaError>,
    ) -> Result<Arc<CompiledType>, SchemaError> {
        if let Some(hit) = self.cache.get(&key) {
            trace!(entity = %key.entity, flavor = ?key.flavor, "Type cache hit");
            return Ok(Arc::clone(hit.value()));
        }
        trace!(entity = %key.entity, flavor = ?key.flavor, "Type cache miss");
        let compiled = Arc::new(build()?);
        Ok(Arc::clone(self.cache.entry(key).or_insert(compiled).value()))
    }

    /// Evicts every compiled type that read `entity`.
    pub fn invalidate(&self, entity: &str) -> usize {
        let before = self.cache.len();
        self.cache.retain(|_, c| !c.dependencies.contains(entity));
        before - self.cache.len()
    }

    pub fn clear(&self) {
        self.cache.clear();
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

fn build_object_type(ctx: &CompileContext<'_>, entity: &str) -> Result<CompiledType, SchemaError> {
    let d = ctx.describe(entity)?;
    let mut ty = TypeDef::object(&d.name)
        .description(d.description.clone())
        .entity(&d.name);
    let mut auxiliary = Vec::new();

    for field in &d.fields {
        let type_name = field_type_name(&d, field, &mut auxiliary);
        let source = if type_name == enum_type_name(&d.name, &field.name) {
            FieldSource::EnumColumn {
                column: field.name.clone(),
            }
        } else {
            FieldSource::Column {
                column: field.name.clone(),
            }
        };
        let ty_ref = if field.nullable && !field.is_identifier {
            TypeRefDef::named(type_name)
        } else {
            TypeRefDef::named_nn(type_name)
        };
        ty.push_field(FieldDef::new(&field.name, ty_ref, source).description(field.help_text.clone()));
    }

    for rel in &d.relationships {
        let relation = FieldSource::Relation {
            relation: rel.name.clone(),
        };
        match rel.kind {
            RelationKind::ToOneForward => {
                let ty_ref = if rel.nullable {
                    TypeRefDef::named(&rel.related)
                } else {
                    TypeRefDef::named_nn(&rel.related)
                };
                ty.push_field(FieldDef::new(&rel.name, ty_ref, relation).description(rel.help_text.clone()));
            }
            RelationKind::ToOneReverse => {
                ty.push_field(FieldDef::new(&rel.name, TypeRefDef::named(&rel.related), relation));
            }
            RelationKind::ToManyForward | RelationKind::ToManyReverse => {
                let filter = TypeRefDef::named(filter_type_name(&rel.related));
                ty.push_field(
                    FieldDef::new(&rel.name, TypeRefDef::named_nn_list_nn(&rel.related), relation)
                        .description(rel.help_text.clone())
                        .argument(ArgumentDef::new("filter", filter.clone()))
                        .argument(ArgumentDef::new("order_by", TypeRefDef::named_list("String")))
                        .argument(ArgumentDef::new("offset", TypeRefDef::named("Int")))
                        .argument(ArgumentDef::new("limit", TypeRefDef::named("Int"))),
                );
                ty.push_field(
                    FieldDef::new(
                        format!("{}_count", rel.name),
                        TypeRefDef::named_nn("Int"),
                        FieldSource::RelationCount {
                            relation: rel.name.clone(),
                        },
                    )
                    .argument(ArgumentDef::new("filter", filter)),
                );
            }
        }
    }

    for computed in &d.computed {
        ty.push_field(
            FieldDef::new(
                &computed.name,
                TypeRefDef::named(computed.category.scalar_name()),
                FieldSource::Computed {
                    attribute: computed.name.clone(),
                },
            )
            .description(computed.help_text.clone())
            .directive(DirectiveDef::new(COMPUTED_DIRECTIVE)),
        );
    }

    if d.is_polymorphic() {
        ty.push_field(
            FieldDef::new(
                "concrete_type",
                TypeRefDef::named_nn("String"),
                FieldSource::Discriminator,
            )
            .description(Some("Name of the concrete subtype of this instance".to_string())),
        );
    }

    debug!(entity = %d.name, fields = ty.fields.len(), "Compiled object type");
    Ok(CompiledType {
        root: ty,
        auxiliary,
        dependencies: d.dependencies.clone(),
    })
}

/// API type name for a field, registering a generated enum when needed.
fn field_type_name(d: &EntityDescriptor, field: &FieldDescriptor, auxiliary: &mut Vec<TypeDef>) -> String {
    if field.is_identifier {
        return "ID".to_string();
    }
    if field.category == ScalarCategory::Enum && !field.choices.is_empty() {
        let name = enum_type_name(&d.name, &field.name);
        if !auxiliary.iter().any(|t| t.name == name) {
            auxiliary.push(enum_type(&name, field));
        }
        return name;
    }
    field.category.scalar_name().to_string()
}

fn enum_type(name: &str, field: &FieldDescriptor) -> TypeDef {
    let mut ty = TypeDef::enumeration(name).description(field.help_text.clone());
    let mut used = HashSet::new();
    for choice in &field.choices {
        let mut member = enum_value_name(choice);
        let base = member.clone();
        let mut n = 2;
        while !used.insert(member.clone()) {
            member = format!("{base}_{n}");
            n += 1;
        }
        ty.enum_values.push(EnumValueDef {
            name: member,
            value: serde_json::Value::String(choice.clone()),
        });
    }
    ty
}

fn build_input_type(
    ctx: &CompileContext<'_>,
    entity: &str,
    operation: InputOperation,
    partial: bool,
) -> Result<CompiledType, SchemaError> {
    let d = ctx.describe(entity)?;
    let mut builder = InputBuilder {
        ctx,
        operation,
        partial,
        ceiling: ctx.config.effective_depth(),
        auxiliary: Vec::new(),
        dependencies: d.dependencies.clone(),
    };
    let name = input_type_name(&d.name, operation, partial);
    let root = builder.build(&d, name, 0, None)?;
    debug!(
        entity = %d.name,
        operation = %operation,
        partial,
        nested = builder.auxiliary.len(),
        "Compiled input type"
    );
    Ok(CompiledType {
        root,
        auxiliary: builder.auxiliary,
        dependencies: builder.dependencies,
    })
}

struct InputBuilder<'c, 'a> {
    ctx: &'c CompileContext<'a>,
    operation: InputOperation,
    partial: bool,
    ceiling: usize,
    auxiliary: Vec<TypeDef>,
    dependencies: BTreeSet<String>,
}

impl InputBuilder<'_, '_> {
    /// Builds one input object. `link_back` names the relationship pointing
    /// at the enclosing instance, which nested inputs omit. Nesting stops at
    /// the depth ceiling, so self-references terminate.
    fn build(
        &mut self,
        d: &EntityDescriptor,
        name: String,
        depth: usize,
        link_back: Option<&str>,
    ) -> Result<TypeDef, SchemaError> {
        let nested = depth > 0;
        let mut ty = TypeDef::input_object(&name).entity(&d.name);

        for field in &d.fields {
            if let Some(ty_ref) = self.input_field_type(d, field, nested) {
                ty.push_field(FieldDef::input(&field.name, ty_ref).description(field.help_text.clone()));
            }
        }

        for rel in &d.relationships {
            if link_back == Some(rel.name.as_str()) {
                continue;
            }
            let plain = if rel.kind.is_many() {
                TypeRefDef::named_list("ID")
            } else {
                TypeRefDef::named("ID")
            };
            ty.push_field(FieldDef::input(&rel.name, plain).description(rel.help_text.clone()));

            if depth < self.ceiling {
                let sub_name = nested_input_name(&name, &rel.name);
                let sub = self.nested(rel, sub_name.clone(), depth)?;
                self.auxiliary.push(sub);
                let ty_ref = if rel.kind.is_many() {
                    TypeRefDef::named_list(sub_name)
                } else {
                    TypeRefDef::named(sub_name)
                };
                ty.push_field(FieldDef::input(format!("nested_{}", rel.name), ty_ref));
            }
        }
        Ok(ty)
    }

    fn nested(
        &mut self,
        rel: &RelationshipDescriptor,
        name: String,
        depth: usize,
    ) -> Result<TypeDef, SchemaError> {
        let related = self.ctx.describe(&rel.related)?;
        self.dependencies.extend(related.dependencies.iter().cloned());
        self.build(&related, name, depth + 1, rel.link_back.as_deref())
    }

    /// Input type of one scalar field, or `None` when the field is not
    /// writable through this input.
    fn input_field_type(&mut self, d: &EntityDescriptor, field: &FieldDescriptor, nested: bool) -> Option<TypeRefDef> {
        let updating = self.operation == InputOperation::Update && !nested;
        if field.is_identifier {
            return if updating {
                Some(TypeRefDef::named_nn("ID"))
            } else if field.auto.is_none() {
                Some(TypeRefDef::named("ID"))
            } else {
                None
            };
        }
        if field.auto.is_some() {
            return None;
        }
        let type_name = field_type_name(d, field, &mut self.auxiliary);
        let required = if updating {
            field.update_required
        } else {
            field.create_required && !self.partial
        };
        Some(if required {
            TypeRefDef::named_nn(type_name)
        } else {
            TypeRefDef::named(type_name)
        })
    }
}
