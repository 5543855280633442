//! Rendering artifacts into `async_graphql::dynamic` schemas.

use std::sync::Arc;

use async_graphql::dynamic::{
    Enum, EnumItem, Field, InputObject, InputValue, Object, Scalar, Schema, SchemaBuilder, TypeRef,
};
use tracing::debug;

use super::fields;
use super::graphql_to_json;
use super::query::QueryResolver;
use super::relation::{RelationBinding, RelationResolver};
use crate::error::SchemaError;
use crate::planner::{EntityPlan, QueryPlanner};
use crate::schema::SchemaArtifact;
use crate::types::{FieldDef, FieldSource, TypeDef, TypeKind, TypeRefDef, validate_scalar};

/// Builds executable schemas from artifacts.
pub struct DynamicSchemaRenderer;

impl DynamicSchemaRenderer {
    /// Renders `artifact` with the query limits of its compiler config.
    ///
    /// # Errors
    ///
    /// Returns `SchemaError::BuildFailed` when the artifact lacks execution
    /// plans for a field or the schema does not validate.
    pub fn render(artifact: Arc<SchemaArtifact>) -> Result<Schema, SchemaError> {
        let renderer = Renderer {
            artifact: &artifact,
            planner: QueryPlanner::new(&artifact.runtime().config),
        };

        let mut builder = Schema::build("Query", Some("Mutation"), None);
        for ty in &artifact.types {
            builder = renderer.register(builder, ty)?;
        }
        builder = builder.register(renderer.object(&artifact.query)?);
        builder = builder.register(renderer.object(&artifact.mutation)?);

        let config = &artifact.runtime().config;
        builder = builder
            .limit_depth(config.max_query_depth)
            .limit_complexity(config.max_query_complexity);
        if !config.introspection {
            builder = builder.disable_introspection();
        }

        let schema = builder
            .finish()
            .map_err(|e| SchemaError::BuildFailed(e.to_string()))?;
        debug!(
            schema = %artifact.name,
            version = artifact.version,
            types = artifact.types.len(),
            "Rendered executable schema"
        );
        Ok(schema)
    }
}

struct Renderer<'a> {
    artifact: &'a SchemaArtifact,
    planner: QueryPlanner,
}

impl Renderer<'_> {
    fn register(&self, builder: SchemaBuilder, ty: &TypeDef) -> Result<SchemaBuilder, SchemaError> {
        Ok(match ty.kind {
            TypeKind::Object => builder.register(self.object(ty)?),
            TypeKind::InputObject => builder.register(input_object(ty)),
            TypeKind::Enum => builder.register(enumeration(ty)),
            TypeKind::Scalar => builder.register(scalar(ty)),
        })
    }

    fn object(&self, ty: &TypeDef) -> Result<Object, SchemaError> {
        let mut object = Object::new(&ty.name);
        if let Some(description) = &ty.description {
            object = object.description(description);
        }
        for field in &ty.fields {
            let mut rendered = self.field(ty, field)?;
            if let Some(description) = &field.description {
                rendered = rendered.description(description);
            }
            for arg in &field.args {
                let mut input = InputValue::new(&arg.name, type_ref(&arg.ty));
                if let Some(description) = &arg.description {
                    input = input.description(description);
                }
                rendered = rendered.argument(input);
            }
            object = object.field(rendered);
        }
        Ok(object)
    }

    fn field(&self, owner: &TypeDef, field: &FieldDef) -> Result<Field, SchemaError> {
        let name = field.name.as_str();
        let ty = type_ref(&field.ty);
        let field = match &field.source {
            FieldSource::Column { column } => {
                Field::new(name, ty, fields::column(column.clone(), field.ty.base_name() == "ID"))
            }
            FieldSource::EnumColumn { column } => {
                let enum_name = field.ty.base_name();
                let members = self
                    .artifact
                    .type_def(enum_name)
                    .filter(|t| t.kind == TypeKind::Enum)
                    .map(|t| {
                        t.enum_values
                            .iter()
                            .map(|v| (v.value.clone(), v.name.clone()))
                            .collect::<Vec<_>>()
                    })
                    .ok_or_else(|| missing(owner, name, &format!("enum type {enum_name}")))?;
                Field::new(
                    name,
                    ty,
                    fields::enum_column(column.clone(), enum_name.to_string(), Arc::new(members)),
                )
            }
            FieldSource::Relation { relation } => {
                let binding = self.binding(owner, name, relation)?;
                if binding.relationship.kind.is_many() {
                    Field::new(name, ty, RelationResolver::many(binding, self.planner))
                } else {
                    Field::new(name, ty, RelationResolver::one(binding))
                }
            }
            FieldSource::RelationCount { relation } => {
                let binding = self.binding(owner, name, relation)?;
                Field::new(name, ty, RelationResolver::count(binding, self.planner))
            }
            FieldSource::Computed { attribute } => {
                let plan = self.owner_plan(owner, name)?;
                Field::new(
                    name,
                    ty,
                    fields::computed(Arc::clone(&plan.descriptor), attribute.clone()),
                )
            }
            FieldSource::Discriminator => {
                let plan = self.owner_plan(owner, name)?;
                Field::new(name, ty, fields::discriminator(Arc::clone(&plan.descriptor)))
            }
            FieldSource::Query { plan } => {
                let resolver = self
                    .artifact
                    .resolver(plan)
                    .ok_or_else(|| missing(owner, name, &format!("resolver plan {plan}")))?;
                let entity = self.entity_plan(owner, name, &resolver.entity)?;
                Field::new(
                    name,
                    ty,
                    QueryResolver::resolve(Arc::new(resolver.clone()), entity.clone(), self.planner),
                )
            }
            FieldSource::PageItems => Field::new(name, ty, fields::page_items()),
            FieldSource::PageInfo { key } => Field::new(name, ty, fields::page_info(key.clone())),
            FieldSource::Contribution { name: key } => {
                let resolver = self
                    .artifact
                    .runtime()
                    .contributions
                    .get(key)
                    .ok_or_else(|| missing(owner, name, &format!("contribution {key}")))?;
                Field::new(name, ty, fields::contribution(Arc::clone(resolver)))
            }
            FieldSource::Constant { value } => Field::new(name, ty, fields::constant(value.clone())),
            FieldSource::Input => {
                return Err(SchemaError::BuildFailed(format!(
                    "Input field {name} on output type {}",
                    owner.name
                )));
            }
        };
        Ok(field)
    }

    fn entity_plan(&self, owner: &TypeDef, field: &str, entity: &str) -> Result<&EntityPlan, SchemaError> {
        self.artifact
            .runtime()
            .entity(entity)
            .ok_or_else(|| missing(owner, field, &format!("execution plan for {entity}")))
    }

    fn owner_plan(&self, owner: &TypeDef, field: &str) -> Result<&EntityPlan, SchemaError> {
        let entity = owner
            .entity
            .as_deref()
            .ok_or_else(|| missing(owner, field, "owning entity"))?;
        self.entity_plan(owner, field, entity)
    }

    fn binding(&self, owner: &TypeDef, field: &str, relation: &str) -> Result<RelationBinding, SchemaError> {
        let parent = self.owner_plan(owner, field)?;
        let relationship = parent
            .descriptor
            .relationship(relation)
            .ok_or_else(|| missing(owner, field, &format!("relationship {relation}")))?;
        let related = self.entity_plan(owner, field, &relationship.related)?;
        Ok(RelationBinding {
            parent: parent.clone(),
            relationship: Arc::new(relationship.clone()),
            related: related.clone(),
        })
    }
}

fn missing(owner: &TypeDef, field: &str, what: &str) -> SchemaError {
    SchemaError::BuildFailed(format!("{}.{field} has no {what}", owner.name))
}

fn type_ref(ty: &TypeRefDef) -> TypeRef {
    match ty {
        TypeRefDef::Named(name) => TypeRef::Named(name.clone().into()),
        TypeRefDef::NonNull(inner) => TypeRef::NonNull(Box::new(type_ref(inner))),
        TypeRefDef::List(inner) => TypeRef::List(Box::new(type_ref(inner))),
    }
}

fn input_object(ty: &TypeDef) -> InputObject {
    let mut input = InputObject::new(&ty.name);
    if let Some(description) = &ty.description {
        input = input.description(description);
    }
    for field in &ty.fields {
        let mut value = InputValue::new(&field.name, type_ref(&field.ty));
        if let Some(description) = &field.description {
            value = value.description(description);
        }
        input = input.field(value);
    }
    input
}

fn enumeration(ty: &TypeDef) -> Enum {
    let mut rendered = Enum::new(&ty.name);
    if let Some(description) = &ty.description {
        rendered = rendered.description(description);
    }
    for value in &ty.enum_values {
        rendered = rendered.item(EnumItem::new(&value.name));
    }
    rendered
}

fn scalar(ty: &TypeDef) -> Scalar {
    let name = ty.name.clone();
    let mut rendered = Scalar::new(&ty.name).validator(move |value| {
        graphql_to_json(value).is_ok_and(|json| validate_scalar(&name, &json))
    });
    if let Some(description) = &ty.description {
        rendered = rendered.description(description);
    }
    rendered
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_ref_conversion() {
        let rendered = type_ref(&TypeRefDef::named_nn_list_nn("LineItem"));
        assert_eq!(rendered.to_string(), "[LineItem!]!");
        assert_eq!(type_ref(&TypeRefDef::named("Int")).to_string(), "Int");
    }
}
