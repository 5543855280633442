//! Data-first type definitions.
//!
//! Compilers produce [`TypeDef`] values; renderers turn them into SDL text
//! or into `async_graphql::dynamic` objects. Nothing here depends on the
//! rendering library.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Reference to a type, with list and non-null wrappers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeRefDef {
    Named(String),
    NonNull(Box<TypeRefDef>),
    List(Box<TypeRefDef>),
}

impl TypeRefDef {
    pub fn named(name: impl Into<String>) -> Self {
        Self::Named(name.into())
    }

    /// `T!`
    pub fn named_nn(name: impl Into<String>) -> Self {
        Self::named(name).non_null()
    }

    /// `[T!]`
    pub fn named_list(name: impl Into<String>) -> Self {
        Self::List(Box::new(Self::named_nn(name)))
    }

    /// `[T!]!`
    pub fn named_nn_list_nn(name: impl Into<String>) -> Self {
        Self::named_list(name).non_null()
    }

    pub fn non_null(self) -> Self {
        match self {
            Self::NonNull(_) => self,
            other => Self::NonNull(Box::new(other)),
        }
    }

    pub fn nullable(self) -> Self {
        match self {
            Self::NonNull(inner) => *inner,
            other => other,
        }
    }

    pub fn is_non_null(&self) -> bool {
        matches!(self, Self::NonNull(_))
    }

    pub fn is_list(&self) -> bool {
        match self {
            Self::List(_) => true,
            Self::NonNull(inner) => inner.is_list(),
            Self::Named(_) => false,
        }
    }

    /// Innermost named type.
    pub fn base_name(&self) -> &str {
        match self {
            Self::Named(name) => name,
            Self::NonNull(inner) | Self::List(inner) => inner.base_name(),
        }
    }
}

impl fmt::Display for TypeRefDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Named(name) => f.write_str(name),
            Self::NonNull(inner) => write!(f, "{inner}!"),
            Self::List(inner) => write!(f, "[{inner}]"),
        }
    }
}

/// Field argument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArgumentDef {
    pub name: String,
    pub ty: TypeRefDef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ArgumentDef {
    pub fn new(name: impl Into<String>, ty: TypeRefDef) -> Self {
        Self {
            name: name.into(),
            ty,
            description: None,
        }
    }
}

/// Directive attached to a type or field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectiveDef {
    pub name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub args: BTreeMap<String, Value>,
}

impl DirectiveDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: BTreeMap::new(),
        }
    }

    pub fn arg(mut self, name: impl Into<String>, value: Value) -> Self {
        self.args.insert(name.into(), value);
        self
    }
}

/// Where a renderer gets the value of an output field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum FieldSource {
    /// Stored column of the parent record.
    Column { column: String },
    /// Stored column mapped through a generated enum type.
    EnumColumn { column: String },
    /// Related instance(s) of the parent record.
    Relation { relation: String },
    /// Count of related instances of the parent record.
    RelationCount { relation: String },
    /// Computed attribute evaluated on the parent record.
    Computed { attribute: String },
    /// Concrete subtype name of a polymorphic instance.
    Discriminator,
    /// Root query field executing a resolver plan.
    Query { plan: String },
    /// Items of a page object.
    PageItems,
    /// Pagination metadata of a page object.
    PageInfo { key: String },
    /// Externally contributed root field.
    Contribution { name: String },
    /// Fixed value.
    Constant { value: Value },
    /// Input object field; never resolved.
    Input,
}

/// Object, input-object or enum member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    pub ty: TypeRefDef,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<ArgumentDef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub directives: Vec<DirectiveDef>,
    pub source: FieldSource,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, ty: TypeRefDef, source: FieldSource) -> Self {
        Self {
            name: name.into(),
            ty,
            args: Vec::new(),
            description: None,
            directives: Vec::new(),
            source,
        }
    }

    pub fn input(name: impl Into<String>, ty: TypeRefDef) -> Self {
        Self::new(name, ty, FieldSource::Input)
    }

    pub fn argument(mut self, arg: ArgumentDef) -> Self {
        self.args.push(arg);
        self
    }

    pub fn description(mut self, description: Option<String>) -> Self {
        self.description = description;
        self
    }

    pub fn directive(mut self, directive: DirectiveDef) -> Self {
        self.directives.push(directive);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeKind {
    Object,
    InputObject,
    Enum,
    Scalar,
}

/// Enum member with the stored value it stands for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnumValueDef {
    pub name: String,
    pub value: Value,
}

/// A named type in the produced schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeDef {
    pub name: String,
    pub kind: TypeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<FieldDef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub enum_values: Vec<EnumValueDef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub directives: Vec<DirectiveDef>,
    /// Entity the type was compiled from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity: Option<String>,
}

impl TypeDef {
    fn new(name: impl Into<String>, kind: TypeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            description: None,
            fields: Vec::new(),
            enum_values: Vec::new(),
            directives: Vec::new(),
            entity: None,
        }
    }

    pub fn object(name: impl Into<String>) -> Self {
        Self::new(name, TypeKind::Object)
    }

    pub fn input_object(name: impl Into<String>) -> Self {
        Self::new(name, TypeKind::InputObject)
    }

    pub fn enumeration(name: impl Into<String>) -> Self {
        Self::new(name, TypeKind::Enum)
    }

    pub fn scalar(name: impl Into<String>) -> Self {
        Self::new(name, TypeKind::Scalar)
    }

    pub fn description(mut self, description: Option<String>) -> Self {
        self.description = description;
        self
    }

    pub fn entity(mut self, entity: impl Into<String>) -> Self {
        self.entity = Some(entity.into());
        self
    }

    pub fn field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    pub fn push_field(&mut self, field: FieldDef) {
        self.fields.push(field);
    }

    pub fn get_field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Names of all types referenced by fields and arguments.
    pub fn referenced_types(&self) -> BTreeSet<&str> {
        let mut out = BTreeSet::new();
        for field in &self.fields {
            out.insert(field.ty.base_name());
            for arg in &field.args {
                out.insert(arg.ty.base_name());
            }
        }
        out
    }
}

/// Output of one type compilation: the requested type plus the auxiliary
/// types (enums, nested inputs) it introduced.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledType {
    pub root: TypeDef,
    pub auxiliary: Vec<TypeDef>,
    /// Entities read while compiling.
    pub dependencies: BTreeSet<String>,
}

impl CompiledType {
    pub fn name(&self) -> &str {
        &self.root.name
    }

    /// Root first, then auxiliary types.
    pub fn types(&self) -> impl Iterator<Item = &TypeDef> {
        std::iter::once(&self.root).chain(self.auxiliary.iter())
    }

    pub fn find(&self, name: &str) -> Option<&TypeDef> {
        self.types().find(|t| t.name == name)
    }
}

/// Turns an arbitrary stored value into a valid enum member name.
pub fn enum_value_name(raw: &str) -> String {
    let mut name: String = raw
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect();
    if name.is_empty() || name.starts_with(|c: char| c.is_ascii_digit()) {
        name.insert(0, '_');
    }
    if matches!(name.as_str(), "TRUE" | "FALSE" | "NULL") {
        name.push('_');
    }
    name
}
