//! Closed classification table for declared attributes.
//!
//! Every `storage_type` maps to exactly one [`AttributeClass`]. Unknown
//! storage types are reported as errors so the reader can skip the
//! attribute and keep describing the rest of the entity.

use std::fmt;

use modelql_core::{AttributeDef, OperationKind};
use modelql_storage::RelationKind;
use serde::{Deserialize, Serialize};

/// Scalar category of a field or computed attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalarCategory {
    Text,
    Int,
    Float,
    Bool,
    Date,
    DateTime,
    Time,
    Binary,
    Uuid,
    Json,
    Enum,
}

/// Group of categories sharing one filter operation set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CategoryFamily {
    Text,
    Numeric,
    Temporal,
    Boolean,
    Enumerated,
    Identifier,
    Opaque,
}

impl ScalarCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Int => "int",
            Self::Float => "float",
            Self::Bool => "bool",
            Self::Date => "date",
            Self::DateTime => "datetime",
            Self::Time => "time",
            Self::Binary => "binary",
            Self::Uuid => "uuid",
            Self::Json => "json",
            Self::Enum => "enum",
        }
    }

    pub fn family(&self) -> CategoryFamily {
        match self {
            Self::Text => CategoryFamily::Text,
            Self::Int | Self::Float | Self::Time => CategoryFamily::Numeric,
            Self::Date | Self::DateTime => CategoryFamily::Temporal,
            Self::Bool => CategoryFamily::Boolean,
            Self::Enum => CategoryFamily::Enumerated,
            Self::Uuid => CategoryFamily::Identifier,
            Self::Binary | Self::Json => CategoryFamily::Opaque,
        }
    }

    /// API scalar name for the category.
    ///
    /// Enum fields with declared choices get a generated enum type instead;
    /// this is the fallback for enums without choices.
    pub fn scalar_name(&self) -> &'static str {
        match self {
            Self::Text | Self::Enum => "String",
            Self::Int => "Int",
            Self::Float => "Float",
            Self::Bool => "Boolean",
            Self::Date => "Date",
            Self::DateTime => "DateTime",
            Self::Time => "Time",
            Self::Binary => "Binary",
            Self::Uuid => "UUID",
            Self::Json => "JSON",
        }
    }
}

impl fmt::Display for ScalarCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maps a storage type to its scalar category.
pub fn scalar_category(storage_type: &str) -> Option<ScalarCategory> {
    let category = match storage_type {
        "text" | "varchar" | "char" | "email" | "url" | "slug" => ScalarCategory::Text,
        "integer" | "bigint" | "smallint" | "serial" | "bigserial" => ScalarCategory::Int,
        "decimal" | "float" | "double" => ScalarCategory::Float,
        "boolean" => ScalarCategory::Bool,
        "date" => ScalarCategory::Date,
        "timestamp" | "datetime" => ScalarCategory::DateTime,
        "time" => ScalarCategory::Time,
        "bytes" | "blob" => ScalarCategory::Binary,
        "uuid" => ScalarCategory::Uuid,
        "json" | "jsonb" => ScalarCategory::Json,
        "enum" => ScalarCategory::Enum,
        _ => return None,
    };
    Some(category)
}

/// What a declared attribute contributes to the descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeClass {
    Field(ScalarCategory),
    Relationship(RelationKind),
    Computed(ScalarCategory),
    Operation(OperationKind),
}

/// Classifies one attribute.
///
/// # Errors
///
/// Returns a human-readable reason when the attribute cannot be classified.
pub fn classify(attr: &AttributeDef) -> Result<AttributeClass, String> {
    match attr.storage_type.as_str() {
        "foreign_key" | "one_to_one" => Ok(AttributeClass::Relationship(RelationKind::ToOneForward)),
        "many_to_many" => Ok(AttributeClass::Relationship(RelationKind::ToManyForward)),
        "computed" => {
            let returns = attr
                .returns
                .as_deref()
                .ok_or_else(|| "computed attribute declares no return type".to_string())?;
            let category = scalar_category(returns)
                .ok_or_else(|| format!("computed attribute returns unknown type {returns}"))?;
            if attr.compute.is_none() {
                return Err("computed attribute has no compute function attached".into());
            }
            Ok(AttributeClass::Computed(category))
        }
        "operation" => attr
            .operation
            .map(AttributeClass::Operation)
            .ok_or_else(|| "operation candidate declares no operation kind".to_string()),
        other => scalar_category(other)
            .map(AttributeClass::Field)
            .ok_or_else(|| format!("unsupported storage type {other}")),
    }
}
