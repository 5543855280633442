//! Declarative data model definitions.
//!
//! An [`EntityDef`] is the input to the schema compiler: a named unit of the
//! relational model with its declared attributes, named views and optional
//! ordering allow-list. Attributes are declared with a `storage_type` string
//! that the model graph reader classifies through a closed table, so model
//! files can be written by hand in TOML or JSON:
//!
//! ```toml
//! [[entities]]
//! name = "Invoice"
//!
//! [[entities.attributes]]
//! name = "id"
//! storage_type = "serial"
//! auto = "create"
//!
//! [[entities.attributes]]
//! name = "client"
//! storage_type = "foreign_key"
//! target = "Client"
//! related_name = "invoices"
//! ```

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A materialized instance of an entity as seen by the compiler and resolvers.
pub type Record = Map<String, Value>;

/// Function computing the value of a computed attribute from a record.
pub type ComputeFn = Arc<dyn Fn(&Record) -> Value + Send + Sync>;

/// Default name of the identifier attribute.
pub const DEFAULT_IDENTIFIER: &str = "id";

/// Name of the implicit default view given to entities that declare none.
pub const IMPLICIT_VIEW: &str = "all";

/// When a field value is filled in automatically by the storage layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoPopulate {
    /// Set once when the instance is created.
    Create,
    /// Refreshed on every update.
    Update,
}

/// Kind of an operation candidate declared on an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
    Custom,
}

impl OperationKind {
    /// Returns the lowercase name of the operation kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Create => "create",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
            OperationKind::Custom => "custom",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One declared attribute of an entity.
///
/// Which of the optional members are meaningful depends on `storage_type`:
/// relationships use `target`, `related_name` and `column`; enums use
/// `choices`; computed attributes use `returns` and `compute`; operation
/// candidates use `operation`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AttributeDef {
    pub name: String,
    pub storage_type: String,
    #[serde(default)]
    pub nullable: bool,
    #[serde(default)]
    pub blank: bool,
    #[serde(default)]
    pub default: Option<Value>,
    #[serde(default)]
    pub auto: Option<AutoPopulate>,
    #[serde(default)]
    pub help_text: Option<String>,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub related_name: Option<String>,
    #[serde(default)]
    pub column: Option<String>,
    #[serde(default)]
    pub choices: Vec<String>,
    /// Marks the pointer column that links a child entity to its parent row.
    #[serde(default)]
    pub parent_link: bool,
    #[serde(default)]
    pub returns: Option<String>,
    #[serde(default)]
    pub operation: Option<OperationKind>,
    #[serde(skip)]
    pub compute: Option<ComputeFn>,
}

impl fmt::Debug for AttributeDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttributeDef")
            .field("name", &self.name)
            .field("storage_type", &self.storage_type)
            .field("nullable", &self.nullable)
            .field("target", &self.target)
            .field("has_compute", &self.compute.is_some())
            .finish_non_exhaustive()
    }
}

impl AttributeDef {
    /// Creates an attribute with the given name and storage type.
    pub fn new(name: impl Into<String>, storage_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            storage_type: storage_type.into(),
            nullable: false,
            blank: false,
            default: None,
            auto: None,
            help_text: None,
            target: None,
            related_name: None,
            column: None,
            choices: Vec::new(),
            parent_link: false,
            returns: None,
            operation: None,
            compute: None,
        }
    }

    /// A relationship attribute pointing at `target`.
    pub fn relation(
        name: impl Into<String>,
        storage_type: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        let mut attr = Self::new(name, storage_type);
        attr.target = Some(target.into());
        attr
    }

    /// A computed attribute returning values of `returns` storage type.
    pub fn computed(name: impl Into<String>, returns: impl Into<String>, compute: ComputeFn) -> Self {
        let mut attr = Self::new(name, "computed");
        attr.returns = Some(returns.into());
        attr.compute = Some(compute);
        attr
    }

    /// An operation candidate.
    pub fn operation(name: impl Into<String>, kind: OperationKind) -> Self {
        let mut attr = Self::new(name, "operation");
        attr.operation = Some(kind);
        attr
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn blank(mut self) -> Self {
        self.blank = true;
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn auto(mut self, auto: AutoPopulate) -> Self {
        self.auto = Some(auto);
        self
    }

    pub fn help(mut self, text: impl Into<String>) -> Self {
        self.help_text = Some(text.into());
        self
    }

    pub fn related_name(mut self, name: impl Into<String>) -> Self {
        self.related_name = Some(name.into());
        self
    }

    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.column = Some(column.into());
        self
    }

    pub fn choices<I, S>(mut self, choices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.choices = choices.into_iter().map(Into::into).collect();
        self
    }

    pub fn parent_link(mut self) -> Self {
        self.parent_link = true;
        self
    }

    /// Structural equality, ignoring the compute closure and help text.
    pub fn same_shape(&self, other: &Self) -> bool {
        self.name == other.name
            && self.storage_type == other.storage_type
            && self.nullable == other.nullable
            && self.blank == other.blank
            && self.default == other.default
            && self.auto == other.auto
            && self.target == other.target
            && self.related_name == other.related_name
            && self.column == other.column
            && self.choices == other.choices
            && self.parent_link == other.parent_link
            && self.returns == other.returns
            && self.operation == other.operation
    }

    /// Whether this attribute declares a link to another entity.
    pub fn is_relation(&self) -> bool {
        matches!(
            self.storage_type.as_str(),
            "foreign_key" | "one_to_one" | "many_to_many"
        )
    }
}

/// A named, pre-filtered subset of an entity's instances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewDef {
    pub name: String,
    #[serde(default)]
    pub is_default: bool,
    /// Equality conditions (`field -> value`) every instance in the view satisfies.
    #[serde(default)]
    pub conditions: Map<String, Value>,
    #[serde(default)]
    pub description: Option<String>,
}

impl ViewDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_default: false,
            conditions: Map::new(),
            description: None,
        }
    }

    pub fn default_view(name: impl Into<String>) -> Self {
        let mut view = Self::new(name);
        view.is_default = true;
        view
    }

    pub fn with_condition(mut self, field: impl Into<String>, value: Value) -> Self {
        self.conditions.insert(field.into(), value);
        self
    }
}

/// Declarative definition of one entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityDef {
    pub name: String,
    #[serde(default)]
    pub plural: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Parent entity for table-per-subtype inheritance.
    #[serde(default)]
    pub parent: Option<String>,
    /// Column holding the concrete subtype name.
    #[serde(default)]
    pub discriminator: Option<String>,
    #[serde(default = "default_identifier")]
    pub identifier: String,
    #[serde(default)]
    pub attributes: Vec<AttributeDef>,
    #[serde(default)]
    pub views: Vec<ViewDef>,
    /// Names that list queries may order by; `None` allows every sortable name.
    #[serde(default)]
    pub ordering: Option<Vec<String>>,
}

fn default_identifier() -> String {
    DEFAULT_IDENTIFIER.to_string()
}

impl EntityDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            plural: None,
            description: None,
            parent: None,
            discriminator: None,
            identifier: default_identifier(),
            attributes: Vec::new(),
            views: Vec::new(),
            ordering: None,
        }
    }

    pub fn attribute(mut self, attr: AttributeDef) -> Self {
        self.attributes.push(attr);
        self
    }

    pub fn view(mut self, view: ViewDef) -> Self {
        self.views.push(view);
        self
    }

    pub fn parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn discriminator(mut self, column: impl Into<String>) -> Self {
        self.discriminator = Some(column.into());
        self
    }

    pub fn plural(mut self, plural: impl Into<String>) -> Self {
        self.plural = Some(plural.into());
        self
    }

    pub fn ordering<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ordering = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// Looks up a declared attribute by name.
    pub fn get_attribute(&self, name: &str) -> Option<&AttributeDef> {
        self.attributes.iter().find(|a| a.name == name)
    }

    /// Lower snake-case name used for root query fields (`LineItem` -> `line_item`).
    pub fn field_name(&self) -> String {
        to_snake_case(&self.name)
    }

    /// Plural root field name (`line_items`), honoring an explicit plural.
    pub fn plural_field_name(&self) -> String {
        match &self.plural {
            Some(plural) => to_snake_case(plural),
            None => pluralize(&self.field_name()),
        }
    }
}

/// Converts `CamelCase` to `snake_case`.
pub fn to_snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let mut prev_lower = false;
    for ch in name.chars() {
        if ch.is_uppercase() {
            if prev_lower {
                out.push('_');
            }
            out.extend(ch.to_lowercase());
            prev_lower = false;
        } else {
            prev_lower = ch.is_lowercase() || ch.is_ascii_digit();
            out.push(ch);
        }
    }
    out
}

/// Converts `snake_case` to `CamelCase`.
pub fn to_camel_case(name: &str) -> String {
    name.split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect()
}

/// Naive English pluralization for generated field names.
pub fn pluralize(word: &str) -> String {
    if word.ends_with('s') || word.ends_with('x') || word.ends_with("ch") || word.ends_with("sh") {
        format!("{word}es")
    } else if let Some(stem) = word.strip_suffix('y') {
        if stem.ends_with(['a', 'e', 'i', 'o', 'u']) {
            format!("{word}s")
        } else {
            format!("{stem}ies")
        }
    } else {
        format!("{word}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_conversion() {
        assert_eq!(to_snake_case("LineItem"), "line_item");
        assert_eq!(to_snake_case("Invoice"), "invoice");
        assert_eq!(to_snake_case("HTTPLog"), "httplog");
        assert_eq!(to_camel_case("line_items"), "LineItems");
        assert_eq!(to_camel_case("client"), "Client");
    }

    #[test]
    fn test_pluralize() {
        assert_eq!(pluralize("invoice"), "invoices");
        assert_eq!(pluralize("address"), "addresses");
        assert_eq!(pluralize("country"), "countries");
        assert_eq!(pluralize("day"), "days");
    }

    #[test]
    fn test_plural_field_name() {
        let entity = EntityDef::new("LineItem");
        assert_eq!(entity.field_name(), "line_item");
        assert_eq!(entity.plural_field_name(), "line_items");

        let entity = EntityDef::new("Person").plural("People");
        assert_eq!(entity.plural_field_name(), "people");
    }

    #[test]
    fn test_same_shape_ignores_help_text() {
        let a = AttributeDef::new("name", "varchar").help("Display name");
        let b = AttributeDef::new("name", "varchar");
        assert!(a.same_shape(&b));
        assert!(!a.same_shape(&AttributeDef::new("name", "text")));
    }

    #[test]
    fn test_deserialize_entity_from_toml() {
        let toml = r#"
            name = "Client"
            ordering = ["name", "-created_at"]

            [[attributes]]
            name = "id"
            storage_type = "serial"
            auto = "create"

            [[attributes]]
            name = "address"
            storage_type = "one_to_one"
            target = "Address"
            nullable = true

            [[views]]
            name = "active"
            is_default = false
            conditions = { active = true }
        "#;

        let entity: EntityDef = toml::from_str(toml).unwrap();
        assert_eq!(entity.name, "Client");
        assert_eq!(entity.identifier, "id");
        assert_eq!(entity.attributes.len(), 2);
        assert_eq!(entity.attributes[0].auto, Some(AutoPopulate::Create));
        assert_eq!(entity.attributes[1].target.as_deref(), Some("Address"));
        assert_eq!(entity.views[0].conditions["active"], Value::Bool(true));
        assert_eq!(entity.ordering.as_ref().map(Vec::len), Some(2));
    }
}
