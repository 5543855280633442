//! Type compilation.
//!
//! Descriptors become data-first [`TypeDef`]s: one read object type per
//! entity plus create/update input types with parallel plain-identifier
//! and `nested_<name>` relationship fields.
//!
//! ## Naming
//!
//! - object type: `Invoice`
//! - filter input: `InvoiceFilter`
//! - page object: `InvoicePage`
//! - inputs: `InvoiceCreateInput`, `InvoiceUpdateInput`, `InvoicePartialCreateInput`
//! - nested inputs: `InvoiceCreateInput_LineItems`
//! - enums: `InvoiceStatus`

mod compiler;
mod scalars;
mod typedef;

use modelql_core::to_camel_case;

pub use compiler::{InputOperation, TypeCacheKey, TypeCompiler, TypeFlavor};
pub use scalars::{
    CUSTOM_SCALARS, coerce_identifier, is_custom_scalar, scalar_typedefs, validate_scalar,
};
pub use typedef::{
    ArgumentDef, CompiledType, DirectiveDef, EnumValueDef, FieldDef, FieldSource, TypeDef,
    TypeKind, TypeRefDef, enum_value_name,
};

/// Directive marking fields evaluated in memory after storage access.
pub const COMPUTED_DIRECTIVE: &str = "computed";

pub fn filter_type_name(entity: &str) -> String {
    format!("{entity}Filter")
}

pub fn page_type_name(entity: &str) -> String {
    format!("{entity}Page")
}

pub fn enum_type_name(entity: &str, field: &str) -> String {
    format!("{entity}{}", to_camel_case(field))
}

pub fn input_type_name(entity: &str, operation: InputOperation, partial: bool) -> String {
    let partial = if partial { "Partial" } else { "" };
    format!("{entity}{partial}{}Input", operation.type_suffix())
}

/// Nested input type name, qualified by the enclosing input's name.
pub fn nested_input_name(parent: &str, relationship: &str) -> String {
    format!("{parent}_{}", to_camel_case(relationship))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names() {
        assert_eq!(filter_type_name("Invoice"), "InvoiceFilter");
        assert_eq!(page_type_name("Invoice"), "InvoicePage");
        assert_eq!(enum_type_name("Invoice", "payment_status"), "InvoicePaymentStatus");
        assert_eq!(
            input_type_name("Invoice", InputOperation::Create, false),
            "InvoiceCreateInput"
        );
        assert_eq!(
            input_type_name("Invoice", InputOperation::Update, true),
            "InvoicePartialUpdateInput"
        );
        assert_eq!(
            nested_input_name("InvoiceCreateInput", "line_items"),
            "InvoiceCreateInput_LineItems"
        );
    }
}
