//! Deterministic SDL rendering and content hashing.
//!
//! The output depends only on the artifact's types and roots, never on its
//! version or build time, so two builds of the same model hash equally.

use std::fmt::Write;

use serde_json::Value;
use sha2::{Digest, Sha256};

use super::artifact::SchemaArtifact;
use crate::types::{COMPUTED_DIRECTIVE, DirectiveDef, FieldDef, TypeDef, TypeKind};

/// Renders the artifact as GraphQL SDL.
pub fn render_sdl(artifact: &SchemaArtifact) -> String {
    render_document(&artifact.types, &artifact.query, &artifact.mutation)
}

/// SHA-256 (hex) of SDL text.
pub fn content_hash(sdl: &str) -> String {
    hex::encode(Sha256::digest(sdl.as_bytes()))
}

pub(crate) fn render_document(types: &[TypeDef], query: &TypeDef, mutation: &TypeDef) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "directive @{COMPUTED_DIRECTIVE} on FIELD_DEFINITION");

    let mut sorted: Vec<&TypeDef> = types.iter().collect();
    sorted.sort_by(|a, b| a.name.cmp(&b.name));
    for ty in sorted {
        out.push('\n');
        render_type(&mut out, ty);
    }
    out.push('\n');
    render_type(&mut out, query);
    out.push('\n');
    render_type(&mut out, mutation);
    out.push_str("\nschema {\n  query: Query\n  mutation: Mutation\n}\n");
    out
}

fn render_type(out: &mut String, ty: &TypeDef) {
    render_description(out, ty.description.as_deref(), "");
    let keyword = match ty.kind {
        TypeKind::Object => "type",
        TypeKind::InputObject => "input",
        TypeKind::Enum => "enum",
        TypeKind::Scalar => "scalar",
    };
    let _ = write!(out, "{keyword} {}", ty.name);
    render_directives(out, &ty.directives);

    match ty.kind {
        TypeKind::Scalar => out.push('\n'),
        TypeKind::Enum => {
            out.push_str(" {\n");
            for value in &ty.enum_values {
                let _ = writeln!(out, "  {}", value.name);
            }
            out.push_str("}\n");
        }
        TypeKind::Object | TypeKind::InputObject => {
            out.push_str(" {\n");
            for field in &ty.fields {
                render_field(out, field);
            }
            out.push_str("}\n");
        }
    }
}

fn render_field(out: &mut String, field: &FieldDef) {
    render_description(out, field.description.as_deref(), "  ");
    let _ = write!(out, "  {}", field.name);
    if !field.args.is_empty() {
        let args: Vec<String> = field
            .args
            .iter()
            .map(|a| format!("{}: {}", a.name, a.ty))
            .collect();
        let _ = write!(out, "({})", args.join(", "));
    }
    let _ = write!(out, ": {}", field.ty);
    render_directives(out, &field.directives);
    out.push('\n');
}

fn render_directives(out: &mut String, directives: &[DirectiveDef]) {
    for directive in directives {
        let _ = write!(out, " @{}", directive.name);
        if !directive.args.is_empty() {
            let args: Vec<String> = directive
                .args
                .iter()
                .map(|(name, value)| format!("{name}: {}", literal(value)))
                .collect();
            let _ = write!(out, "({})", args.join(", "));
        }
    }
}

fn render_description(out: &mut String, description: Option<&str>, indent: &str) {
    if let Some(text) = description.filter(|t| !t.is_empty()) {
        let _ = writeln!(out, "{indent}\"\"\"{}\"\"\"", text.replace("\"\"\"", "\\\"\"\""));
    }
}

/// GraphQL literal syntax for a JSON value.
fn literal(value: &Value) -> String {
    match value {
        Value::Array(items) => {
            let items: Vec<String> = items.iter().map(literal).collect();
            format!("[{}]", items.join(", "))
        }
        Value::Object(map) => {
            let fields: Vec<String> = map
                .iter()
                .map(|(k, v)| format!("{k}: {}", literal(v)))
                .collect();
            format!("{{{}}}", fields.join(", "))
        }
        other => other.to_string(),
    }
}
