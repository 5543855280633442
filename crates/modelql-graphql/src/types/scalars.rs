//! Custom scalars used by compiled schemas.
//!
//! Built-in GraphQL scalars cover text, numbers and booleans. The model's
//! temporal, identifier and opaque categories get named scalars with
//! input validation.

use serde_json::Value;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime, Time};

use super::typedef::TypeDef;

/// Custom scalar names with their descriptions, in declaration order.
pub const CUSTOM_SCALARS: &[(&str, &str)] = &[
    ("Date", "Calendar date: YYYY-MM-DD"),
    ("DateTime", "RFC 3339 timestamp, or a calendar date"),
    ("Time", "Time of day: hh:mm:ss with optional fraction"),
    ("UUID", "RFC 4122 UUID in canonical hyphenated form"),
    ("JSON", "Arbitrary JSON value"),
    ("Binary", "Base64-encoded bytes"),
];

/// Scalar type definitions for every custom scalar.
pub fn scalar_typedefs() -> Vec<TypeDef> {
    CUSTOM_SCALARS
        .iter()
        .map(|(name, description)| {
            TypeDef::scalar(*name).description(Some((*description).to_string()))
        })
        .collect()
}

pub fn is_custom_scalar(name: &str) -> bool {
    CUSTOM_SCALARS.iter().any(|(n, _)| *n == name)
}

/// Validates an input value for a custom scalar.
///
/// Unknown scalar names accept every value.
pub fn validate_scalar(name: &str, value: &Value) -> bool {
    match name {
        "JSON" => true,
        "Date" => value.as_str().is_some_and(is_date),
        "DateTime" => value
            .as_str()
            .is_some_and(|s| OffsetDateTime::parse(s, &Rfc3339).is_ok() || is_date(s)),
        "Time" => value.as_str().is_some_and(|s| {
            Time::parse(
                s,
                format_description!("[hour]:[minute]:[second][optional [.[subsecond]]]"),
            )
            .is_ok()
        }),
        "UUID" => value.as_str().is_some_and(is_uuid),
        "Binary" => value.as_str().is_some_and(is_base64),
        _ => true,
    }
}

fn is_date(s: &str) -> bool {
    Date::parse(s, format_description!("[year]-[month]-[day]")).is_ok()
}

fn is_uuid(s: &str) -> bool {
    let bytes = s.as_bytes();
    bytes.len() == 36
        && bytes.iter().enumerate().all(|(i, b)| match i {
            8 | 13 | 18 | 23 => *b == b'-',
            _ => b.is_ascii_hexdigit(),
        })
}

fn is_base64(s: &str) -> bool {
    s.len() % 4 == 0
        && s.trim_end_matches('=')
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'+' || b == b'/')
}

/// Normalizes an `ID` argument to the stored identifier shape.
///
/// GraphQL delivers IDs as strings; integer-looking IDs become numbers so
/// they compare equal to integer identifier columns.
pub fn coerce_identifier(value: &Value) -> Value {
    match value {
        Value::String(s) => s
            .parse::<i64>()
            .map(Value::from)
            .unwrap_or_else(|_| value.clone()),
        Value::Array(items) => Value::Array(items.iter().map(coerce_identifier).collect()),
        other => other.clone(),
    }
}
