//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use async_graphql::dynamic::Schema;
use modelql_core::{
    AttributeDef, AutoPopulate, EntityDef, ModelGraph, ModelRegistry, OperationKind, Record, ViewDef,
};
use modelql_db_memory::InMemoryStorage;
use modelql_graphql::{CompilerConfig, ExecutionContext, SchemaOptions, SchemaService};
use serde_json::{Value, json};
use time::Date;
use time::macros::date;

/// Fixed date used to evaluate date presets.
pub const TODAY: Date = date!(2024 - 06 - 15);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// =============================================================================
// Model
// =============================================================================

/// Invoice -> Client -> Address -> Country, with Invoice <- LineItem and a
/// self-referencing Employee.
pub fn entities() -> Vec<EntityDef> {
    vec![
        EntityDef::new("Country")
            .plural("countries")
            .attribute(AttributeDef::new("name", "text"))
            .attribute(AttributeDef::new("code", "char")),
        EntityDef::new("Address")
            .attribute(AttributeDef::new("city", "text"))
            .attribute(AttributeDef::new("street", "text").blank())
            .attribute(
                AttributeDef::relation("country", "foreign_key", "Country").related_name("addresses"),
            ),
        EntityDef::new("Client")
            .attribute(AttributeDef::new("name", "text"))
            .attribute(AttributeDef::new("email", "email").nullable().blank())
            .attribute(
                AttributeDef::relation("address", "one_to_one", "Address")
                    .nullable()
                    .related_name("client"),
            ),
        EntityDef::new("Invoice")
            .attribute(AttributeDef::new("id", "serial").auto(AutoPopulate::Create))
            .attribute(AttributeDef::new("number", "slug"))
            .attribute(AttributeDef::new("total", "decimal"))
            .attribute(AttributeDef::new("issued_at", "date"))
            .attribute(AttributeDef::new("status", "enum").choices(["draft", "sent", "paid"]))
            .attribute(AttributeDef::new("paid", "boolean").with_default(json!(false)))
            .attribute(
                AttributeDef::relation("client", "foreign_key", "Client").related_name("invoices"),
            )
            .attribute(AttributeDef::computed(
                "label",
                "text",
                Arc::new(|r: &Record| {
                    let number = r.get("number").and_then(Value::as_str).unwrap_or_default();
                    json!(format!("INV {number}"))
                }),
            ))
            .attribute(AttributeDef::operation("create", OperationKind::Create))
            .view(ViewDef::default_view("all"))
            .view(ViewDef::new("unpaid").with_condition("paid", json!(false)))
            .ordering(["id", "number", "total", "issued_at", "line_items_count", "label"]),
        EntityDef::new("LineItem")
            .attribute(AttributeDef::new("description", "text"))
            .attribute(AttributeDef::new("amount", "decimal"))
            .attribute(
                AttributeDef::relation("invoice", "foreign_key", "Invoice").related_name("line_items"),
            ),
        EntityDef::new("Employee")
            .attribute(AttributeDef::new("name", "text"))
            .attribute(
                AttributeDef::relation("manager", "foreign_key", "Employee")
                    .nullable()
                    .related_name("reports"),
            ),
    ]
}

pub fn graph() -> ModelGraph {
    ModelGraph::new(entities()).unwrap()
}

pub fn registry() -> Arc<ModelRegistry> {
    Arc::new(ModelRegistry::new(graph()))
}

/// Service with one schema named `main` covering the whole model.
pub fn service() -> Arc<SchemaService> {
    let service = SchemaService::new_shared(registry(), CompilerConfig::default());
    service.register("main", SchemaOptions::new()).unwrap();
    service
}

// =============================================================================
// Data
// =============================================================================

/// Two clients in two countries, 23 invoices and a few line items.
pub fn storage() -> Arc<InMemoryStorage> {
    let storage = InMemoryStorage::new_shared();
    storage
        .insert_many(
            "Country",
            [
                json!({"id": 1, "name": "Germany", "code": "DE"}),
                json!({"id": 2, "name": "France", "code": "FR"}),
            ],
        )
        .unwrap();
    storage
        .insert_many(
            "Address",
            [
                json!({"id": 10, "city": "Berlin", "street": "", "country_id": 1}),
                json!({"id": 11, "city": "Paris", "street": "", "country_id": 2}),
            ],
        )
        .unwrap();
    storage
        .insert_many(
            "Client",
            [
                json!({"id": 100, "name": "Acme GmbH", "email": null, "address_id": 10}),
                json!({"id": 101, "name": "Bistro SARL", "email": "hi@bistro.fr", "address_id": 11}),
            ],
        )
        .unwrap();

    for n in 1..=23_i64 {
        let status = ["draft", "sent", "paid"][(n % 3) as usize];
        storage
            .insert(
                "Invoice",
                json!({
                    "id": n,
                    "number": format!("{n:04}"),
                    "total": n * 10,
                    "issued_at": if n <= 5 { "2024-03-01" } else { "2023-11-20" },
                    "status": status,
                    "paid": status == "paid",
                    "client_id": if n % 2 == 0 { 100 } else { 101 },
                }),
            )
            .unwrap();
    }
    storage
        .insert_many(
            "LineItem",
            [
                json!({"id": 1000, "description": "Design", "amount": 50, "invoice_id": 1}),
                json!({"id": 1001, "description": "Hosting", "amount": 20, "invoice_id": 1}),
                json!({"id": 1002, "description": "Support", "amount": 30, "invoice_id": 2}),
            ],
        )
        .unwrap();
    storage
        .insert_many(
            "Employee",
            [
                json!({"id": 1, "name": "Root", "manager_id": null}),
                json!({"id": 2, "name": "Leaf", "manager_id": 1}),
            ],
        )
        .unwrap();
    storage
}

pub fn context(storage: Arc<InMemoryStorage>) -> ExecutionContext {
    ExecutionContext::builder()
        .with_storage(storage)
        .with_today(TODAY)
        .build()
        .unwrap()
}

/// Runs `query` and returns `(data, error codes)`.
pub async fn execute(schema: &Schema, ctx: ExecutionContext, query: &str) -> (Value, Vec<String>) {
    let response = schema
        .execute(async_graphql::Request::new(query).data(ctx))
        .await;
    let codes = response
        .errors
        .iter()
        .map(|e| {
            e.extensions
                .as_ref()
                .and_then(|ext| ext.get("code"))
                .map(|code| code.to_string().trim_matches('"').to_string())
                .unwrap_or_else(|| e.message.clone())
        })
        .collect();
    (response.data.into_json().unwrap(), codes)
}
