//! Shared model fixtures for unit tests.

use std::sync::Arc;

use modelql_core::{
    AttributeDef, AutoPopulate, EntityDef, ModelGraph, OperationKind, Record, ViewDef,
};
use serde_json::{Value, json};

use crate::config::CompilerConfig;
use crate::reader::{CompileContext, ModelGraphReader};

/// Invoice -> Client -> Address -> Country, with Invoice <- LineItem.
pub(crate) fn invoice_graph() -> ModelGraph {
    ModelGraph::new(invoice_entities()).unwrap()
}

pub(crate) fn invoice_entities() -> Vec<EntityDef> {
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
            .attribute(AttributeDef::new("notes", "text").nullable().blank())
            .attribute(AttributeDef::new("created_at", "datetime").auto(AutoPopulate::Create))
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
            .attribute(AttributeDef::computed(
                "total_with_tax",
                "float",
                Arc::new(|r: &Record| match r.get("total").and_then(Value::as_f64) {
                    Some(total) => json!(total * 1.2),
                    None => Value::Null,
                }),
            ))
            .attribute(AttributeDef::operation("create", OperationKind::Create))
            .attribute(AttributeDef::operation("update", OperationKind::Update))
            .view(ViewDef::default_view("all"))
            .view(ViewDef::new("unpaid").with_condition("paid", json!(false)))
            .ordering([
                "id",
                "number",
                "total",
                "issued_at",
                "line_items_count",
                "label",
                "total_with_tax",
            ]),
        EntityDef::new("LineItem")
            .attribute(AttributeDef::new("description", "text"))
            .attribute(AttributeDef::new("amount", "decimal"))
            .attribute(AttributeDef::new("quantity", "integer").with_default(json!(1)))
            .attribute(
                AttributeDef::relation("invoice", "foreign_key", "Invoice").related_name("line_items"),
            ),
    ]
}

/// Entity whose `manager` points at itself.
pub(crate) fn employee_graph() -> ModelGraph {
    ModelGraph::new([EntityDef::new("Employee")
        .attribute(AttributeDef::new("name", "text"))
        .attribute(
            AttributeDef::relation("manager", "foreign_key", "Employee")
                .nullable()
                .related_name("reports"),
        )])
    .unwrap()
}

/// Owns everything a [`CompileContext`] borrows.
pub(crate) struct Harness {
    pub graph: ModelGraph,
    pub reader: ModelGraphReader,
    pub config: CompilerConfig,
}

impl Harness {
    pub fn new(graph: ModelGraph) -> Self {
        Self {
            graph,
            reader: ModelGraphReader::new(),
            config: CompilerConfig::default(),
        }
    }

    pub fn ctx(&self) -> CompileContext<'_> {
        CompileContext::new(&self.graph, &self.reader, &self.config)
    }
}
