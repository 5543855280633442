//! Relationship-aware query evaluation against the in-memory backend.

use modelql_db_memory::InMemoryStorage;
use modelql_storage::{
    Condition, ConditionTarget, CountAnnotation, EntityStorage, FilterExpr, Lookup, QuerySpec,
    RelationHop, RelationKind, SortKey,
};
use serde_json::json;

fn hop(name: &str, kind: RelationKind, target: &str, column: &str) -> RelationHop {
    RelationHop {
        name: name.to_string(),
        kind,
        target: target.to_string(),
        column: column.to_string(),
        source_identifier: "id".to_string(),
        target_identifier: "id".to_string(),
    }
}

fn seeded() -> InMemoryStorage {
    let storage = InMemoryStorage::new();
    storage
        .insert_many(
            "Country",
            [json!({"id": 1, "name": "Germany"}), json!({"id": 2, "name": "France"})],
        )
        .unwrap();
    storage
        .insert_many(
            "Address",
            [
                json!({"id": 10, "city": "Berlin", "country_id": 1}),
                json!({"id": 11, "city": "Paris", "country_id": 2}),
            ],
        )
        .unwrap();
    storage
        .insert_many(
            "Client",
            [
                json!({"id": 100, "name": "Acme", "address_id": 10}),
                json!({"id": 101, "name": "Globex", "address_id": 11}),
                json!({"id": 102, "name": "Initech", "address_id": null}),
            ],
        )
        .unwrap();
    storage
        .insert_many(
            "Invoice",
            [
                json!({"id": 1, "total": 250.0, "client_id": 100}),
                json!({"id": 2, "total": 75.5, "client_id": 100}),
                json!({"id": 3, "total": 990.0, "client_id": 101}),
            ],
        )
        .unwrap();
    storage
}

#[tokio::test]
async fn test_two_hop_filter() {
    let storage = seeded();
    let condition = Condition::field("city", Lookup::IExact, json!("berlin")).through(vec![
        hop("client", RelationKind::ToOneForward, "Client", "client_id"),
        hop("address", RelationKind::ToOneForward, "Address", "address_id"),
    ]);

    let rows = storage
        .fetch(&QuerySpec::new("Invoice").filter(condition.into()))
        .await
        .unwrap();
    let ids: Vec<_> = rows.iter().map(|r| r["id"].clone()).collect();
    assert_eq!(ids, vec![json!(1), json!(2)]);
}

#[tokio::test]
async fn test_reverse_count_condition_and_annotation() {
    let storage = seeded();
    let invoices = hop("invoices", RelationKind::ToManyReverse, "Invoice", "client_id");

    let condition = Condition {
        hops: Vec::new(),
        target: ConditionTarget::Count(invoices.clone()),
        lookup: Lookup::Gte,
        value: json!(1),
    };
    let spec = QuerySpec::new("Client")
        .filter(condition.into())
        .annotate_count(CountAnnotation {
            alias: "invoices_count".to_string(),
            hop: invoices,
        })
        .order_by(vec![SortKey::desc("invoices_count")]);

    let rows = storage.fetch(&spec).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["name"], json!("Acme"));
    assert_eq!(rows[0]["invoices_count"], json!(2));
    assert_eq!(storage.count(&spec).await.unwrap(), 2);
}

#[tokio::test]
async fn test_missing_relation_matches_isnull() {
    let storage = seeded();
    let condition = Condition::field("id", Lookup::IsNull, json!(true)).through(vec![hop(
        "address",
        RelationKind::ToOneForward,
        "Address",
        "address_id",
    )]);

    let rows = storage
        .fetch(&QuerySpec::new("Client").filter(condition.into()))
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["name"], json!("Initech"));
}

#[tokio::test]
async fn test_not_and_slice() {
    let storage = seeded();
    let spec = QuerySpec::new("Invoice")
        .filter(FilterExpr::Not(Box::new(
            Condition::field("total", Lookup::Lt, json!(100)).into(),
        )))
        .order_by(vec![SortKey::asc("total")])
        .slice(1, Some(5));

    let rows = storage.fetch(&spec).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["id"], json!(3));
    assert_eq!(storage.take_query_log().len(), 1);
}

#[tokio::test]
async fn test_get_by_id_and_replace() {
    let storage = seeded();
    storage
        .insert("Client", json!({"id": 100, "name": "Acme Ltd", "address_id": 10}))
        .unwrap();
    assert_eq!(storage.len("Client"), 3);

    let found = storage.get_by_id("Client", &json!(100)).await.unwrap();
    assert_eq!(found.unwrap()["name"], json!("Acme Ltd"));
    assert!(storage.get_by_id("Client", &json!(999)).await.unwrap().is_none());
    assert!(storage.get_by_id("Vendor", &json!(1)).await.is_err());

    assert!(storage.remove("Client", &json!(102)));
    assert!(!storage.remove("Client", &json!(102)));
}
