//! Filter and type compilation over the shared invoicing model.

mod common;

use std::sync::Arc;

use modelql_graphql::config::ABSOLUTE_MAX_DEPTH;
use modelql_graphql::{CompileContext, CompilerConfig, FilterCompiler, ModelGraphReader, TypeCompiler};

// =============================================================================
// Relationship traversal
// =============================================================================

#[test]
fn test_invoice_paths_stop_at_depth_two() {
    let graph = common::graph();
    let reader = ModelGraphReader::new();
    let config = CompilerConfig::default();
    let ctx = CompileContext::new(&graph, &reader, &config);

    let set = FilterCompiler::new().compile_filters(&ctx, "Invoice", 2).unwrap();

    assert!(set.has_key("number__exact"));
    assert!(set.has_key("client__name__icontains"));
    assert!(set.has_key("client__address__city__iexact"));
    assert!(set.has_key("line_items_count__gt"));
    assert!(set.has_key("issued_at__this_year"));
    assert!(!set.has_key("client__address__country__name__exact"));
    assert!(
        set.filter_keys()
            .iter()
            .all(|key| key.split("__").count() <= 4),
        "a key crosses more than two relationships"
    );
    assert!(set.dependencies.contains("Address"));
}

#[test]
fn test_self_reference_does_not_recurse() {
    let graph = common::graph();
    let reader = ModelGraphReader::new();
    let config = CompilerConfig::default();
    let ctx = CompileContext::new(&graph, &reader, &config);

    let set = FilterCompiler::new()
        .compile_filters(&ctx, "Employee", ABSOLUTE_MAX_DEPTH)
        .unwrap();

    assert!(set.has_key("name__icontains"));
    assert!(set.has_key("manager__exact"));
    assert!(set.has_key("reports_count__gt"));
    assert!(
        set.filter_keys()
            .iter()
            .all(|key| !key.starts_with("manager__name") && !key.starts_with("reports__")),
        "self reference expanded: {:?}",
        set.filter_keys()
    );
}

#[test]
fn test_requested_depth_is_clamped() {
    let graph = common::graph();
    let reader = ModelGraphReader::new();
    let config = CompilerConfig::default();
    let ctx = CompileContext::new(&graph, &reader, &config);

    let set = FilterCompiler::new().compile_filters(&ctx, "LineItem", 50).unwrap();

    assert_eq!(set.depth, ABSOLUTE_MAX_DEPTH);
    assert!(set.has_key("invoice__client__address__country__name__exact"));
    assert!(set.advisory.max_depth <= ABSOLUTE_MAX_DEPTH);
}

#[test]
fn test_unknown_entity_is_rejected() {
    let graph = common::graph();
    let reader = ModelGraphReader::new();
    let config = CompilerConfig::default();
    let ctx = CompileContext::new(&graph, &reader, &config);

    let err = FilterCompiler::new().compile_filters(&ctx, "Ghost", 2).unwrap_err();
    assert_eq!(err.error_code(), "UNKNOWN_ENTITY");
}

// =============================================================================
// Caching
// =============================================================================

#[test]
fn test_compilers_memoize_until_invalidated() {
    let graph = common::graph();
    let reader = ModelGraphReader::new();
    let config = CompilerConfig::default();
    let ctx = CompileContext::new(&graph, &reader, &config);
    let filters = FilterCompiler::new();
    let types = TypeCompiler::new();

    let first = filters.compile_filters(&ctx, "Invoice", 2).unwrap();
    let again = filters.compile_filters(&ctx, "Invoice", 2).unwrap();
    assert!(Arc::ptr_eq(&first, &again));

    let object = types.compile_object_type(&ctx, "Invoice").unwrap();
    assert!(Arc::ptr_eq(&object, &types.compile_object_type(&ctx, "Invoice").unwrap()));

    assert_eq!(filters.invalidate("Address"), 1);
    let rebuilt = filters.compile_filters(&ctx, "Invoice", 2).unwrap();
    assert!(!Arc::ptr_eq(&first, &rebuilt));
    assert_eq!(first.filter_keys(), rebuilt.filter_keys());
}
