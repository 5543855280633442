//! Filter compilation.
//!
//! [`FilterCompiler::compile_filters`] walks an entity's fields and
//! relationships up to a depth ceiling and produces a [`FilterSet`]: the
//! flat `path__op` keys handed to storage, a hierarchical node view, and a
//! [`PerformanceAdvisory`].
//!
//! Cycle detection uses a branch set threaded through the recursion, so an
//! entity already being expanded on the current path is not expanded again
//! while independent branches may still reach it.

mod advisory;
mod composite;
mod node;
mod presets;

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use dashmap::DashMap;
use indexmap::IndexMap;
use modelql_storage::{RelationHop, RelationKind};
use tracing::{debug, trace, warn};

pub use advisory::{PerformanceAdvisory, PerformanceScore, fetch_strategy};
pub use composite::ParsedFilter;
pub use node::{
    COUNT_OPERATIONS, FilterNode, FilterOp, FilterSet, FilterTarget, FlatFilter, GroupedFilters,
    PATH_SEPARATOR, RELATION_OPERATIONS, operations_for, split_key,
};
pub use presets::preset_bounds;

use crate::config::ABSOLUTE_MAX_DEPTH;
use crate::error::SchemaError;
use crate::reader::{CompileContext, EntityDescriptor};

/// Caches compiled filter sets by (entity, depth).
#[derive(Debug, Clone, Default)]
pub struct FilterCompiler {
    cache: DashMap<(String, usize), Arc<FilterSet>>,
}

impl FilterCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compiles the filters of `entity` crossing at most `max_depth`
    /// relationships.
    ///
    /// `max_depth` is clamped to [`ABSOLUTE_MAX_DEPTH`].
    ///
    /// # Errors
    ///
    /// Returns `SchemaError::UnknownEntity` if `entity` or a related entity
    /// is missing from the graph.
    pub fn compile_filters(
        &self,
        ctx: &CompileContext<'_>,
        entity: &str,
        max_depth: usize,
    ) -> Result<Arc<FilterSet>, SchemaError> {
        let depth = if max_depth > ABSOLUTE_MAX_DEPTH {
            warn!(
                entity = %entity,
                requested = max_depth,
                ceiling = ABSOLUTE_MAX_DEPTH,
                "Filter depth clamped"
            );
            ABSOLUTE_MAX_DEPTH
        } else {
            max_depth
        };

        let key = (entity.to_string(), depth);
        if let Some(hit) = self.cache.get(&key) {
            trace!(entity = %entity, depth, "Filter cache hit");
            return Ok(Arc::clone(hit.value()));
        }
        trace!(entity = %entity, depth, "Filter cache miss");

        let set = Arc::new(build_filter_set(ctx, entity, depth)?);
        debug!(
            entity = %entity,
            depth,
            paths = set.flat.len(),
            score = set.advisory.score.as_str(),
            "Compiled filters"
        );
        Ok(Arc::clone(self.cache.entry(key).or_insert(set).value()))
    }

    /// Evicts every filter set that read `entity`.
    pub fn invalidate(&self, entity: &str) -> usize {
        let before = self.cache.len();
        self.cache.retain(|_, set| !set.dependencies.contains(entity));
        before - self.cache.len()
    }

    pub fn clear(&self) {
        self.cache.clear();
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

fn build_filter_set(
    ctx: &CompileContext<'_>,
    entity: &str,
    depth: usize,
) -> Result<FilterSet, SchemaError> {
    let root = ctx.describe(entity)?;
    let mut walk = FilterWalk {
        ctx,
        max_depth: depth,
        flat: IndexMap::new(),
        dependencies: BTreeSet::new(),
    };
    let mut branch = HashSet::from([root.name.clone()]);
    let roots = walk.expand(&root, "", &[], 0, &mut branch)?;
    let advisory = PerformanceAdvisory::analyze(&walk.flat, ctx.config);

    Ok(FilterSet {
        entity: entity.to_string(),
        depth,
        roots,
        flat: walk.flat,
        advisory,
        dependencies: walk.dependencies,
    })
}

struct FilterWalk<'c, 'a> {
    ctx: &'c CompileContext<'a>,
    max_depth: usize,
    flat: IndexMap<String, FlatFilter>,
    dependencies: BTreeSet<String>,
}

impl FilterWalk<'_, '_> {
    fn expand(
        &mut self,
        d: &EntityDescriptor,
        prefix: &str,
        hops: &[RelationHop],
        depth: usize,
        branch: &mut HashSet<String>,
    ) -> Result<Vec<FilterNode>, SchemaError> {
        self.dependencies.extend(d.dependencies.iter().cloned());
        let mut nodes = Vec::new();

        for field in &d.fields {
            let operations = operations_for(field.category, field.nullable);
            if operations.is_empty() {
                continue;
            }
            let path = format!("{prefix}{}", field.name);
            let choices = (!field.choices.is_empty()).then(|| field.choices.clone());
            let scalar = if field.is_identifier {
                "ID"
            } else {
                field.category.scalar_name()
            };
            self.insert(FlatFilter {
                path: path.clone(),
                hops: hops.to_vec(),
                target: FilterTarget::Field {
                    column: field.name.clone(),
                },
                scalar: scalar.to_string(),
                operations: operations.clone(),
                choices: choices.clone(),
            });
            nodes.push(FilterNode::leaf(path, &field.name, operations, choices));
        }

        if hops.is_empty() {
            for computed in &d.computed {
                let operations = operations_for(computed.category, true);
                if operations.is_empty() {
                    continue;
                }
                self.insert(FlatFilter {
                    path: computed.name.clone(),
                    hops: Vec::new(),
                    target: FilterTarget::Computed {
                        attribute: computed.name.clone(),
                    },
                    scalar: computed.category.scalar_name().to_string(),
                    operations: operations.clone(),
                    choices: None,
                });
                nodes.push(FilterNode::leaf(
                    computed.name.clone(),
                    &computed.name,
                    operations,
                    None,
                ));
            }
        }

        for rel in &d.relationships {
            let path = format!("{prefix}{}", rel.name);
            let mut node = FilterNode::leaf(path.clone(), &rel.name, Vec::new(), None);

            if rel.kind == RelationKind::ToOneForward {
                node.operations = RELATION_OPERATIONS.to_vec();
                self.insert(FlatFilter {
                    path: path.clone(),
                    hops: hops.to_vec(),
                    target: FilterTarget::Relation {
                        column: rel.link_column().to_string(),
                    },
                    scalar: "ID".to_string(),
                    operations: RELATION_OPERATIONS.to_vec(),
                    choices: None,
                });
            }

            if depth >= self.max_depth {
                if !node.operations.is_empty() {
                    nodes.push(node);
                }
                continue;
            }

            if rel.kind.is_many() {
                let count_path = format!("{prefix}{}_count", rel.name);
                self.insert(FlatFilter {
                    path: count_path.clone(),
                    hops: hops.to_vec(),
                    target: FilterTarget::Count { hop: rel.hop() },
                    scalar: "Int".to_string(),
                    operations: COUNT_OPERATIONS.to_vec(),
                    choices: None,
                });
                nodes.push(FilterNode::leaf(
                    count_path,
                    &format!("{}_count", rel.name),
                    COUNT_OPERATIONS.to_vec(),
                    None,
                ));
            }

            if branch.insert(rel.related.clone()) {
                let related = self.ctx.describe(&rel.related)?;
                let mut child_hops = hops.to_vec();
                child_hops.push(rel.hop());
                let child_prefix = format!("{path}{PATH_SEPARATOR}");
                let children = self.expand(&related, &child_prefix, &child_hops, depth + 1, branch);
                branch.remove(&rel.related);
                node.children = children?;
                node.is_nested = !node.children.is_empty();
            } else {
                trace!(
                    relationship = %rel.name,
                    related = %rel.related,
                    "Skipping filter expansion already on this branch"
                );
            }

            if !node.operations.is_empty() || node.is_nested {
                nodes.push(node);
            }
        }

        Ok(nodes)
    }

    fn insert(&mut self, flat: FlatFilter) {
        if self.flat.contains_key(&flat.path) {
            warn!(path = %flat.path, "Duplicate filter path ignored");
            return;
        }
        self.flat.insert(flat.path.clone(), flat);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{Harness, employee_graph, invoice_graph};

    #[test]
    fn test_invoice_depth_two_paths() {
        let h = Harness::new(invoice_graph());
        let set = FilterCompiler::new()
            .compile_filters(&h.ctx(), "Invoice", 2)
            .unwrap();
        let keys = set.filter_keys();

        assert!(keys.contains(&"total__gte".to_string()));
        assert!(keys.contains(&"issued_at__this_year".to_string()));
        assert!(keys.contains(&"status__in".to_string()));
        assert!(keys.contains(&"client__name__icontains".to_string()));
        assert!(keys.contains(&"client__address__city__iexact".to_string()));
        assert!(keys.contains(&"line_items_count__gt".to_string()));
        assert!(keys.contains(&"line_items__amount__lte".to_string()));
        assert!(keys.contains(&"client__exact".to_string()));
        assert!(keys.contains(&"label__icontains".to_string()));
        assert!(
            !keys
                .iter()
                .any(|k| k.starts_with("client__address__country__name"))
        );
        assert!(!keys.iter().any(|k| k.starts_with("line_items__label")));
    }

    #[test]
    fn test_hop_count_bounded_by_depth() {
        let h = Harness::new(invoice_graph());
        let compiler = FilterCompiler::new();
        for entity in ["Invoice", "Client", "Address", "Country", "LineItem"] {
            for depth in 0..=3 {
                let set = compiler.compile_filters(&h.ctx(), entity, depth).unwrap();
                for flat in set.flat.values() {
                    assert!(
                        flat.hop_count() <= depth,
                        "{entity}: {} crosses {} > {depth}",
                        flat.path,
                        flat.hop_count()
                    );
                }
            }
        }
    }

    #[test]
    fn test_depth_zero_has_only_local_paths() {
        let h = Harness::new(invoice_graph());
        let set = FilterCompiler::new()
            .compile_filters(&h.ctx(), "Invoice", 0)
            .unwrap();
        assert!(set.flat.values().all(|f| f.hops.is_empty()));
        assert!(!set.flat.contains_key("line_items_count"));
        assert!(set.flat.contains_key("client"));
    }

    #[test]
    fn test_cache_is_idempotent() {
        let h = Harness::new(invoice_graph());
        let compiler = FilterCompiler::new();
        let a = compiler.compile_filters(&h.ctx(), "Invoice", 2).unwrap();
        let b = compiler.compile_filters(&h.ctx(), "Invoice", 2).unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        let fresh = FilterCompiler::new()
            .compile_filters(&h.ctx(), "Invoice", 2)
            .unwrap();
        assert_eq!(*a, *fresh);

        assert_eq!(compiler.invalidate("Country"), 1);
        assert!(compiler.is_empty());
    }

    #[test]
    fn test_depth_is_clamped() {
        let h = Harness::new(invoice_graph());
        let compiler = FilterCompiler::new();
        let set = compiler.compile_filters(&h.ctx(), "Invoice", 50).unwrap();
        assert_eq!(set.depth, ABSOLUTE_MAX_DEPTH);
        assert!(set.flat.values().all(|f| f.hop_count() <= ABSOLUTE_MAX_DEPTH));
    }

    #[test]
    fn test_self_reference_terminates() {
        let h = Harness::new(employee_graph());
        let set = FilterCompiler::new()
            .compile_filters(&h.ctx(), "Employee", ABSOLUTE_MAX_DEPTH)
            .unwrap();
        let keys = set.filter_keys();
        assert!(keys.contains(&"manager__exact".to_string()));
        assert!(keys.contains(&"reports_count__gte".to_string()));
        assert!(!keys.iter().any(|k| k.starts_with("manager__name")));
        assert!(set.flat.values().all(|f| f.hop_count() <= 1));
    }

    #[test]
    fn test_independent_branches_reach_same_entity() {
        let h = Harness::new(invoice_graph());
        let set = FilterCompiler::new()
            .compile_filters(&h.ctx(), "Client", 2)
            .unwrap();
        // Client is not re-expanded below `invoices`; LineItem still is.
        assert!(set.flat.contains_key("invoices__line_items_count"));
        assert!(set.flat.contains_key("address__country__name"));
        assert!(!set.flat.contains_key("invoices__client__name"));
    }

    #[test]
    fn test_grouping_starts_at_second_hop() {
        let h = Harness::new(invoice_graph());
        let set = FilterCompiler::new()
            .compile_filters(&h.ctx(), "Invoice", 2)
            .unwrap();
        let grouped = set.grouped();
        assert!(grouped.direct.contains(&"client__name__icontains".to_string()));
        assert!(grouped.direct.contains(&"line_items_count__gt".to_string()));
        let client = grouped.groups.get("client").unwrap();
        assert!(client.contains(&"client__address__city__iexact".to_string()));
        assert!(client.contains(&"client__invoices_count__exact".to_string()));
    }

    #[test]
    fn test_nodes_mirror_relationships() {
        let h = Harness::new(invoice_graph());
        let set = FilterCompiler::new()
            .compile_filters(&h.ctx(), "Invoice", 2)
            .unwrap();
        let client = set.roots.iter().find(|n| n.name == "client").unwrap();
        assert!(client.is_nested);
        assert_eq!(client.operations, RELATION_OPERATIONS.to_vec());
        let address = client.children.iter().find(|n| n.name == "address").unwrap();
        assert!(address.children.iter().any(|n| n.field_path == "client__address__city"));
    }

    #[test]
    fn test_input_type_shape() {
        let h = Harness::new(invoice_graph());
        let set = FilterCompiler::new()
            .compile_filters(&h.ctx(), "Invoice", 1)
            .unwrap();
        let ty = set.input_type();
        assert_eq!(ty.name, "InvoiceFilter");
        assert_eq!(ty.get_field("AND").unwrap().ty.to_string(), "[InvoiceFilter!]");
        assert_eq!(ty.get_field("NOT").unwrap().ty.to_string(), "InvoiceFilter");
        assert_eq!(ty.get_field("status__in").unwrap().ty.to_string(), "[String!]");
        assert_eq!(ty.get_field("id__exact").unwrap().ty.to_string(), "ID");
        assert_eq!(
            ty.get_field("issued_at__today").unwrap().ty.to_string(),
            "Boolean"
        );
        assert!(ty.fields.iter().all(|f| !f.ty.is_non_null()));
    }
}
