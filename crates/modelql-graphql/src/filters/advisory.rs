//! Performance advisory for a compiled filter set.

use indexmap::IndexMap;
use modelql_storage::{EagerLoadHint, FetchStrategy, RelationKind};
use serde::{Deserialize, Serialize};

use super::node::{FlatFilter, PATH_SEPARATOR};
use crate::config::CompilerConfig;

/// Coarse cost estimate of filtering an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PerformanceScore {
    Good,
    Moderate,
    Poor,
}

impl PerformanceScore {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Good => "good",
            Self::Moderate => "moderate",
            Self::Poor => "poor",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceAdvisory {
    /// Relation paths the storage layer should prefetch.
    pub eager_load: Vec<EagerLoadHint>,
    /// Many-valued relation paths that issue one query per instance when
    /// not prefetched.
    pub n_plus_one_risks: Vec<String>,
    /// Filters crossing at least one relationship.
    pub nested_filter_count: usize,
    /// Largest hop count of any filter.
    pub max_depth: usize,
    /// Computed attributes filtered in memory.
    pub computed_filters: Vec<String>,
    pub score: PerformanceScore,
}

impl PerformanceAdvisory {
    pub fn analyze(flat: &IndexMap<String, FlatFilter>, config: &CompilerConfig) -> Self {
        let mut eager_load: Vec<EagerLoadHint> = Vec::new();
        let mut n_plus_one_risks: Vec<String> = Vec::new();
        let mut nested_filter_count = 0;
        let mut max_depth = 0;
        let mut computed_filters = Vec::new();

        for filter in flat.values() {
            let hops = filter.hop_count();
            max_depth = max_depth.max(hops);
            if hops > 0 {
                nested_filter_count += 1;
            }
            if filter.is_computed() {
                computed_filters.push(filter.path.clone());
            }

            let mut path = String::new();
            for hop in &filter.hops {
                if !path.is_empty() {
                    path.push_str(PATH_SEPARATOR);
                }
                path.push_str(&hop.name);
                if eager_load.iter().any(|h| h.path == path) {
                    continue;
                }
                let strategy = fetch_strategy(hop.kind);
                if strategy == FetchStrategy::Batch {
                    n_plus_one_risks.push(path.clone());
                }
                eager_load.push(EagerLoadHint::new(path.clone(), strategy));
            }
        }

        let mut score = if nested_filter_count <= config.good_nested_filters
            && max_depth <= config.good_max_depth
        {
            PerformanceScore::Good
        } else if nested_filter_count <= config.moderate_nested_filters
            && max_depth <= config.moderate_max_depth
        {
            PerformanceScore::Moderate
        } else {
            PerformanceScore::Poor
        };
        if score == PerformanceScore::Good && !computed_filters.is_empty() {
            score = PerformanceScore::Moderate;
        }

        Self {
            eager_load,
            n_plus_one_risks,
            nested_filter_count,
            max_depth,
            computed_filters,
            score,
        }
    }

    /// Hints for the relation paths actually used by `paths`.
    pub fn hints_for<'a>(&self, paths: impl IntoIterator<Item = &'a str>) -> Vec<EagerLoadHint> {
        let used: Vec<&str> = paths.into_iter().collect();
        self.eager_load
            .iter()
            .filter(|hint| {
                used.iter().any(|p| {
                    *p == hint.path
                        || p.strip_prefix(hint.path.as_str())
                            .is_some_and(|rest| rest.starts_with(PATH_SEPARATOR))
                })
            })
            .cloned()
            .collect()
    }
}

/// Forward to-one relations join inline; everything many-valued or
/// reverse is batch-fetched.
pub fn fetch_strategy(kind: RelationKind) -> FetchStrategy {
    match kind {
        RelationKind::ToOneForward => FetchStrategy::Inline,
        _ => FetchStrategy::Batch,
    }
}
