//! Schema compiler configuration.
//!
//! Configuration can be specified in a TOML file under the `[compiler]`
//! section and deserialized into [`CompilerConfig`].
//!
//! # Example Configuration
//!
//! ```toml
//! [compiler]
//! max_filter_depth = 2
//! default_per_page = 20
//! max_per_page = 100
//! introspection = true
//! ```

use std::hash::{DefaultHasher, Hash, Hasher};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Hard ceiling on relationship hops for filters and nested inputs.
///
/// Caller-supplied depths are clamped to this value.
pub const ABSOLUTE_MAX_DEPTH: usize = 4;

/// Schema compiler configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompilerConfig {
    /// Maximum relationship hops in filter paths and nested inputs.
    /// Default: 2
    #[serde(default = "default_max_filter_depth")]
    pub max_filter_depth: usize,

    /// Page size used when a paginated query does not ask for one.
    /// Default: 20
    #[serde(default = "default_per_page")]
    pub default_per_page: usize,

    /// Upper bound on requested page sizes and list limits.
    /// Default: 100
    #[serde(default = "default_max_per_page")]
    pub max_per_page: usize,

    /// Nested filter count up to which the advisory score stays good.
    /// Default: 10
    #[serde(default = "default_good_nested_filters")]
    pub good_nested_filters: usize,

    /// Observed depth up to which the advisory score stays good.
    /// Default: 2
    #[serde(default = "default_good_max_depth")]
    pub good_max_depth: usize,

    /// Nested filter count up to which the advisory score is moderate.
    /// Default: 25
    #[serde(default = "default_moderate_nested_filters")]
    pub moderate_nested_filters: usize,

    /// Observed depth up to which the advisory score is moderate.
    /// Default: 3
    #[serde(default = "default_moderate_max_depth")]
    pub moderate_max_depth: usize,

    /// Abort rebuilds that take longer than this many milliseconds.
    /// Default: none
    #[serde(default)]
    pub rebuild_timeout_ms: Option<u64>,

    /// Maximum GraphQL query depth enforced by the rendered schema.
    /// Default: 15
    #[serde(default = "default_max_query_depth")]
    pub max_query_depth: usize,

    /// Maximum GraphQL query complexity enforced by the rendered schema.
    /// Default: 500
    #[serde(default = "default_max_query_complexity")]
    pub max_query_complexity: usize,

    /// Enable GraphQL introspection queries.
    /// Default: true
    #[serde(default = "default_introspection")]
    pub introspection: bool,

    /// Version ledger file. Each schema keeps its records in
    /// `<schema>.<file name>` in the same directory. In-memory when unset.
    #[serde(default)]
    pub ledger_path: Option<PathBuf>,
}

fn default_max_filter_depth() -> usize {
    2
}

fn default_per_page() -> usize {
    20
}

fn default_max_per_page() -> usize {
    100
}

fn default_good_nested_filters() -> usize {
    10
}

fn default_good_max_depth() -> usize {
    2
}

fn default_moderate_nested_filters() -> usize {
    25
}

fn default_moderate_max_depth() -> usize {
    3
}

fn default_max_query_depth() -> usize {
    15
}

fn default_max_query_complexity() -> usize {
    500
}

fn default_introspection() -> bool {
    true
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            max_filter_depth: default_max_filter_depth(),
            default_per_page: default_per_page(),
            max_per_page: default_max_per_page(),
            good_nested_filters: default_good_nested_filters(),
            good_max_depth: default_good_max_depth(),
            moderate_nested_filters: default_moderate_nested_filters(),
            moderate_max_depth: default_moderate_max_depth(),
            rebuild_timeout_ms: None,
            max_query_depth: default_max_query_depth(),
            max_query_complexity: default_max_query_complexity(),
            introspection: default_introspection(),
            ledger_path: None,
        }
    }
}

impl CompilerConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration values are invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.default_per_page == 0 {
            return Err("compiler.default_per_page must be > 0".into());
        }
        if self.max_per_page < self.default_per_page {
            return Err("compiler.max_per_page must be >= default_per_page".into());
        }
        if self.good_nested_filters > self.moderate_nested_filters {
            return Err(
                "compiler.good_nested_filters must be <= moderate_nested_filters".into(),
            );
        }
        if self.good_max_depth > self.moderate_max_depth {
            return Err("compiler.good_max_depth must be <= moderate_max_depth".into());
        }
        if self.max_query_depth == 0 {
            return Err("compiler.max_query_depth must be > 0".into());
        }
        if self.max_query_complexity == 0 {
            return Err("compiler.max_query_complexity must be > 0".into());
        }
        if self.rebuild_timeout_ms == Some(0) {
            return Err("compiler.rebuild_timeout_ms must be > 0 when set".into());
        }
        Ok(())
    }

    /// Reads the `[compiler]` section of a TOML document and validates it.
    /// A missing section yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns the parse or validation message.
    pub fn from_toml(source: &str) -> Result<Self, String> {
        #[derive(Deserialize)]
        struct ConfigFile {
            #[serde(default)]
            compiler: CompilerConfig,
        }

        let file: ConfigFile = toml::from_str(source).map_err(|e| e.to_string())?;
        file.compiler.validate()?;
        Ok(file.compiler)
    }

    /// Filter depth after clamping to [`ABSOLUTE_MAX_DEPTH`].
    #[must_use]
    pub fn effective_depth(&self) -> usize {
        self.max_filter_depth.min(ABSOLUTE_MAX_DEPTH)
    }

    /// Stable key over the settings that shape compiled types.
    ///
    /// Runtime-only settings (timeouts, ledger location, query limits) are
    /// excluded so changing them does not invalidate cached types.
    #[must_use]
    pub fn cache_key(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.effective_depth().hash(&mut hasher);
        hasher.finish()
    }
}
