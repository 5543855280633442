//! The published schema artifact.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::contribution::ContributionResolver;
use super::sdl::render_sdl;
use crate::config::CompilerConfig;
use crate::error::SchemaError;
use crate::filters::PerformanceAdvisory;
use crate::ledger::PersistedArtifact;
use crate::planner::{EntityPlan, ResolverPlan};
use crate::types::TypeDef;

/// Compiled, versioned output of one assembler run.
///
/// The serializable part is pure data. Resolver plans reference entity
/// plans and contribution resolvers by name through the runtime, which is
/// attached when the artifact is built or restored.
#[derive(Clone, Serialize, Deserialize)]
pub struct SchemaArtifact {
    pub name: String,
    pub version: u64,
    /// SHA-256 (hex) of the rendered SDL.
    pub hash: String,
    /// Every non-root type, sorted by name.
    pub types: Vec<TypeDef>,
    pub query: TypeDef,
    pub mutation: TypeDef,
    pub resolvers: Vec<ResolverPlan>,
    pub entities: Vec<String>,
    #[serde(default)]
    pub advisories: BTreeMap<String, PerformanceAdvisory>,
    #[serde(with = "time::serde::rfc3339")]
    pub built_at: OffsetDateTime,
    #[serde(skip)]
    pub(crate) runtime: Arc<ArtifactRuntime>,
}

/// Execution-time companions of an artifact.
#[derive(Default)]
pub struct ArtifactRuntime {
    pub entities: HashMap<String, EntityPlan>,
    pub contributions: HashMap<String, ContributionResolver>,
    pub config: CompilerConfig,
}

impl ArtifactRuntime {
    pub fn entity(&self, name: &str) -> Option<&EntityPlan> {
        self.entities.get(name)
    }
}

impl fmt::Debug for ArtifactRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut contributions: Vec<&String> = self.contributions.keys().collect();
        contributions.sort();
        f.debug_struct("ArtifactRuntime")
            .field("entities", &self.entities.len())
            .field("contributions", &contributions)
            .finish_non_exhaustive()
    }
}

impl SchemaArtifact {
    pub fn type_def(&self, name: &str) -> Option<&TypeDef> {
        match name {
            "Query" => Some(&self.query),
            "Mutation" => Some(&self.mutation),
            _ => self.types.iter().find(|t| t.name == name),
        }
    }

    pub fn resolver(&self, field_name: &str) -> Option<&ResolverPlan> {
        self.resolvers.iter().find(|r| r.field_name == field_name)
    }

    pub fn runtime(&self) -> &ArtifactRuntime {
        &self.runtime
    }

    pub(crate) fn with_runtime(mut self, runtime: Arc<ArtifactRuntime>) -> Self {
        self.runtime = runtime;
        self
    }

    /// Whether every generated entity has an execution plan attached.
    pub fn is_executable(&self) -> bool {
        self.entities
            .iter()
            .all(|e| self.runtime.entities.contains_key(e))
    }

    /// Deterministic SDL text of the artifact.
    pub fn sdl(&self) -> String {
        render_sdl(self)
    }

    /// Snapshot stored in the version ledger.
    ///
    /// # Errors
    ///
    /// Returns `SchemaError::Internal` if the artifact cannot be serialized.
    pub fn persisted(&self) -> Result<PersistedArtifact, SchemaError> {
        let artifact = serde_json::to_value(self)
            .map_err(|e| SchemaError::internal(format!("serialize artifact: {e}")))?;
        Ok(PersistedArtifact {
            sdl: self.sdl(),
            hash: self.hash.clone(),
            artifact,
        })
    }

    /// Restores an artifact from a ledger snapshot. The runtime is empty
    /// until one is attached.
    ///
    /// # Errors
    ///
    /// Returns `SchemaError::Internal` if the snapshot does not deserialize.
    pub fn from_persisted(snapshot: &PersistedArtifact) -> Result<Self, SchemaError> {
        serde_json::from_value(snapshot.artifact.clone())
            .map_err(|e| SchemaError::internal(format!("restore artifact: {e}")))
    }
}

impl fmt::Debug for SchemaArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaArtifact")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("hash", &self.hash)
            .field("types", &self.types.len())
            .field("entities", &self.entities)
            .finish_non_exhaustive()
    }
}
