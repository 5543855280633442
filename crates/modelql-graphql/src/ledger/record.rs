//! Version records.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;

/// Snapshot of a published artifact, kept for rollback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedArtifact {
    pub sdl: String,
    pub hash: String,
    /// Serialized schema artifact.
    pub artifact: Value,
}

/// One entry of the version ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionRecord {
    pub version: String,
    #[serde(default)]
    pub description: String,
    pub schema_hash: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(default)]
    pub created_by: String,
    #[serde(default)]
    pub migration_files: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback_instructions: Option<String>,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<PersistedArtifact>,
}

impl VersionRecord {
    pub fn new(version: impl Into<String>, schema_hash: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            description: String::new(),
            schema_hash: schema_hash.into(),
            created_at: OffsetDateTime::now_utc(),
            created_by: String::new(),
            migration_files: Vec::new(),
            rollback_instructions: None,
            is_active: false,
            metadata: Map::new(),
            artifact: None,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn created_by(mut self, who: impl Into<String>) -> Self {
        self.created_by = who.into();
        self
    }

    pub fn migration_file(mut self, file: impl Into<String>) -> Self {
        self.migration_files.push(file.into());
        self
    }

    pub fn rollback_instructions(mut self, text: impl Into<String>) -> Self {
        self.rollback_instructions = Some(text.into());
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn with_artifact(mut self, artifact: PersistedArtifact) -> Self {
        self.artifact = Some(artifact);
        self
    }

    pub fn created_at(mut self, at: OffsetDateTime) -> Self {
        self.created_at = at;
        self
    }
}

/// One metadata key that differs between two versions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataChange {
    pub key: String,
    pub before: Option<Value>,
    pub after: Option<Value>,
}

/// Result of comparing two versions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionComparison {
    pub from: String,
    pub to: String,
    pub same_hash: bool,
    pub metadata_changes: Vec<MetadataChange>,
}

impl VersionComparison {
    pub fn is_unchanged(&self) -> bool {
        self.same_hash && self.metadata_changes.is_empty()
    }
}

pub(crate) fn diff_metadata(before: &Map<String, Value>, after: &Map<String, Value>) -> Vec<MetadataChange> {
    let mut keys: Vec<&String> = before.keys().chain(after.keys()).collect();
    keys.sort();
    keys.dedup();
    keys.into_iter()
        .filter_map(|key| {
            let (b, a) = (before.get(key), after.get(key));
            (b != a).then(|| MetadataChange {
                key: key.clone(),
                before: b.cloned(),
                after: a.cloned(),
            })
        })
        .collect()
}
