//! Version ledger.
//!
//! Append-only history of published schema versions. Every mutation is
//! applied to a copy of the records, persisted through the
//! [`LedgerStore`], and only then swapped in, so a failed mutation leaves
//! both memory and storage unchanged.

mod record;
mod store;

use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info};

pub use record::{MetadataChange, PersistedArtifact, VersionComparison, VersionRecord};
pub use store::{FileLedgerStore, LedgerStore, MemoryLedgerStore};

use record::diff_metadata;

/// Errors raised by ledger operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("Version {0} already exists")]
    DuplicateVersion(String),

    #[error("Version {0} not found")]
    NotFound(String),

    #[error("Version {0} is active and cannot be deleted")]
    ActiveVersion(String),

    #[error("Version {0} has no persisted artifact")]
    NoArtifact(String),

    #[error("Ledger I/O error: {0}")]
    Io(String),

    #[error("Ledger serialization error: {0}")]
    Serialization(String),
}

impl LedgerError {
    /// Whether the operation was refused rather than failed.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::DuplicateVersion(_) | Self::NotFound(_) | Self::ActiveVersion(_) | Self::NoArtifact(_)
        )
    }
}

impl From<std::io::Error> for LedgerError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;

pub struct VersionLedger {
    store: Arc<dyn LedgerStore>,
    records: Mutex<Vec<VersionRecord>>,
}

impl std::fmt::Debug for VersionLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VersionLedger").finish_non_exhaustive()
    }
}

impl VersionLedger {
    /// Opens a ledger over `store`, loading existing records.
    ///
    /// # Errors
    ///
    /// Returns the store's load error.
    pub fn open(store: Arc<dyn LedgerStore>) -> Result<Self> {
        let records = store.load()?;
        debug!(records = records.len(), "Version ledger opened");
        Ok(Self {
            store,
            records: Mutex::new(records),
        })
    }

    /// Empty ledger kept in memory.
    pub fn in_memory() -> Self {
        Self {
            store: Arc::new(MemoryLedgerStore::new()),
            records: Mutex::new(Vec::new()),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Vec<VersionRecord>>> {
        self.records
            .lock()
            .map_err(|_| LedgerError::Io("ledger lock poisoned".into()))
    }

    fn mutate<T>(&self, apply: impl FnOnce(&mut Vec<VersionRecord>) -> Result<T>) -> Result<T> {
        let mut guard = self.lock()?;
        let mut next = guard.clone();
        let out = apply(&mut next)?;
        self.store.save(&next)?;
        *guard = next;
        Ok(out)
    }

    /// Appends a record. An active record deactivates all others.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::DuplicateVersion` if the id is taken.
    pub fn create(&self, record: VersionRecord) -> Result<()> {
        let version = record.version.clone();
        self.mutate(|records| {
            if records.iter().any(|r| r.version == record.version) {
                return Err(LedgerError::DuplicateVersion(record.version));
            }
            if record.is_active {
                records.iter_mut().for_each(|r| r.is_active = false);
            }
            records.push(record);
            Ok(())
        })?;
        info!(version = %version, "Schema version recorded");
        Ok(())
    }

    /// Makes `version` the only active record.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::NotFound` if no such record exists.
    pub fn activate(&self, version: &str) -> Result<()> {
        self.mutate(|records| {
            if !records.iter().any(|r| r.version == version) {
                return Err(LedgerError::NotFound(version.to_string()));
            }
            for r in records.iter_mut() {
                r.is_active = r.version == version;
            }
            Ok(())
        })?;
        info!(version = %version, "Schema version activated");
        Ok(())
    }

    /// Deletes an inactive record.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::NotFound` or `LedgerError::ActiveVersion`.
    pub fn delete(&self, version: &str) -> Result<()> {
        self.mutate(|records| {
            let index = records
                .iter()
                .position(|r| r.version == version)
                .ok_or_else(|| LedgerError::NotFound(version.to_string()))?;
            if records[index].is_active {
                return Err(LedgerError::ActiveVersion(version.to_string()));
            }
            records.remove(index);
            Ok(())
        })
    }

    /// Compares two versions by schema hash and metadata.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::NotFound` if either version is missing.
    pub fn compare(&self, from: &str, to: &str) -> Result<VersionComparison> {
        let records = self.lock()?;
        let find = |v: &str| {
            records
                .iter()
                .find(|r| r.version == v)
                .ok_or_else(|| LedgerError::NotFound(v.to_string()))
        };
        let (a, b) = (find(from)?, find(to)?);
        Ok(VersionComparison {
            from: from.to_string(),
            to: to.to_string(),
            same_hash: a.schema_hash == b.schema_hash,
            metadata_changes: diff_metadata(&a.metadata, &b.metadata),
        })
    }

    /// Reactivates `version` and returns it with its persisted artifact.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::NotFound`, or `LedgerError::NoArtifact` if the
    /// record carries no artifact snapshot.
    pub fn rollback(&self, version: &str) -> Result<VersionRecord> {
        let record = self.mutate(|records| {
            let target = records
                .iter()
                .find(|r| r.version == version)
                .ok_or_else(|| LedgerError::NotFound(version.to_string()))?;
            if target.artifact.is_none() {
                return Err(LedgerError::NoArtifact(version.to_string()));
            }
            for r in records.iter_mut() {
                r.is_active = r.version == version;
            }
            records
                .iter()
                .find(|r| r.version == version)
                .cloned()
                .ok_or_else(|| LedgerError::NotFound(version.to_string()))
        })?;
        info!(version = %version, "Schema version rolled back");
        Ok(record)
    }

    pub fn get(&self, version: &str) -> Result<Option<VersionRecord>> {
        Ok(self.lock()?.iter().find(|r| r.version == version).cloned())
    }

    /// Records in insertion order.
    pub fn list(&self) -> Result<Vec<VersionRecord>> {
        Ok(self.lock()?.clone())
    }

    /// Records ordered by creation time, oldest first.
    pub fn history(&self) -> Result<Vec<VersionRecord>> {
        let mut records = self.list()?;
        records.sort_by_key(|r| r.created_at);
        Ok(records)
    }

    pub fn active(&self) -> Result<Option<VersionRecord>> {
        Ok(self.lock()?.iter().find(|r| r.is_active).cloned())
    }

    /// Highest `v<N>` version number recorded, or 0.
    pub fn latest_build_number(&self) -> Result<u64> {
        Ok(self
            .lock()?
            .iter()
            .filter_map(|r| r.version.strip_prefix('v')?.parse::<u64>().ok())
            .max()
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use time::{Duration, OffsetDateTime};

    use super::*;

    fn artifact(hash: &str) -> PersistedArtifact {
        PersistedArtifact {
            sdl: "type Query { _noop: Boolean }".into(),
            hash: hash.into(),
            artifact: json!({}),
        }
    }

    #[test]
    fn test_create_rejects_duplicate_without_side_effects() {
        let ledger = VersionLedger::in_memory();
        ledger.create(VersionRecord::new("v1", "h1")).unwrap();
        let err = ledger.create(VersionRecord::new("v1", "other")).unwrap_err();
        assert_eq!(err, LedgerError::DuplicateVersion("v1".into()));
        assert!(err.is_rejection());
        let records = ledger.list().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].schema_hash, "h1");
    }

    #[test]
    fn test_activate_leaves_exactly_one_active() {
        let ledger = VersionLedger::in_memory();
        for v in ["v1", "v2", "v3"] {
            ledger.create(VersionRecord::new(v, "h")).unwrap();
        }
        ledger.activate("v1").unwrap();
        ledger.activate("v2").unwrap();
        let active: Vec<String> = ledger
            .list()
            .unwrap()
            .into_iter()
            .filter(|r| r.is_active)
            .map(|r| r.version)
            .collect();
        assert_eq!(active, vec!["v2".to_string()]);

        assert_eq!(
            ledger.activate("v9").unwrap_err(),
            LedgerError::NotFound("v9".into())
        );
        assert_eq!(ledger.active().unwrap().unwrap().version, "v2");
    }

    #[test]
    fn test_delete_active_rejected() {
        let ledger = VersionLedger::in_memory();
        ledger.create(VersionRecord::new("v1", "h")).unwrap();
        ledger.create(VersionRecord::new("v2", "h")).unwrap();
        ledger.activate("v2").unwrap();
        assert_eq!(
            ledger.delete("v2").unwrap_err(),
            LedgerError::ActiveVersion("v2".into())
        );
        ledger.delete("v1").unwrap();
        assert_eq!(ledger.list().unwrap().len(), 1);
    }

    #[test]
    fn test_compare() {
        let ledger = VersionLedger::in_memory();
        ledger
            .create(VersionRecord::new("v1", "h1").metadata("entities", json!(4)))
            .unwrap();
        ledger
            .create(VersionRecord::new("v2", "h2").metadata("entities", json!(5)))
            .unwrap();
        assert!(ledger.compare("v1", "v1").unwrap().is_unchanged());
        let diff = ledger.compare("v1", "v2").unwrap();
        assert!(!diff.same_hash);
        assert_eq!(diff.metadata_changes.len(), 1);
    }

    #[test]
    fn test_rollback_requires_artifact() {
        let ledger = VersionLedger::in_memory();
        ledger.create(VersionRecord::new("v1", "h1")).unwrap();
        ledger
            .create(VersionRecord::new("v2", "h2").with_artifact(artifact("h2")))
            .unwrap();
        ledger.activate("v1").unwrap();

        assert_eq!(
            ledger.rollback("v1").unwrap_err(),
            LedgerError::NoArtifact("v1".into())
        );
        let record = ledger.rollback("v2").unwrap();
        assert!(record.is_active);
        assert_eq!(record.artifact.unwrap().hash, "h2");
        assert_eq!(ledger.active().unwrap().unwrap().version, "v2");
    }

    #[test]
    fn test_history_orders_by_creation() {
        let ledger = VersionLedger::in_memory();
        let now = OffsetDateTime::now_utc();
        ledger
            .create(VersionRecord::new("v2", "h").created_at(now))
            .unwrap();
        ledger
            .create(VersionRecord::new("v1", "h").created_at(now - Duration::hours(1)))
            .unwrap();
        let history: Vec<String> = ledger
            .history()
            .unwrap()
            .into_iter()
            .map(|r| r.version)
            .collect();
        assert_eq!(history, vec!["v1".to_string(), "v2".to_string()]);
        assert_eq!(ledger.latest_build_number().unwrap(), 2);
    }

    struct FailingStore;

    impl LedgerStore for FailingStore {
        fn load(&self) -> Result<Vec<VersionRecord>> {
            Ok(Vec::new())
        }

        fn save(&self, _records: &[VersionRecord]) -> Result<()> {
            Err(LedgerError::Io("disk full".into()))
        }
    }

    #[test]
    fn test_failed_save_changes_nothing() {
        let ledger = VersionLedger::open(Arc::new(FailingStore)).unwrap();
        assert!(ledger.create(VersionRecord::new("v1", "h")).is_err());
        assert!(ledger.list().unwrap().is_empty());
    }

    #[test]
    fn test_file_ledger_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        {
            let ledger = VersionLedger::open(Arc::new(FileLedgerStore::new(&path))).unwrap();
            ledger.create(VersionRecord::new("v1", "h1")).unwrap();
            ledger.activate("v1").unwrap();
        }
        let reopened = VersionLedger::open(Arc::new(FileLedgerStore::new(&path))).unwrap();
        assert_eq!(reopened.active().unwrap().unwrap().version, "v1");
    }
}
