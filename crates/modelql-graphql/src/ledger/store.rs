//! Ledger persistence backends.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::debug;

use super::LedgerError;
use super::record::VersionRecord;

/// Where ledger records live.
///
/// `save` replaces the full record list; a failed save must leave the
/// previously saved list intact.
pub trait LedgerStore: Send + Sync {
    /// Loads every record.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::Io` or `LedgerError::Serialization`.
    fn load(&self) -> Result<Vec<VersionRecord>, LedgerError>;

    /// Replaces the stored records.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::Io` or `LedgerError::Serialization`.
    fn save(&self, records: &[VersionRecord]) -> Result<(), LedgerError>;
}

/// Process-local store.
#[derive(Debug, Default)]
pub struct MemoryLedgerStore {
    records: Mutex<Vec<VersionRecord>>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LedgerStore for MemoryLedgerStore {
    fn load(&self) -> Result<Vec<VersionRecord>, LedgerError> {
        self.records
            .lock()
            .map(|r| r.clone())
            .map_err(|_| LedgerError::Io("ledger store lock poisoned".into()))
    }

    fn save(&self, records: &[VersionRecord]) -> Result<(), LedgerError> {
        let mut guard = self
            .records
            .lock()
            .map_err(|_| LedgerError::Io("ledger store lock poisoned".into()))?;
        *guard = records.to_vec();
        Ok(())
    }
}

/// JSON file store. Writes go to a sibling temp file that is then renamed
/// over the ledger file.
#[derive(Debug, Clone)]
pub struct FileLedgerStore {
    path: PathBuf,
}

impl FileLedgerStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "ledger.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl LedgerStore for FileLedgerStore {
    fn load(&self) -> Result<Vec<VersionRecord>, LedgerError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let text = fs::read_to_string(&self.path)?;
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&text)?)
    }

    fn save(&self, records: &[VersionRecord]) -> Result<(), LedgerError> {
        let json = serde_json::to_vec_pretty(records)?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let temp = self.temp_path();
        {
            let mut file = fs::File::create(&temp)?;
            file.write_all(&json)?;
            file.sync_all()?;
        }
        fs::rename(&temp, &self.path)?;
        debug!(path = %self.path.display(), records = records.len(), "Ledger saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileLedgerStore::new(dir.path().join("nested").join("ledger.json"));
        assert!(store.load().unwrap().is_empty());

        store
            .save(&[VersionRecord::new("v1", "h1"), VersionRecord::new("v2", "h2")])
            .unwrap();
        let loaded = store.load().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[1].schema_hash, "h2");
        assert!(!store.temp_path().exists());
    }

    #[test]
    fn test_corrupt_file_is_serialization_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        fs::write(&path, "{not json").unwrap();
        let err = FileLedgerStore::new(path).load().unwrap_err();
        assert!(matches!(err, LedgerError::Serialization(_)));
    }
}
