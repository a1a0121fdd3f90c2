use std::collections::HashMap;
use std::path::{Path, PathBuf};

use bluefusion_types::Address;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum BondStoreError {
    #[error("I/O error persisting bond store: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to serialize bond store: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("could not resolve a home directory for the default bond store path")]
    NoHomeDir,
}

/// A redacted bond record. Long-term keys (LTK/IRK/CSRK/XOR) never reach
/// this struct; persisting them is explicitly out of scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BondRecord {
    pub security_level: u8,
    pub authenticated: bool,
}

/// JSON-backed `address -> BondRecord` map, atomically replaced on write
/// and best-effort loaded.
pub struct BondStore {
    path: PathBuf,
    records: HashMap<Address, BondRecord>,
}

impl BondStore {
    /// `<home>/.bluefusion/bonds.json`.
    pub fn default_path() -> Result<PathBuf, BondStoreError> {
        let home = dirs::home_dir().ok_or(BondStoreError::NoHomeDir)?;
        Ok(home.join(".bluefusion").join("bonds.json"))
    }

    /// Load from `path`, falling back to an empty store (and logging a
    /// warning) if the file is missing or corrupt.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let records = match std::fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(records) => records,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "bond store file is corrupt, starting empty");
                    HashMap::new()
                }
            },
            Err(_) => HashMap::new(),
        };
        BondStore { path, records }
    }

    pub fn get(&self, address: &Address) -> Option<&BondRecord> {
        self.records.get(address)
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.records.contains_key(address)
    }

    /// All bonded addresses and their records, for the `bonds list` CLI.
    pub fn iter(&self) -> impl Iterator<Item = (&Address, &BondRecord)> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Removes every bond and persists the now-empty store, for `bonds clear`.
    pub fn clear(&mut self) -> Result<(), BondStoreError> {
        self.records.clear();
        self.persist()
    }

    /// Insert or replace a bond record and persist immediately.
    pub fn insert(&mut self, address: Address, record: BondRecord) -> Result<(), BondStoreError> {
        self.records.insert(address, record);
        self.persist()
    }

    pub fn remove(&mut self, address: &Address) -> Result<(), BondStoreError> {
        self.records.remove(address);
        self.persist()
    }

    /// True iff the stored security level is at least `min_security_level`.
    pub fn meets_requirement(&self, address: &Address, min_security_level: u8) -> bool {
        self.records.get(address).map(|r| r.security_level >= min_security_level).unwrap_or(false)
    }

    fn persist(&self) -> Result<(), BondStoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.records)?;
        let tmp_path = self.path.with_extension("json.tmp");
        std::fs::write(&tmp_path, json)?;
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> Address {
        "AA:BB:CC:DD:EE:01".parse().unwrap()
    }

    #[test]
    fn round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bonds.json");

        let mut store = BondStore::load(&path);
        store.insert(addr(), BondRecord { security_level: 2, authenticated: true }).unwrap();

        let reloaded = BondStore::load(&path);
        assert_eq!(reloaded.get(&addr()), Some(&BondRecord { security_level: 2, authenticated: true }));
    }

    #[test]
    fn corrupt_file_loads_as_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bonds.json");
        std::fs::write(&path, "{not valid json").unwrap();

        let store = BondStore::load(&path);
        assert!(!store.contains(&addr()));
    }

    #[test]
    fn meets_requirement_checks_stored_level() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bonds.json");
        let mut store = BondStore::load(&path);
        store.insert(addr(), BondRecord { security_level: 2, authenticated: true }).unwrap();

        assert!(store.meets_requirement(&addr(), 2));
        assert!(!store.meets_requirement(&addr(), 3));
    }
}
