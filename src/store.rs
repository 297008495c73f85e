// Tally - Tariff-aware utility metering engine
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Durable snapshot storage
//!
//! The engine only defines the seam: snapshots are read once at startup
//! and written after every state-affecting operation, keyed by the
//! meter's unique identity. [`JsonFileStore`] keeps one JSON file per
//! meter; [`MemoryStore`] backs tests and embedding hosts that persist
//! elsewhere. Legacy-shaped records are accepted on the read path only.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{MeterError, Result};
use crate::snapshot::{MeterSnapshot, StoredSnapshot};

/// Storage seam for durable meter snapshots.
pub trait SnapshotStore {
    /// Load the stored record for a meter, if any.
    fn load(&self, meter_id: &str) -> Option<StoredSnapshot>;

    /// Persist the current snapshot for a meter.
    fn save(&mut self, meter_id: &str, snapshot: &MeterSnapshot) -> Result<()>;
}

/// One JSON file per meter under a base directory.
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    /// Open (and create if needed) a store rooted at `dir`.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|err| MeterError::Store(err.to_string()))?;
        Ok(Self { dir })
    }

    fn path_for(&self, meter_id: &str) -> PathBuf {
        self.dir.join(format!("{meter_id}.json"))
    }
}

impl SnapshotStore for JsonFileStore {
    fn load(&self, meter_id: &str) -> Option<StoredSnapshot> {
        let raw = fs::read_to_string(self.path_for(meter_id)).ok()?;
        StoredSnapshot::decode(&raw)
    }

    fn save(&mut self, meter_id: &str, snapshot: &MeterSnapshot) -> Result<()> {
        let json = snapshot
            .to_json()
            .map_err(|err| MeterError::Store(err.to_string()))?;
        fs::write(self.path_for(meter_id), json).map_err(|err| MeterError::Store(err.to_string()))
    }
}

/// In-memory store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: HashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a raw record, e.g. a legacy-shaped one.
    pub fn seed(&mut self, meter_id: impl Into<String>, raw: impl Into<String>) {
        self.records.insert(meter_id.into(), raw.into());
    }
}

impl SnapshotStore for MemoryStore {
    fn load(&self, meter_id: &str) -> Option<StoredSnapshot> {
        self.records
            .get(meter_id)
            .and_then(|raw| StoredSnapshot::decode(raw))
    }

    fn save(&mut self, meter_id: &str, snapshot: &MeterSnapshot) -> Result<()> {
        let json = snapshot
            .to_json()
            .map_err(|err| MeterError::Store(err.to_string()))?;
        self.records.insert(meter_id.to_string(), json);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::MeterStatus;
    use chrono::TimeZone;
    use chrono::Utc;

    fn snapshot() -> MeterSnapshot {
        MeterSnapshot {
            native_value: Some("5.5".parse().unwrap()),
            unit: Some("kWh".to_string()),
            last_period: "1".parse().unwrap(),
            last_value: None,
            last_reset: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            status: MeterStatus::Paused,
        }
    }

    #[test]
    fn test_memory_store_roundtrip() {
        let mut store = MemoryStore::new();
        assert!(store.load("house").is_none());
        store.save("house", &snapshot()).unwrap();
        match store.load("house") {
            Some(StoredSnapshot::Preferred(restored)) => assert_eq!(restored, snapshot()),
            other => panic!("expected preferred record, got {other:?}"),
        }
    }

    #[test]
    fn test_memory_store_seeded_legacy() {
        let mut store = MemoryStore::new();
        store.seed("house", r#"{"state": "3", "attributes": {}}"#);
        assert!(matches!(
            store.load("house"),
            Some(StoredSnapshot::Legacy(_))
        ));
    }

    #[test]
    fn test_file_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = JsonFileStore::open(dir.path()).unwrap();
        assert!(store.load("house_peak").is_none());
        store.save("house_peak", &snapshot()).unwrap();
        match store.load("house_peak") {
            Some(StoredSnapshot::Preferred(restored)) => assert_eq!(restored, snapshot()),
            other => panic!("expected preferred record, got {other:?}"),
        }
        // Unrelated meters stay independent.
        assert!(store.load("house_offpeak").is_none());
    }

    #[test]
    fn test_file_store_corrupt_record_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = JsonFileStore::open(dir.path()).unwrap();
        store.save("house", &snapshot()).unwrap();
        fs::write(dir.path().join("house.json"), "{{{{").unwrap();
        assert!(store.load("house").is_none());
    }
}
