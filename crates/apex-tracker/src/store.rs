//! Persisted table of apex records, upserted by symbol.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::warn;

use common::{ApexRecord, Error, Result};

/// JSON-file-backed record table. Every upsert rewrites the file via a
/// temp file and rename so readers never see a torn write.
#[derive(Debug)]
pub struct ApexStore {
    path: PathBuf,
    records: BTreeMap<String, ApexRecord>,
}

impl ApexStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let records = if path.exists() {
            let raw = fs::read_to_string(&path)?;
            serde_json::from_str::<Vec<ApexRecord>>(&raw)
                .map_err(|e| Error::State(format!("apex table unreadable: {e}")))?
                .into_iter()
                .map(|r| (r.symbol.clone(), r))
                .collect()
        } else {
            BTreeMap::new()
        };
        Ok(Self { path, records })
    }

    pub fn get(&self, symbol: &str) -> Option<&ApexRecord> {
        self.records.get(symbol)
    }

    pub fn upsert(&mut self, record: ApexRecord) -> Result<()> {
        self.records.insert(record.symbol.clone(), record);
        self.save()
    }

    fn save(&self) -> Result<()> {
        let rows: Vec<&ApexRecord> = self.records.values().collect();
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(&rows)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// Upsert that logs instead of failing; tracking must not die on a
/// persistence hiccup.
pub fn upsert_tolerant(store: &mut ApexStore, record: ApexRecord) {
    let symbol = record.symbol.clone();
    if let Err(e) = store.upsert(record) {
        warn!(%symbol, error = %e, "apex record not persisted");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::PositionState;
    use tempfile::TempDir;

    fn record(symbol: &str, apex: f64) -> ApexRecord {
        ApexRecord {
            symbol: symbol.into(),
            apex_price: apex,
            apex_ts_ms: 1,
            drop_start_ts_ms: None,
            status: PositionState::Monitoring,
            last_checked_ms: 1,
        }
    }

    #[test]
    fn upsert_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("apex.json");
        {
            let mut store = ApexStore::open(&path).unwrap();
            store.upsert(record("BTC", 102.0)).unwrap();
            store.upsert(record("ETH", 55.0)).unwrap();
            store.upsert(record("BTC", 104.0)).unwrap();
        }
        let store = ApexStore::open(&path).unwrap();
        assert_eq!(store.get("BTC").unwrap().apex_price, 104.0);
        assert_eq!(store.get("ETH").unwrap().apex_price, 55.0);
        assert!(store.get("SOL").is_none());
    }
}
