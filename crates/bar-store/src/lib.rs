//! Canonical ordered bar storage.
//!
//! Append-only sequences of OHLCV bars keyed by (exchange, symbol, interval).
//! Timestamps are strictly increasing per key; duplicates are rejected, gaps
//! are allowed and left as gaps. An optional JSONL file per key mirrors the
//! in-memory sequence so a restart can replay history.

use std::collections::HashMap;
use std::fs::{create_dir_all, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use common::{Bar, Error, Result};
use serde::Deserialize;
use tracing::{debug, warn};

/// Storage key: one ordered sequence per (exchange, symbol, interval).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BarKey {
    pub exchange: String,
    pub symbol: String,
    pub interval: String,
}

impl BarKey {
    pub fn new(exchange: &str, symbol: &str, interval: &str) -> Self {
        Self {
            exchange: exchange.to_string(),
            symbol: symbol.to_string(),
            interval: interval.to_string(),
        }
    }

    fn file_stem(&self) -> String {
        format!("{}-{}-{}", self.exchange, self.symbol, self.interval)
    }
}

/// Row shape accepted from ingestors (CSV bootstrap).
#[derive(Debug, Deserialize)]
struct CsvBarRow {
    ts_ms: i64,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
}

/// In-memory bar store with optional JSONL persistence.
pub struct BarStore {
    series: HashMap<BarKey, Vec<Bar>>,
    /// When set, every append is mirrored to `<dir>/<key>.jsonl`.
    persist_dir: Option<PathBuf>,
}

impl BarStore {
    pub fn new() -> Self {
        Self {
            series: HashMap::new(),
            persist_dir: None,
        }
    }

    /// Create a store that mirrors appends to JSONL files under `dir` and
    /// replays any existing files.
    pub fn with_persistence(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        create_dir_all(&dir)?;
        let mut store = Self {
            series: HashMap::new(),
            persist_dir: Some(dir.clone()),
        };
        store.replay(&dir)?;
        Ok(store)
    }

    fn replay(&mut self, dir: &Path) -> Result<()> {
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().map_or(true, |e| e != "jsonl") {
                continue;
            }
            let reader = BufReader::new(File::open(&path)?);
            let mut replayed = 0usize;
            for line in reader.lines() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<Bar>(&line) {
                    Ok(bar) => {
                        let key = BarKey::new(&bar.exchange, &bar.symbol, &bar.interval);
                        // Replay bypasses persistence; the row is already on disk.
                        if self.append_in_memory(&key, bar).is_ok() {
                            replayed += 1;
                        }
                    }
                    Err(e) => {
                        warn!("skipping malformed bar row in {}: {}", path.display(), e);
                    }
                }
            }
            debug!("replayed {} bars from {}", replayed, path.display());
        }
        Ok(())
    }

    fn append_in_memory(&mut self, key: &BarKey, bar: Bar) -> Result<()> {
        let seq = self.series.entry(key.clone()).or_default();
        if let Some(last) = seq.last() {
            if bar.ts_ms == last.ts_ms {
                return Err(Error::Data(format!(
                    "duplicate bar for {}/{}/{} at ts={}",
                    key.exchange, key.symbol, key.interval, bar.ts_ms
                )));
            }
            if bar.ts_ms < last.ts_ms {
                return Err(Error::Data(format!(
                    "out-of-order bar for {}/{}/{}: ts={} < last={}",
                    key.exchange, key.symbol, key.interval, bar.ts_ms, last.ts_ms
                )));
            }
        }
        seq.push(bar);
        Ok(())
    }

    /// Append one bar. Rejects duplicate and out-of-order timestamps.
    pub fn append(&mut self, bar: Bar) -> Result<()> {
        let key = BarKey::new(&bar.exchange, &bar.symbol, &bar.interval);
        let line = match &self.persist_dir {
            Some(_) => Some(serde_json::to_string(&bar)?),
            None => None,
        };
        self.append_in_memory(&key, bar)?;

        if let (Some(dir), Some(line)) = (&self.persist_dir, line) {
            let path = dir.join(format!("{}.jsonl", key.file_stem()));
            let mut file = OpenOptions::new().create(true).append(true).open(path)?;
            writeln!(file, "{}", line)?;
        }
        Ok(())
    }

    /// Append a batch, skipping rows that are already stored.
    ///
    /// Returns the number of bars actually appended.
    pub fn append_batch(&mut self, bars: Vec<Bar>) -> usize {
        let mut appended = 0usize;
        for bar in bars {
            match self.append(bar) {
                Ok(()) => appended += 1,
                Err(e) => debug!("bar skipped: {}", e),
            }
        }
        appended
    }

    /// Load an ordered window of bars.
    ///
    /// A missing series or empty window returns an empty Vec, not an error;
    /// callers check length before feature computation.
    pub fn load(
        &self,
        key: &BarKey,
        from_ms: Option<i64>,
        to_ms: Option<i64>,
        limit: Option<usize>,
    ) -> Vec<Bar> {
        let Some(seq) = self.series.get(key) else {
            return Vec::new();
        };
        let mut out: Vec<Bar> = seq
            .iter()
            .filter(|b| from_ms.map_or(true, |f| b.ts_ms >= f))
            .filter(|b| to_ms.map_or(true, |t| b.ts_ms <= t))
            .cloned()
            .collect();
        if let Some(limit) = limit {
            // Most recent bars are the useful ones; keep the tail.
            if out.len() > limit {
                out.drain(..out.len() - limit);
            }
        }
        out
    }

    /// Latest bar for a series, if any.
    pub fn latest(&self, key: &BarKey) -> Option<&Bar> {
        self.series.get(key).and_then(|s| s.last())
    }

    pub fn len(&self, key: &BarKey) -> usize {
        self.series.get(key).map_or(0, |s| s.len())
    }

    pub fn is_empty(&self, key: &BarKey) -> bool {
        self.len(key) == 0
    }

    /// Bootstrap a series from a CSV file with header
    /// `ts_ms,open,high,low,close,volume`.
    pub fn ingest_csv(&mut self, key: &BarKey, path: impl AsRef<Path>) -> Result<usize> {
        let mut reader = csv::Reader::from_path(path.as_ref())
            .map_err(|e| Error::Data(format!("csv open failed: {}", e)))?;
        let mut bars = Vec::new();
        for row in reader.deserialize::<CsvBarRow>() {
            let row = row.map_err(|e| Error::Data(format!("malformed csv row: {}", e)))?;
            bars.push(Bar {
                exchange: key.exchange.clone(),
                symbol: key.symbol.clone(),
                interval: key.interval.clone(),
                ts_ms: row.ts_ms,
                open: row.open,
                high: row.high,
                low: row.low,
                close: row.close,
                volume: row.volume,
            });
        }
        Ok(self.append_batch(bars))
    }
}

impl Default for BarStore {
    fn default() -> Self {
        Self::new()
    }
}
