//! Append-only journal of decisions and position lifecycle events.
//!
//! One JSONL file per UTC day; writes are tolerant (a failed append is
//! logged, never fatal). The only read path is `metrics`, which folds
//! the journalled events into aggregate selection quality numbers.

use std::fs::{create_dir_all, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use common::{Decision, Position, Result};

fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionEvent {
    Opened,
    Closed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JournalEvent {
    Decision {
        at: String,
        decision: Decision,
    },
    Position {
        at: String,
        kind: PositionEvent,
        position: Position,
        /// Realised profit on close, in quote currency.
        #[serde(skip_serializing_if = "Option::is_none")]
        pnl: Option<f64>,
    },
    /// Process lifecycle markers: bot_start, heartbeat, shutdown.
    Lifecycle {
        at: String,
        note: String,
    },
}

impl JournalEvent {
    fn at(&self) -> &str {
        match self {
            JournalEvent::Decision { at, .. }
            | JournalEvent::Position { at, .. }
            | JournalEvent::Lifecycle { at, .. } => at,
        }
    }
}

/// Aggregates over a recent window of journalled events.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SelectionMetrics {
    pub decisions: usize,
    pub positions_closed: usize,
    /// Closed positions with positive realised pnl over all closed.
    pub win_rate: f64,
    pub mean_confidence: f64,
    /// Decision counts by risk score bucket: low < 0.33 ≤ medium < 0.66
    /// ≤ high.
    pub risk_low: usize,
    pub risk_medium: usize,
    pub risk_high: usize,
}

pub struct SelectionJournal {
    dir: PathBuf,
    day_key: String,
    file: File,
}

impl SelectionJournal {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        create_dir_all(&dir)?;
        let day_key = Utc::now().format("%Y-%m-%d").to_string();
        let file = Self::open_day_file(&dir, &day_key)?;
        Ok(Self { dir, day_key, file })
    }

    fn open_day_file(dir: &Path, day_key: &str) -> std::io::Result<File> {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(format!("selections-{day_key}.jsonl")))
    }

    fn rotate_if_needed(&mut self) -> std::io::Result<()> {
        let today = Utc::now().format("%Y-%m-%d").to_string();
        if today != self.day_key {
            self.file = Self::open_day_file(&self.dir, &today)?;
            self.day_key = today;
        }
        Ok(())
    }

    fn write_event(&mut self, event: &JournalEvent) {
        let result = (|| -> std::io::Result<()> {
            self.rotate_if_needed()?;
            let line = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
            writeln!(self.file, "{line}")?;
            self.file.flush()?;
            Ok(())
        })();
        if let Err(e) = result {
            warn!(error = %e, "journal write failed");
        }
    }

    pub fn record_decision(&mut self, decision: &Decision) {
        self.write_event(&JournalEvent::Decision {
            at: now_iso(),
            decision: decision.clone(),
        });
    }

    pub fn record_position(&mut self, kind: PositionEvent, position: &Position, pnl: Option<f64>) {
        self.write_event(&JournalEvent::Position {
            at: now_iso(),
            kind,
            position: position.clone(),
            pnl,
        });
    }

    pub fn record_lifecycle(&mut self, note: &str) {
        self.write_event(&JournalEvent::Lifecycle {
            at: now_iso(),
            note: note.to_string(),
        });
    }

    /// Fold all journal files into aggregates for events newer than
    /// `window`. Unreadable lines are skipped.
    pub fn metrics(&self, window: Duration) -> Result<SelectionMetrics> {
        let cutoff = Utc::now() - window;
        let mut out = SelectionMetrics::default();
        let mut confidence_sum = 0.0;
        let mut wins = 0usize;

        let mut entries: Vec<PathBuf> = std::fs::read_dir(&self.dir)?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "jsonl"))
            .collect();
        entries.sort();

        for path in entries {
            let reader = BufReader::new(File::open(&path)?);
            for line in reader.lines() {
                let Ok(line) = line else { continue };
                let Ok(event) = serde_json::from_str::<JournalEvent>(&line) else {
                    continue;
                };
                let Ok(at) = event.at().parse::<DateTime<Utc>>() else {
                    continue;
                };
                if at < cutoff {
                    continue;
                }
                match event {
                    JournalEvent::Decision { decision, .. } => {
                        out.decisions += 1;
                        confidence_sum += decision.confidence;
                        if decision.risk_score < 0.33 {
                            out.risk_low += 1;
                        } else if decision.risk_score < 0.66 {
                            out.risk_medium += 1;
                        } else {
                            out.risk_high += 1;
                        }
                    }
                    JournalEvent::Position {
                        kind: PositionEvent::Closed,
                        pnl,
                        ..
                    } => {
                        out.positions_closed += 1;
                        if pnl.unwrap_or(0.0) > 0.0 {
                            wins += 1;
                        }
                    }
                    _ => {}
                }
            }
        }

        if out.decisions > 0 {
            out.mean_confidence = confidence_sum / out.decisions as f64;
        }
        if out.positions_closed > 0 {
            out.win_rate = wins as f64 / out.positions_closed as f64;
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{Action, Regime};
    use tempfile::TempDir;

    fn decision(confidence: f64, risk_score: f64) -> Decision {
        Decision {
            symbol: "BTC".into(),
            ts_ms: 0,
            action: Action::Buy,
            confidence,
            composite_score: 0.5,
            risk_score,
            reasoning: vec!["test".into()],
            regime: Regime::Sideways,
        }
    }

    #[test]
    fn metrics_aggregate_recent_events() {
        let dir = TempDir::new().unwrap();
        let mut journal = SelectionJournal::open(dir.path()).unwrap();

        journal.record_decision(&decision(0.8, 0.1));
        journal.record_decision(&decision(0.6, 0.5));
        journal.record_decision(&decision(0.4, 0.9));

        let pos = Position::open("BTC", 0, 100.0, 1.0);
        journal.record_position(PositionEvent::Opened, &pos, None);
        journal.record_position(PositionEvent::Closed, &pos, Some(12.0));
        journal.record_position(PositionEvent::Closed, &pos, Some(-5.0));

        let m = journal.metrics(Duration::hours(1)).unwrap();
        assert_eq!(m.decisions, 3);
        assert_eq!(m.positions_closed, 2);
        assert!((m.win_rate - 0.5).abs() < 1e-12);
        assert!((m.mean_confidence - 0.6).abs() < 1e-12);
        assert_eq!((m.risk_low, m.risk_medium, m.risk_high), (1, 1, 1));
    }

    #[test]
    fn window_excludes_old_events() {
        let dir = TempDir::new().unwrap();
        let mut journal = SelectionJournal::open(dir.path()).unwrap();
        journal.record_decision(&decision(0.8, 0.1));

        std::thread::sleep(std::time::Duration::from_millis(20));
        let m = journal.metrics(Duration::zero()).unwrap();
        assert_eq!(m.decisions, 0);
    }

    #[test]
    fn corrupt_lines_are_skipped() {
        let dir = TempDir::new().unwrap();
        let mut journal = SelectionJournal::open(dir.path()).unwrap();
        journal.record_decision(&decision(0.7, 0.2));
        journal.record_lifecycle("bot_start");

        let day = Utc::now().format("%Y-%m-%d").to_string();
        let path = dir.path().join(format!("selections-{day}.jsonl"));
        let mut file = OpenOptions::new().append(true).open(path).unwrap();
        writeln!(file, "not json at all").unwrap();

        let m = journal.metrics(Duration::hours(1)).unwrap();
        assert_eq!(m.decisions, 1);
    }
}
