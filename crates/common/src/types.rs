//! Domain types shared across the bot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Market data ───────────────────────────────────────────────────────

/// One OHLCV interval for an instrument. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub exchange: String,
    pub symbol: String,
    /// Bar interval, e.g. "1m", "1h", "1d".
    pub interval: String,
    /// Bar open time, Unix milliseconds UTC.
    pub ts_ms: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Optional per-symbol metadata used by the age/marketcap feature group.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SymbolMeta {
    /// Days since the instrument was first listed.
    pub age_days: Option<f64>,
    /// Market capitalisation series aligned with the bar sequence.
    #[serde(default)]
    pub marketcap: Vec<f64>,
}

/// A single row of the feature matrix, keyed by feature name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureRow {
    pub symbol: String,
    pub ts_ms: i64,
    pub features: Vec<(String, f64)>,
}

impl FeatureRow {
    pub fn get(&self, name: &str) -> Option<f64> {
        self.features
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| *v)
    }
}

// ── Models ────────────────────────────────────────────────────────────

/// Family tag for a registered model; selects the artifact loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    Tree,
    Linear,
    Mlp,
    Rnn,
    Cnn,
    Transformer,
    Meta,
}

/// Metadata persisted alongside a model artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub name: String,
    pub version: u32,
    pub kind: ModelKind,
    pub feature_names: Vec<String>,
    /// Declared prediction target, e.g. "next_close_return".
    pub target_name: String,
    pub trained_at: DateTime<Utc>,
    /// Evaluation metrics keyed by name (rmse, mae, r2, accuracy, ...).
    pub metrics: Vec<(String, f64)>,
    /// Ensemble weight in [0, 1].
    pub weight: f64,
}

impl ModelMetadata {
    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| *v)
    }
}

/// One model's output for one symbol at one timestamp.
#[derive(Debug, Clone, Serialize)]
pub struct Prediction {
    pub model_name: String,
    pub symbol: String,
    pub ts_ms: i64,
    pub value: f64,
    /// Confidence in [0, 1], derived from training metrics.
    pub confidence: f64,
}

// ── Decisions ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Buy,
    Sell,
    Hold,
}

impl Action {
    pub fn label(self) -> &'static str {
        match self {
            Action::Buy => "buy",
            Action::Sell => "sell",
            Action::Hold => "hold",
        }
    }

    /// Whether executing this action increases exposure.
    pub fn increases_exposure(self) -> bool {
        self == Action::Buy
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Regime {
    Bull,
    Bear,
    Sideways,
    Unknown,
}

/// Final per-instrument decision produced by the decision engine and
/// post-processed by the risk manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub symbol: String,
    pub ts_ms: i64,
    pub action: Action,
    /// Confidence in [0, 1].
    pub confidence: f64,
    pub composite_score: f64,
    /// Risk score in [0, 1].
    pub risk_score: f64,
    /// Short human-readable strings for each rule that fired.
    pub reasoning: Vec<String>,
    pub regime: Regime,
}

impl Decision {
    /// Safe default used whenever scoring cannot proceed.
    pub fn safe_hold(symbol: &str, ts_ms: i64, reason: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            ts_ms,
            action: Action::Hold,
            confidence: 0.5,
            composite_score: 0.0,
            risk_score: 0.0,
            reasoning: vec![reason.to_string()],
            regime: Regime::Sideways,
        }
    }
}

// ── Positions & apex tracking ─────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionState {
    Monitoring,
    Dropping,
    Sold,
}

/// A live holding tracked by the apex tracker. At most one non-sold
/// position exists per symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub entry_ts_ms: i64,
    pub entry_price: f64,
    pub quantity: f64,
    pub state: PositionState,
    /// Highest price observed since entry; never decreases while open.
    pub peak_price: f64,
    pub drop_start_ts_ms: Option<i64>,
    pub last_check_ts_ms: i64,
}

impl Position {
    pub fn open(symbol: &str, entry_ts_ms: i64, entry_price: f64, quantity: f64) -> Self {
        Self {
            symbol: symbol.to_string(),
            entry_ts_ms,
            entry_price,
            quantity,
            state: PositionState::Monitoring,
            peak_price: entry_price,
            drop_start_ts_ms: None,
            last_check_ts_ms: entry_ts_ms,
        }
    }
}

/// Persisted mirror of a position's tracking state, upserted by symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApexRecord {
    pub symbol: String,
    pub apex_price: f64,
    pub apex_ts_ms: i64,
    pub drop_start_ts_ms: Option<i64>,
    pub status: PositionState,
    pub last_checked_ms: i64,
}

/// One live price observation consumed by the apex tracker.
#[derive(Debug, Clone, Copy)]
pub struct PriceTick {
    pub ts_ms: i64,
    pub price: f64,
}

// ── Order API ─────────────────────────────────────────────────────────

/// Outbound sell/buy request body for the order endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct OrderRequest {
    pub coin_id: String,
    pub amount: f64,
    pub price: f64,
}

/// Order endpoint response. Anything but `success: true` is a failure.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderResponse {
    pub success: bool,
    #[serde(default)]
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_hold_defaults() {
        let d = Decision::safe_hold("BTC", 1_700_000_000_000, "no models available");
        assert_eq!(d.action, Action::Hold);
        assert!((d.confidence - 0.5).abs() < f64::EPSILON);
        assert_eq!(d.regime, Regime::Sideways);
        assert_eq!(d.reasoning, vec!["no models available".to_string()]);
    }

    #[test]
    fn open_position_starts_monitoring_at_entry_peak() {
        let p = Position::open("ETH", 1, 100.0, 2.0);
        assert_eq!(p.state, PositionState::Monitoring);
        assert_eq!(p.peak_price, 100.0);
        assert!(p.drop_start_ts_ms.is_none());
    }
}
