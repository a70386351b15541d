//! Bot configuration types.
//!
//! Loaded from a TOML document; every field carries a serde default so a
//! partial config file is valid. A missing required section is a fatal
//! `Error::Config` at startup.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Top-level bot configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Memory monitor thresholds.
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Per-exchange API client limits, keyed by exchange name.
    #[serde(default)]
    pub api: HashMap<String, ApiConfig>,

    /// Trading loop parameters.
    #[serde(default)]
    pub trading: TradingConfig,

    /// Risk management parameters.
    #[serde(default)]
    pub risk: RiskConfig,

    /// Apex trailing-exit parameters.
    #[serde(default)]
    pub apex: ApexConfig,

    /// Model registry and journal directories.
    #[serde(default)]
    pub paths: PathsConfig,
}

/// Memory monitor thresholds (bytes) and cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// RSS above this triggers the reduce-load action.
    #[serde(default = "default_max_memory")]
    pub max_memory_usage: u64,

    /// Swap above this also triggers reduce-load.
    #[serde(default = "default_max_swap")]
    pub max_swap_usage: u64,

    /// Sampling interval in seconds.
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_seconds: u64,

    /// Enabled low-memory actions.
    #[serde(default = "default_low_memory_actions")]
    pub low_memory_actions: Vec<LowMemoryAction>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LowMemoryAction {
    ReduceLoad,
    EmergencyCleanup,
}

/// Per-exchange API limits and error handling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_calls_per_minute")]
    pub calls_per_minute: u32,

    /// Consecutive errors before the client enters cool-down.
    #[serde(default = "default_max_consecutive_errors")]
    pub max_consecutive_errors: u32,

    /// Cool-down length in seconds once the error cap is reached.
    #[serde(default = "default_error_cooldown")]
    pub error_cooldown_seconds: u64,

    /// Exponential backoff multiplier for retries.
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,

    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

/// Trading loop parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingConfig {
    #[serde(default = "default_symbol")]
    pub symbol: String,

    /// Bar interval, e.g. "1h".
    #[serde(default = "default_interval")]
    pub interval: String,

    #[serde(default = "default_lookback_days")]
    pub lookback_days: u32,

    #[serde(default = "default_initial_balance")]
    pub initial_balance: f64,

    /// Minimum decision confidence to act on.
    #[serde(default = "default_threshold")]
    pub threshold: f64,

    /// Seconds between evaluation cycles.
    #[serde(default = "default_evaluation_interval")]
    pub evaluation_interval: u64,

    /// Seconds between apex price checks.
    #[serde(default = "default_sleep_interval")]
    pub sleep_interval: u64,
}

/// Risk management thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Max fraction of balance in a single position.
    #[serde(default = "default_max_position_fraction")]
    pub max_position_fraction: f64,

    #[serde(default = "default_stop_loss_pct")]
    pub stop_loss_pct: f64,

    #[serde(default = "default_take_profit_pct")]
    pub take_profit_pct: f64,

    #[serde(default = "default_max_drawdown_pct")]
    pub max_drawdown_pct: f64,

    /// Scales confidence-proportional sizing.
    #[serde(default = "default_adjustment_factor")]
    pub position_adjustment_factor: f64,

    /// Hard cap on position size as a fraction of balance.
    #[serde(default = "default_risk_tolerance")]
    pub risk_tolerance: f64,

    /// Rolling window (bars) for volatility and regime.
    #[serde(default = "default_volatility_window")]
    pub volatility_window: usize,

    /// Momentum/volatility ratio above which the regime is bull, below the
    /// negation bear.
    #[serde(default = "default_regime_threshold")]
    pub market_regime_threshold: f64,

    #[serde(default = "default_correlation_threshold")]
    pub correlation_threshold: f64,

    #[serde(default = "default_diversification_factor")]
    pub diversification_factor: f64,

    #[serde(default = "default_max_daily_trades")]
    pub max_daily_trades: u32,

    #[serde(default = "default_max_leverage")]
    pub max_leverage: f64,

    /// Max total open notional as a fraction of balance.
    #[serde(default = "default_exposure_limit")]
    pub exposure_limit: f64,

    #[serde(default = "default_volatility_threshold")]
    pub volatility_threshold: f64,
}

/// Apex trailing-exit parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApexConfig {
    /// Seconds a price must stay below the apex before selling.
    #[serde(default = "default_drop_duration")]
    pub drop_duration_seconds: u64,

    /// Feed is stale after this many missed tick intervals.
    #[serde(default = "default_stale_multiplier")]
    pub stale_feed_multiplier: u32,

    /// Expected seconds between price ticks.
    #[serde(default = "default_tick_interval")]
    pub tick_interval_seconds: u64,
}

/// Filesystem layout for persisted state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_models_dir")]
    pub models_dir: String,

    #[serde(default = "default_journal_dir")]
    pub journal_dir: String,

    #[serde(default = "default_state_dir")]
    pub state_dir: String,

    /// Order API endpoint URL.
    #[serde(default = "default_order_url")]
    pub order_api_url: String,
}

// ── Defaults ──────────────────────────────────────────────────────────

fn default_max_memory() -> u64 {
    2 * 1024 * 1024 * 1024
}
fn default_max_swap() -> u64 {
    512 * 1024 * 1024
}
fn default_cleanup_interval() -> u64 {
    60
}
fn default_low_memory_actions() -> Vec<LowMemoryAction> {
    vec![LowMemoryAction::ReduceLoad, LowMemoryAction::EmergencyCleanup]
}

fn default_calls_per_minute() -> u32 {
    60
}
fn default_max_consecutive_errors() -> u32 {
    5
}
fn default_error_cooldown() -> u64 {
    120
}
fn default_backoff_factor() -> f64 {
    2.0
}
fn default_timeout() -> u64 {
    15
}

fn default_symbol() -> String {
    "BTC".into()
}
fn default_interval() -> String {
    "1h".into()
}
fn default_lookback_days() -> u32 {
    30
}
fn default_initial_balance() -> f64 {
    10_000.0
}
fn default_threshold() -> f64 {
    0.6
}
fn default_evaluation_interval() -> u64 {
    300
}
fn default_sleep_interval() -> u64 {
    10
}

fn default_max_position_fraction() -> f64 {
    0.2
}
fn default_stop_loss_pct() -> f64 {
    0.05
}
fn default_take_profit_pct() -> f64 {
    0.10
}
fn default_max_drawdown_pct() -> f64 {
    0.20
}
fn default_adjustment_factor() -> f64 {
    1.0
}
fn default_risk_tolerance() -> f64 {
    0.15
}
fn default_volatility_window() -> usize {
    20
}
fn default_regime_threshold() -> f64 {
    0.5
}
fn default_correlation_threshold() -> f64 {
    0.7
}
fn default_diversification_factor() -> f64 {
    0.5
}
fn default_max_daily_trades() -> u32 {
    10
}
fn default_max_leverage() -> f64 {
    1.0
}
fn default_exposure_limit() -> f64 {
    0.8
}
fn default_volatility_threshold() -> f64 {
    0.05
}

fn default_drop_duration() -> u64 {
    30
}
fn default_stale_multiplier() -> u32 {
    5
}
fn default_tick_interval() -> u64 {
    10
}

fn default_models_dir() -> String {
    "state/models".into()
}
fn default_journal_dir() -> String {
    "state/journal".into()
}
fn default_state_dir() -> String {
    "state".into()
}
fn default_order_url() -> String {
    "http://127.0.0.1:8080/api/order".into()
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_memory_usage: default_max_memory(),
            max_swap_usage: default_max_swap(),
            cleanup_interval_seconds: default_cleanup_interval(),
            low_memory_actions: default_low_memory_actions(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            calls_per_minute: default_calls_per_minute(),
            max_consecutive_errors: default_max_consecutive_errors(),
            error_cooldown_seconds: default_error_cooldown(),
            backoff_factor: default_backoff_factor(),
            timeout_seconds: default_timeout(),
        }
    }
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            symbol: default_symbol(),
            interval: default_interval(),
            lookback_days: default_lookback_days(),
            initial_balance: default_initial_balance(),
            threshold: default_threshold(),
            evaluation_interval: default_evaluation_interval(),
            sleep_interval: default_sleep_interval(),
        }
    }
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_position_fraction: default_max_position_fraction(),
            stop_loss_pct: default_stop_loss_pct(),
            take_profit_pct: default_take_profit_pct(),
            max_drawdown_pct: default_max_drawdown_pct(),
            position_adjustment_factor: default_adjustment_factor(),
            risk_tolerance: default_risk_tolerance(),
            volatility_window: default_volatility_window(),
            market_regime_threshold: default_regime_threshold(),
            correlation_threshold: default_correlation_threshold(),
            diversification_factor: default_diversification_factor(),
            max_daily_trades: default_max_daily_trades(),
            max_leverage: default_max_leverage(),
            exposure_limit: default_exposure_limit(),
            volatility_threshold: default_volatility_threshold(),
        }
    }
}

impl Default for ApexConfig {
    fn default() -> Self {
        Self {
            drop_duration_seconds: default_drop_duration(),
            stale_feed_multiplier: default_stale_multiplier(),
            tick_interval_seconds: default_tick_interval(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            models_dir: default_models_dir(),
            journal_dir: default_journal_dir(),
            state_dir: default_state_dir(),
            order_api_url: default_order_url(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_defaults() {
        let cfg: AppConfig = toml::from_str("").expect("empty config should parse");
        assert_eq!(cfg.apex.drop_duration_seconds, 30);
        assert_eq!(cfg.apex.stale_feed_multiplier, 5);
        assert_eq!(cfg.risk.max_drawdown_pct, 0.20);
        assert_eq!(cfg.trading.symbol, "BTC");
    }

    #[test]
    fn partial_section_keeps_other_defaults() {
        let cfg: AppConfig =
            toml::from_str("[apex]\ndrop_duration_seconds = 45\n").expect("parse");
        assert_eq!(cfg.apex.drop_duration_seconds, 45);
        assert_eq!(cfg.apex.stale_feed_multiplier, 5);
    }

    #[test]
    fn api_section_is_keyed_by_exchange() {
        let cfg: AppConfig =
            toml::from_str("[api.binance]\ncalls_per_minute = 30\n").expect("parse");
        let api = cfg.api.get("binance").expect("binance section");
        assert_eq!(api.calls_per_minute, 30);
        assert_eq!(api.max_consecutive_errors, 5);
    }
}
