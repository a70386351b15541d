//! Sizing, stops and exposure control for scored decisions.
//!
//! The manager never hard-fails a decision: limit crossings are logged
//! and sizes are adjusted so the evaluation loop keeps running. The only
//! rewrite is buy → hold when the account is close to its drawdown,
//! leverage or volatility ceiling.

pub mod regime;

use std::collections::VecDeque;

use chrono::{NaiveDate, Utc};
use tracing::{info, warn};

use common::{Action, Decision, Regime, RiskConfig};

const EPS: f64 = 1e-9;

/// Sizing output for one approved decision.
#[derive(Debug, Clone, Copy)]
pub struct RiskAssessment {
    pub position_size: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub risk_score: f64,
}

#[derive(Debug)]
pub struct RiskManager {
    config: RiskConfig,
    balance: f64,
    exposure: f64,
    peak_capital: f64,
    returns: VecDeque<f64>,
    trades_today: u32,
    trade_day: Option<NaiveDate>,
}

impl RiskManager {
    pub fn new(config: RiskConfig, starting_balance: f64) -> Self {
        Self {
            config,
            balance: starting_balance,
            exposure: 0.0,
            peak_capital: starting_balance,
            returns: VecDeque::new(),
            trades_today: 0,
            trade_day: None,
        }
    }

    pub fn balance(&self) -> f64 {
        self.balance
    }

    pub fn exposure(&self) -> f64 {
        self.exposure
    }

    /// Apply a balance change; peak capital only ratchets up.
    pub fn set_balance(&mut self, balance: f64) {
        self.balance = balance;
        if balance + self.exposure > self.peak_capital {
            self.peak_capital = balance + self.exposure;
        }
    }

    pub fn add_exposure(&mut self, notional: f64) {
        self.exposure = (self.exposure + notional).max(0.0);
        if self.balance + self.exposure > self.peak_capital {
            self.peak_capital = self.balance + self.exposure;
        }
    }

    /// Record one per-bar return for the rolling volatility window.
    pub fn record_return(&mut self, r: f64) {
        self.returns.push_back(r);
        while self.returns.len() > self.config.volatility_window.max(1) {
            self.returns.pop_front();
        }
    }

    pub fn note_trade(&mut self) {
        let today = Utc::now().date_naive();
        if self.trade_day != Some(today) {
            self.trade_day = Some(today);
            self.trades_today = 0;
        }
        self.trades_today += 1;
        if self.trades_today > self.config.max_daily_trades {
            warn!(
                trades = self.trades_today,
                max = self.config.max_daily_trades,
                "daily trade limit crossed"
            );
        }
    }

    pub fn drawdown(&self) -> f64 {
        let equity = self.balance + self.exposure;
        if self.peak_capital <= 0.0 {
            return 0.0;
        }
        ((self.peak_capital - equity) / self.peak_capital).max(0.0)
    }

    pub fn leverage(&self) -> f64 {
        self.exposure / self.balance.max(EPS)
    }

    pub fn volatility(&self) -> f64 {
        let n = self.returns.len();
        if n < 2 {
            return 0.0;
        }
        let mean = self.returns.iter().sum::<f64>() / n as f64;
        let var = self.returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n as f64;
        var.sqrt()
    }

    /// `min(balance · max_position_fraction · confidence · adjustment,
    /// balance · risk_tolerance)`.
    pub fn position_size(&self, confidence: f64) -> f64 {
        let scaled = self.balance
            * self.config.max_position_fraction
            * confidence.clamp(0.0, 1.0)
            * self.config.position_adjustment_factor;
        scaled.min(self.balance * self.config.risk_tolerance).max(0.0)
    }

    pub fn stop_loss(&self, price: f64, side: Action) -> f64 {
        match side {
            Action::Sell => price * (1.0 + self.config.stop_loss_pct),
            _ => price * (1.0 - self.config.stop_loss_pct),
        }
    }

    pub fn take_profit(&self, price: f64, side: Action) -> f64 {
        match side {
            Action::Sell => price * (1.0 - self.config.take_profit_pct),
            _ => price * (1.0 + self.config.take_profit_pct),
        }
    }

    /// Regime read from the manager's own close series, independent of
    /// whatever label the decision engine attached.
    pub fn classify_regime(&self, closes: &[f64]) -> Regime {
        regime::classify(
            closes,
            self.config.volatility_window,
            self.config.market_regime_threshold,
        )
    }

    /// `clip(position_fraction · (1/confidence) · regime_factor ·
    /// (1/diversification), 0, 1)`.
    pub fn risk_score(&self, size: f64, confidence: f64, avg_corr: f64, regime: Regime) -> f64 {
        let fraction = size / self.balance.max(EPS);
        let diversification =
            (1.0 - avg_corr / self.config.correlation_threshold.max(EPS)).max(EPS);
        let score =
            fraction * (1.0 / confidence.max(EPS)) * regime::factor(regime) / diversification;
        score.clamp(0.0, 1.0)
    }

    /// Fires when drawdown, leverage or rolling volatility gets close to
    /// its configured ceiling.
    pub fn should_reduce(&self) -> (bool, String) {
        let dd = self.drawdown();
        if dd > 0.8 * self.config.max_drawdown_pct {
            return (
                true,
                format!(
                    "approaching maximum drawdown ({:.1}% of {:.1}%)",
                    dd * 100.0,
                    self.config.max_drawdown_pct * 100.0
                ),
            );
        }
        let lev = self.leverage();
        if lev > 0.9 * self.config.max_leverage {
            return (true, format!("leverage {lev:.2} near limit"));
        }
        let vol = self.volatility();
        if vol > 1.2 * self.config.volatility_threshold {
            return (true, format!("volatility {vol:.4} above threshold"));
        }
        (false, String::new())
    }

    /// Post-process a scored decision: size it, attach stops and risk
    /// score, and rewrite exposure-increasing actions to hold when the
    /// account should be reducing. `market_regime` is the manager's own
    /// read of the close series, see [`Self::classify_regime`].
    pub fn apply(
        &mut self,
        decision: &mut Decision,
        price: f64,
        avg_corr: f64,
        market_regime: Regime,
    ) -> RiskAssessment {
        let (reduce, reason) = self.should_reduce();
        if reduce && decision.action.increases_exposure() {
            info!(symbol = %decision.symbol, %reason, "rewriting to hold");
            decision.action = Action::Hold;
            decision.confidence *= 0.5;
            decision.reasoning.push(reason);
        }

        let size = self.position_size(decision.confidence);
        let score = self.risk_score(size, decision.confidence, avg_corr, market_regime);
        decision.risk_score = score;

        let exposure_cap = self.balance * self.config.exposure_limit;
        if self.exposure + size > exposure_cap {
            warn!(
                symbol = %decision.symbol,
                exposure = self.exposure,
                size,
                cap = exposure_cap,
                "exposure limit crossed"
            );
        }

        RiskAssessment {
            position_size: size,
            stop_loss: self.stop_loss(price, decision.action),
            take_profit: self.take_profit(price, decision.action),
            risk_score: score,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RiskConfig {
        toml::from_str("").unwrap()
    }

    fn buy_decision(confidence: f64) -> Decision {
        Decision {
            symbol: "BTC".into(),
            ts_ms: 0,
            action: Action::Buy,
            confidence,
            composite_score: 0.6,
            risk_score: 0.0,
            reasoning: vec![],
            regime: Regime::Sideways,
        }
    }

    #[test]
    fn position_size_is_capped_by_risk_tolerance() {
        let manager = RiskManager::new(config(), 1_000.0);
        let size = manager.position_size(1.0);
        assert!(size <= 1_000.0 * manager.config.risk_tolerance + 1e-9);
        assert_eq!(manager.position_size(0.0), 0.0);
    }

    #[test]
    fn stops_bracket_the_entry() {
        let manager = RiskManager::new(config(), 1_000.0);
        let entry = 100.0;
        assert!(manager.stop_loss(entry, Action::Buy) < entry);
        assert!(manager.take_profit(entry, Action::Buy) > entry);
        assert!(manager.stop_loss(entry, Action::Sell) > entry);
        assert!(manager.take_profit(entry, Action::Sell) < entry);
    }

    #[test]
    fn drawdown_rewrite_halves_confidence() {
        let mut manager = RiskManager::new(config(), 1_000.0);
        // Peak 1000, balance 820: drawdown 18% of a 20% max.
        manager.set_balance(820.0);
        assert!(manager.drawdown() > 0.8 * manager.config.max_drawdown_pct);

        let mut decision = buy_decision(0.9);
        manager.apply(&mut decision, 100.0, 0.0, Regime::Sideways);
        assert_eq!(decision.action, Action::Hold);
        assert!((decision.confidence - 0.45).abs() < 1e-12);
        assert!(decision
            .reasoning
            .iter()
            .any(|r| r.contains("approaching maximum drawdown")));
    }

    #[test]
    fn sell_is_never_rewritten() {
        let mut manager = RiskManager::new(config(), 1_000.0);
        manager.set_balance(820.0);
        let mut decision = buy_decision(0.9);
        decision.action = Action::Sell;
        manager.apply(&mut decision, 100.0, 0.0, Regime::Sideways);
        assert_eq!(decision.action, Action::Sell);
        assert!((decision.confidence - 0.9).abs() < 1e-12);
    }

    #[test]
    fn healthy_account_keeps_the_buy() {
        let mut manager = RiskManager::new(config(), 1_000.0);
        let mut decision = buy_decision(0.8);
        let assessment = manager.apply(&mut decision, 100.0, 0.0, Regime::Sideways);
        assert_eq!(decision.action, Action::Buy);
        assert!(assessment.position_size > 0.0);
        assert!((0.0..=1.0).contains(&assessment.risk_score));
    }

    #[test]
    fn regime_read_follows_the_close_series() {
        let manager = RiskManager::new(config(), 1_000.0);
        let climb: Vec<f64> = (0..40).map(|i| 100.0 + i as f64).collect();
        assert_eq!(manager.classify_regime(&climb), Regime::Bull);
        assert_eq!(manager.classify_regime(&[100.0, 101.0]), Regime::Unknown);
    }

    #[test]
    fn risk_score_rises_in_bear_regimes() {
        let manager = RiskManager::new(config(), 1_000.0);
        let bull = manager.risk_score(150.0, 0.8, 0.1, Regime::Bull);
        let bear = manager.risk_score(150.0, 0.8, 0.1, Regime::Bear);
        assert!(bear > bull);
    }

    #[test]
    fn volatility_spike_triggers_reduce() {
        let mut manager = RiskManager::new(config(), 1_000.0);
        for i in 0..manager.config.volatility_window {
            manager.record_return(if i % 2 == 0 { 0.3 } else { -0.3 });
        }
        let (reduce, reason) = manager.should_reduce();
        assert!(reduce);
        assert!(reason.contains("volatility"));
    }
}
