//! Bot orchestration: the evaluation loop, the tick router, heartbeat
//! and shutdown drain.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::signal;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tracing::{error, info, warn};

use apex_tracker::{ApexRouter, ApexStore, SaleNotice, TrackerConfig};
use bar_store::{BarKey, BarStore};
use common::{config::AppConfig, Action, Position, PositionState, PriceTick, Result};
use decision_engine::DecisionEngine;
use ensemble::{EnsembleTrainer, TrainerConfig};
use exchange_client::OrderClient;
use feature_engine::{FeatureEngine, MIN_WINDOW};
use model_registry::ModelRegistry;
use risk_engine::RiskManager;
use selection_tracker::{PositionEvent, SelectionJournal};

use crate::memory::MemoryPressure;

/// Approximate bar count per day for an interval string like "5m" or "1h".
fn bars_per_day(interval: &str) -> u32 {
    let (num, unit) = interval.split_at(interval.len().saturating_sub(1));
    let n: u32 = num.parse().unwrap_or(1);
    let per_day = match unit {
        "m" => 1_440 / n.max(1),
        "h" => 24 / n.max(1),
        _ => 1,
    };
    per_day.max(1)
}

pub struct Bot {
    config: AppConfig,
    store: BarStore,
    bar_key: BarKey,
    features: FeatureEngine,
    registry: ModelRegistry,
    trainer: EnsembleTrainer,
    decisions: DecisionEngine,
    risk: RiskManager,
    journal: SelectionJournal,
    router: ApexRouter,
    sales: mpsc::UnboundedReceiver<SaleNotice>,
    pressure: watch::Receiver<MemoryPressure>,
    last_close: Option<f64>,
}

impl Bot {
    pub fn new(
        config: AppConfig,
        bars_csv: Option<PathBuf>,
        pressure: watch::Receiver<MemoryPressure>,
    ) -> Result<Self> {
        let mut store = BarStore::with_persistence(&config.paths.state_dir)?;
        let bar_key = BarKey::new("apex", &config.trading.symbol, &config.trading.interval);
        if let Some(path) = bars_csv {
            let loaded = store.ingest_csv(&bar_key, &path)?;
            info!(bars = loaded, path = %path.display(), "bootstrapped bar history");
        }

        let registry = ModelRegistry::open(&config.paths.models_dir)?;
        let journal = SelectionJournal::open(&config.paths.journal_dir)?;

        let apex_store = ApexStore::open(
            PathBuf::from(&config.paths.state_dir).join("apex_records.json"),
        )?;
        let api = config.api.get("order").cloned().unwrap_or_default();
        let client = OrderClient::new(&config.paths.order_api_url, &api)?;
        let holdings = Arc::new(RwLock::new(HashMap::new()));
        let (sales_tx, sales_rx) = mpsc::unbounded_channel();
        let router = ApexRouter::new(
            TrackerConfig::from(&config.apex),
            Arc::new(Mutex::new(apex_store)),
            holdings,
            Arc::new(client),
            sales_tx,
        );

        let risk = RiskManager::new(config.risk.clone(), config.trading.initial_balance);

        Ok(Self {
            store,
            bar_key,
            features: FeatureEngine::new(),
            registry,
            trainer: EnsembleTrainer::new(TrainerConfig::default()),
            decisions: DecisionEngine::new(),
            risk,
            journal,
            router,
            sales: sales_rx,
            pressure,
            config,
            last_close: None,
        })
    }

    fn lookback_bars(&self) -> usize {
        let full = self.config.trading.lookback_days * bars_per_day(&self.config.trading.interval);
        let mut limit = full as usize;
        if *self.pressure.borrow() == MemoryPressure::ReduceLoad {
            limit /= 2;
        }
        limit.max(MIN_WINDOW)
    }

    /// One evaluation pass: bars, features, decision, risk, journal, and
    /// possibly a new tracked position.
    pub async fn run_cycle(&mut self, allow_orders: bool) -> Result<()> {
        if *self.pressure.borrow() == MemoryPressure::EmergencyCleanup {
            warn!("memory pressure critical, skipping evaluation cycle");
            self.journal.record_lifecycle("cycle skipped: memory pressure");
            return Ok(());
        }

        let bars = self
            .store
            .load(&self.bar_key, None, None, Some(self.lookback_bars()));
        if bars.len() < MIN_WINDOW {
            info!(
                have = bars.len(),
                need = MIN_WINDOW,
                "insufficient bar history, skipping cycle"
            );
            return Ok(());
        }
        let close = bars[bars.len() - 1].close;
        if let Some(prev) = self.last_close {
            if prev > 0.0 {
                self.risk.record_return(close / prev - 1.0);
            }
        }
        self.last_close = Some(close);

        let matrix = self.features.compute(&bars, None)?;

        if self.registry.list()?.is_empty() {
            info!(rows = matrix.nrows(), "empty registry, training ensemble");
            match self.trainer.train(&matrix, &self.registry) {
                Ok(report) => info!(
                    trained = report.trained.len(),
                    skipped = report.skipped.len(),
                    meta = report.meta_trained,
                    "ensemble trained"
                ),
                Err(e) => warn!(error = %e, "ensemble training failed"),
            }
        }

        let mut decision = self.decisions.decide(&matrix, &self.registry);
        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let market_regime = self.risk.classify_regime(&closes);
        let assessment = self.risk.apply(&mut decision, close, 0.0, market_regime);
        info!(
            symbol = %decision.symbol,
            action = decision.action.label(),
            confidence = decision.confidence,
            risk = decision.risk_score,
            "decision"
        );
        self.journal.record_decision(&decision);

        let open = decision.action == Action::Buy
            && decision.confidence >= self.config.trading.threshold
            && !self.router.is_tracking(&decision.symbol);
        if open && allow_orders && close > 0.0 && assessment.position_size > 0.0 {
            let quantity = assessment.position_size / close;
            let position = Position::open(&decision.symbol, decision.ts_ms, close, quantity);
            self.risk
                .set_balance(self.risk.balance() - assessment.position_size);
            self.risk.add_exposure(assessment.position_size);
            self.risk.note_trade();
            self.journal
                .record_position(PositionEvent::Opened, &position, None);
            info!(
                symbol = %position.symbol,
                quantity,
                price = close,
                "opened position, apex tracking started"
            );
            self.router.track(position).await;
        } else if open {
            info!(symbol = %decision.symbol, "buy signal suppressed (dry run)");
        }
        Ok(())
    }

    /// Forward the freshest close to the apex actors as a price tick.
    async fn route_tick(&self) {
        let Some(bar) = self.store.latest(&self.bar_key) else {
            return;
        };
        let tick = PriceTick {
            ts_ms: Utc::now().timestamp_millis(),
            price: bar.close,
        };
        self.router.route(&bar.symbol, tick).await;
    }

    /// Book a confirmed sale: release the exposure taken at open, credit
    /// the proceeds back to the balance and journal the close with its
    /// realized pnl.
    fn settle(&mut self, position: &Position, sale_price: f64) {
        let notional = position.entry_price * position.quantity;
        let pnl = (sale_price - position.entry_price) * position.quantity;
        self.risk.add_exposure(-notional);
        self.risk.set_balance(self.risk.balance() + notional + pnl);
        self.journal
            .record_position(PositionEvent::Closed, position, Some(pnl));
        info!(
            symbol = %position.symbol,
            sale_price,
            pnl,
            "position sold, settled"
        );
    }

    /// A tracked position was sold by its apex actor. Stop tracking the
    /// symbol so it can be re-entered, then settle the books.
    async fn on_sale(&mut self, notice: SaleNotice) {
        match self.router.untrack(&notice.symbol).await {
            Some(position) => self.settle(&position, notice.price),
            None => warn!(symbol = %notice.symbol, "sale notice for unknown position"),
        }
    }

    fn heartbeat(&mut self) {
        match self.journal.metrics(chrono::Duration::hours(24)) {
            Ok(m) => {
                info!(
                    decisions = m.decisions,
                    closed = m.positions_closed,
                    win_rate = m.win_rate,
                    mean_confidence = m.mean_confidence,
                    "heartbeat"
                );
                self.journal.record_lifecycle("heartbeat");
            }
            Err(e) => warn!(error = %e, "heartbeat metrics failed"),
        }
    }

    /// Main loop. Runs until Ctrl-C, then drains the apex actors and
    /// journals final position state.
    pub async fn run(mut self) -> Result<()> {
        self.journal.record_lifecycle("bot started");
        let mut evaluate =
            tokio::time::interval(Duration::from_secs(self.config.trading.evaluation_interval.max(1)));
        let mut ticks =
            tokio::time::interval(Duration::from_secs(self.config.trading.sleep_interval.max(1)));
        let mut heartbeat = tokio::time::interval(Duration::from_secs(300));

        loop {
            tokio::select! {
                _ = signal::ctrl_c() => {
                    info!("shutdown signal received");
                    break;
                }
                _ = evaluate.tick() => {
                    if let Err(e) = self.run_cycle(true).await {
                        error!(error = %e, "evaluation cycle failed");
                    }
                }
                _ = ticks.tick() => {
                    self.route_tick().await;
                }
                Some(notice) = self.sales.recv() => {
                    self.on_sale(notice).await;
                }
                _ = heartbeat.tick() => {
                    self.heartbeat();
                }
            }
        }

        let finals = self.router.shutdown().await;
        // Settle sales that landed after the loop exited but before the
        // actors drained.
        while let Ok(notice) = self.sales.try_recv() {
            if let Some(position) = finals
                .iter()
                .find(|p| p.symbol == notice.symbol && p.state == PositionState::Sold)
            {
                let position = position.clone();
                self.settle(&position, notice.price);
            }
        }
        for position in finals {
            if position.state != PositionState::Sold {
                self.journal.record_lifecycle(&format!(
                    "shutdown with open position {}",
                    position.symbol
                ));
            }
        }
        self.journal.record_lifecycle("bot stopped");
        info!("shutdown complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bars_per_day_by_interval() {
        assert_eq!(bars_per_day("1h"), 24);
        assert_eq!(bars_per_day("5m"), 288);
        assert_eq!(bars_per_day("1d"), 1);
        assert_eq!(bars_per_day("weird"), 1);
    }

    #[tokio::test]
    async fn cycle_skips_without_history() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.paths.state_dir = dir.path().join("state").display().to_string();
        config.paths.models_dir = dir.path().join("models").display().to_string();
        config.paths.journal_dir = dir.path().join("journal").display().to_string();
        let (_tx, rx) = watch::channel(MemoryPressure::Normal);
        let mut bot = Bot::new(config, None, rx).unwrap();
        bot.run_cycle(false).await.unwrap();
        assert!(bot.registry.list().unwrap().is_empty());
    }

    #[tokio::test]
    async fn settle_releases_exposure_and_credits_pnl() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.paths.state_dir = dir.path().join("state").display().to_string();
        config.paths.models_dir = dir.path().join("models").display().to_string();
        config.paths.journal_dir = dir.path().join("journal").display().to_string();
        let (_tx, rx) = watch::channel(MemoryPressure::Normal);
        let mut bot = Bot::new(config, None, rx).unwrap();

        let start = bot.risk.balance();
        // Open: 2 units at 100, 200 of notional moves from cash to exposure.
        bot.risk.set_balance(start - 200.0);
        bot.risk.add_exposure(200.0);
        assert_eq!(bot.risk.exposure(), 200.0);

        let position = Position::open("BTC", 0, 100.0, 2.0);
        bot.settle(&position, 99.0);

        assert_eq!(bot.risk.exposure(), 0.0);
        assert!((bot.risk.balance() - (start - 2.0)).abs() < 1e-9);
        let m = bot.journal.metrics(chrono::Duration::hours(1)).unwrap();
        assert_eq!(m.positions_closed, 1);
    }
}
