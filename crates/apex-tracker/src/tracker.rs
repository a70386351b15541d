//! Trailing-exit state machine for one held symbol.
//!
//! Driven entirely by tick timestamps: the drop timer is the sum of
//! in-drop gaps between consecutive ticks, so a stale-feed gap pauses it
//! instead of resetting or inflating it.

use tracing::{info, warn};

use common::{ApexConfig, ApexRecord, Error, Position, PositionState, PriceTick, Result};

#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub drop_duration_ms: i64,
    /// Gap beyond which the feed is considered stale.
    pub stale_threshold_ms: i64,
    pub base_backoff_ms: i64,
    pub max_backoff_ms: i64,
}

impl From<&ApexConfig> for TrackerConfig {
    fn from(config: &ApexConfig) -> Self {
        Self {
            drop_duration_ms: config.drop_duration_seconds as i64 * 1_000,
            stale_threshold_ms: (config.tick_interval_seconds * config.stale_feed_multiplier as u64)
                as i64
                * 1_000,
            base_backoff_ms: 1_000,
            max_backoff_ms: 60_000,
        }
    }
}

/// What the actor must do after a tick has been absorbed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TickOutcome {
    None,
    /// Drop timer expired; sell the full held quantity at this price.
    SellRequested { quantity: f64, price: f64 },
    /// Holding vanished before the sell could be issued.
    AlreadySold,
}

#[derive(Debug)]
pub struct Tracker {
    position: Position,
    config: TrackerConfig,
    last_tick_ms: Option<i64>,
    in_drop_elapsed_ms: i64,
    apex_ts_ms: i64,
    backoff_until_ms: i64,
    consecutive_server_errors: u32,
}

impl Tracker {
    pub fn new(position: Position, config: TrackerConfig) -> Self {
        let apex_ts_ms = position.entry_ts_ms;
        Self {
            position,
            config,
            last_tick_ms: None,
            in_drop_elapsed_ms: 0,
            apex_ts_ms,
            backoff_until_ms: 0,
            consecutive_server_errors: 0,
        }
    }

    pub fn position(&self) -> &Position {
        &self.position
    }

    pub fn record(&self) -> ApexRecord {
        ApexRecord {
            symbol: self.position.symbol.clone(),
            apex_price: self.position.peak_price,
            apex_ts_ms: self.apex_ts_ms,
            drop_start_ts_ms: self.position.drop_start_ts_ms,
            status: self.position.state,
            last_checked_ms: self.position.last_check_ts_ms,
        }
    }

    /// Absorb one tick. `holding` is the currently held quantity, or
    /// None when the symbol is no longer in the holdings table.
    pub fn on_tick(&mut self, tick: PriceTick, holding: Option<f64>) -> TickOutcome {
        self.position.last_check_ts_ms = tick.ts_ms;
        if self.position.state == PositionState::Sold {
            return TickOutcome::None;
        }

        let gap = self.last_tick_ms.map(|last| tick.ts_ms - last);
        let stale = matches!(gap, Some(g) if g > self.config.stale_threshold_ms);
        if stale {
            warn!(
                symbol = %self.position.symbol,
                gap_ms = gap.unwrap_or(0),
                "stale feed gap, drop timer paused across it"
            );
        }
        if self.position.state == PositionState::Dropping && !stale {
            if let Some(g) = gap {
                self.in_drop_elapsed_ms += g.max(0);
            }
        }
        self.last_tick_ms = Some(tick.ts_ms);

        if tick.price > self.position.peak_price {
            self.position.peak_price = tick.price;
            self.apex_ts_ms = tick.ts_ms;
            self.position.drop_start_ts_ms = None;
            self.position.state = PositionState::Monitoring;
            self.in_drop_elapsed_ms = 0;
            return TickOutcome::None;
        }

        match self.position.state {
            PositionState::Monitoring => {
                if tick.price < self.position.peak_price {
                    self.position.state = PositionState::Dropping;
                    self.position.drop_start_ts_ms = Some(tick.ts_ms);
                    self.in_drop_elapsed_ms = 0;
                    info!(
                        symbol = %self.position.symbol,
                        price = tick.price,
                        peak = self.position.peak_price,
                        "price below apex, drop timer started"
                    );
                }
                TickOutcome::None
            }
            PositionState::Dropping => {
                if tick.price >= self.position.peak_price {
                    self.position.state = PositionState::Monitoring;
                    self.position.drop_start_ts_ms = None;
                    self.in_drop_elapsed_ms = 0;
                    return TickOutcome::None;
                }
                if self.in_drop_elapsed_ms >= self.config.drop_duration_ms {
                    if tick.ts_ms < self.backoff_until_ms {
                        return TickOutcome::None;
                    }
                    return match holding {
                        Some(quantity) => TickOutcome::SellRequested {
                            quantity,
                            price: tick.price,
                        },
                        None => {
                            info!(
                                symbol = %self.position.symbol,
                                "holding gone, marking sold without an order"
                            );
                            self.position.state = PositionState::Sold;
                            TickOutcome::AlreadySold
                        }
                    };
                }
                TickOutcome::None
            }
            PositionState::Sold => TickOutcome::None,
        }
    }

    /// Absorb the outcome of a sell attempt issued for this tracker.
    pub fn on_sell_result(&mut self, result: Result<()>, now_ms: i64) {
        match result {
            Ok(()) => {
                self.position.state = PositionState::Sold;
                self.consecutive_server_errors = 0;
                info!(symbol = %self.position.symbol, "position sold");
            }
            Err(Error::Exchange { status, message }) if (400..500).contains(&status) => {
                // Retry on the next tick, no backoff.
                warn!(
                    symbol = %self.position.symbol,
                    status,
                    %message,
                    "order rejected, retrying next tick"
                );
            }
            Err(e) => {
                self.consecutive_server_errors += 1;
                let exp = self
                    .config
                    .base_backoff_ms
                    .saturating_mul(1_i64 << (self.consecutive_server_errors - 1).min(16));
                let backoff = exp.min(self.config.max_backoff_ms);
                self.backoff_until_ms = now_ms + backoff;
                warn!(
                    symbol = %self.position.symbol,
                    error = %e,
                    backoff_ms = backoff,
                    "order failed, backing off"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(drop_secs: i64, stale_ms: i64) -> TrackerConfig {
        TrackerConfig {
            drop_duration_ms: drop_secs * 1_000,
            stale_threshold_ms: stale_ms,
            base_backoff_ms: 1_000,
            max_backoff_ms: 60_000,
        }
    }

    fn tick(ts_s: i64, price: f64) -> PriceTick {
        PriceTick {
            ts_ms: ts_s * 1_000,
            price,
        }
    }

    #[test]
    fn apex_trigger_at_threshold() {
        let position = Position::open("BTC", 0, 100.0, 1.0);
        let mut tracker = Tracker::new(position, config(30, 50_000));

        for (i, price) in [100.0, 101.0, 102.0].iter().enumerate() {
            assert_eq!(
                tracker.on_tick(tick(i as i64 * 10, *price), Some(1.0)),
                TickOutcome::None
            );
        }
        assert_eq!(tracker.position().peak_price, 102.0);

        // Drop begins at t=30s.
        assert_eq!(tracker.on_tick(tick(30, 100.0), Some(1.0)), TickOutcome::None);
        assert_eq!(tracker.position().state, PositionState::Dropping);
        assert_eq!(tracker.position().drop_start_ts_ms, Some(30_000));

        assert_eq!(tracker.on_tick(tick(40, 99.0), Some(1.0)), TickOutcome::None);
        assert_eq!(tracker.on_tick(tick(50, 99.0), Some(1.0)), TickOutcome::None);
        // t=60s is 30s after the drop started.
        assert_eq!(
            tracker.on_tick(tick(60, 99.0), Some(1.0)),
            TickOutcome::SellRequested {
                quantity: 1.0,
                price: 99.0
            }
        );
        tracker.on_sell_result(Ok(()), 60_000);
        assert_eq!(tracker.position().state, PositionState::Sold);
        assert_eq!(tracker.record().apex_price, 102.0);
        assert_eq!(tracker.record().status, PositionState::Sold);
    }

    #[test]
    fn recovery_resets_the_drop() {
        let position = Position::open("BTC", 0, 100.0, 1.0);
        let mut tracker = Tracker::new(position, config(30, 50_000));
        for (i, price) in [100.0, 105.0, 103.0, 104.0, 106.0].iter().enumerate() {
            assert_eq!(
                tracker.on_tick(tick(i as i64 * 10, *price), Some(1.0)),
                TickOutcome::None
            );
        }
        assert_eq!(tracker.position().state, PositionState::Monitoring);
        assert_eq!(tracker.position().peak_price, 106.0);
        assert_eq!(tracker.position().drop_start_ts_ms, None);
    }

    #[test]
    fn rising_prices_never_drop() {
        let position = Position::open("BTC", 0, 100.0, 1.0);
        let mut tracker = Tracker::new(position, config(30, 50_000));
        for i in 0..50 {
            tracker.on_tick(tick(i * 10, 100.0 + i as f64), Some(1.0));
            assert_eq!(tracker.position().state, PositionState::Monitoring);
        }
    }

    #[test]
    fn stale_gap_pauses_the_drop_timer() {
        // 3 s tick interval, stale after 15 s, sell after 10 s in drop.
        let position = Position::open("BTC", 0, 100.0, 1.0);
        let mut tracker = Tracker::new(position, config(10, 15_000));

        tracker.on_tick(tick(0, 100.0), Some(1.0));
        tracker.on_tick(tick(3, 99.0), Some(1.0));
        assert_eq!(tracker.position().state, PositionState::Dropping);

        // 20 s gap: excluded from the timer entirely.
        assert_eq!(tracker.on_tick(tick(23, 99.0), Some(1.0)), TickOutcome::None);
        assert_eq!(tracker.position().state, PositionState::Dropping);

        // Normal cadence resumes; effective in-drop time restarts from
        // the resumed tick, so the sell lands at 23 + 10 s of ticks.
        assert_eq!(tracker.on_tick(tick(26, 99.0), Some(1.0)), TickOutcome::None);
        assert_eq!(tracker.on_tick(tick(29, 99.0), Some(1.0)), TickOutcome::None);
        assert_eq!(tracker.on_tick(tick(32, 99.0), Some(1.0)), TickOutcome::None);
        assert!(matches!(
            tracker.on_tick(tick(35, 99.0), Some(1.0)),
            TickOutcome::SellRequested { .. }
        ));
    }

    #[test]
    fn missing_holding_marks_sold_without_order() {
        let position = Position::open("BTC", 0, 100.0, 1.0);
        let mut tracker = Tracker::new(position, config(10, 50_000));
        tracker.on_tick(tick(0, 100.0), Some(1.0));
        tracker.on_tick(tick(5, 99.0), Some(1.0));
        assert_eq!(
            tracker.on_tick(tick(20, 99.0), None),
            TickOutcome::AlreadySold
        );
        assert_eq!(tracker.position().state, PositionState::Sold);
    }

    #[test]
    fn client_error_retries_next_tick() {
        let position = Position::open("BTC", 0, 100.0, 1.0);
        let mut tracker = Tracker::new(position, config(10, 50_000));
        tracker.on_tick(tick(0, 100.0), Some(1.0));
        tracker.on_tick(tick(5, 99.0), Some(1.0));
        assert!(matches!(
            tracker.on_tick(tick(15, 99.0), Some(1.0)),
            TickOutcome::SellRequested { .. }
        ));
        tracker.on_sell_result(
            Err(Error::Exchange {
                status: 400,
                message: "bad order".into(),
            }),
            15_000,
        );
        assert_eq!(tracker.position().state, PositionState::Dropping);
        // Next tick triggers again immediately.
        assert!(matches!(
            tracker.on_tick(tick(20, 99.0), Some(1.0)),
            TickOutcome::SellRequested { .. }
        ));
    }

    #[test]
    fn server_errors_back_off_exponentially() {
        let position = Position::open("BTC", 0, 100.0, 1.0);
        let mut tracker = Tracker::new(position, config(10, 500_000));
        tracker.on_tick(tick(0, 100.0), Some(1.0));
        tracker.on_tick(tick(5, 99.0), Some(1.0));
        assert!(matches!(
            tracker.on_tick(tick(15, 99.0), Some(1.0)),
            TickOutcome::SellRequested { .. }
        ));

        let server_error = || {
            Err(Error::Exchange {
                status: 500,
                message: "unavailable".into(),
            })
        };
        tracker.on_sell_result(server_error(), 15_000);
        // 1 s backoff: a tick 0.5 s later stays quiet.
        assert_eq!(
            tracker.on_tick(
                PriceTick {
                    ts_ms: 15_500,
                    price: 99.0
                },
                Some(1.0)
            ),
            TickOutcome::None
        );
        // After the backoff expires the sell fires again.
        assert!(matches!(
            tracker.on_tick(tick(17, 99.0), Some(1.0)),
            TickOutcome::SellRequested { .. }
        ));

        // Repeated failures cap at 60 s.
        for i in 0..10 {
            tracker.on_sell_result(server_error(), 17_000 + i);
        }
        assert!(tracker.backoff_until_ms <= 17_009 + 60_000);
    }
}
