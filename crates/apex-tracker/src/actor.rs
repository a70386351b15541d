//! One tokio task per tracked symbol, fed price ticks over a channel.
//!
//! The actor owns its Tracker; the shared pieces are the order sink, the
//! holdings table and the record store, all of which tolerate concurrent
//! actors.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use common::{OrderRequest, Position, PriceTick, Result};
use exchange_client::OrderClient;

use crate::store::{upsert_tolerant, ApexStore};
use crate::tracker::{TickOutcome, Tracker, TrackerConfig};

/// Symbol → held quantity, shared with whoever opens and closes
/// positions.
pub type SharedHoldings = Arc<RwLock<HashMap<String, f64>>>;

pub type SharedStore = Arc<Mutex<ApexStore>>;

/// Sell-order seam; the live implementation posts to the order API.
#[async_trait]
pub trait OrderSink: Send + Sync {
    async fn sell(&self, symbol: &str, quantity: f64, price: f64) -> Result<()>;
}

#[async_trait]
impl OrderSink for OrderClient {
    async fn sell(&self, symbol: &str, quantity: f64, price: f64) -> Result<()> {
        self.place_order(&OrderRequest {
            coin_id: symbol.to_string(),
            amount: quantity,
            price,
        })
        .await
        .map(|_| ())
    }
}

/// Emitted by an actor after a confirmed sell, so whoever opened the
/// position can settle it: release exposure, credit proceeds, journal.
#[derive(Debug, Clone)]
pub struct SaleNotice {
    pub symbol: String,
    pub quantity: f64,
    pub price: f64,
    pub ts_ms: i64,
}

pub struct ApexActorHandle {
    pub ticks: mpsc::Sender<PriceTick>,
    pub task: JoinHandle<Position>,
}

/// Spawn the actor for one open position. Closing the tick channel
/// drains the actor: it finishes the in-flight tick, persists final
/// state and returns the position.
pub fn spawn(
    position: Position,
    config: TrackerConfig,
    store: SharedStore,
    holdings: SharedHoldings,
    sink: Arc<dyn OrderSink>,
    sales: mpsc::UnboundedSender<SaleNotice>,
) -> ApexActorHandle {
    let (tx, mut rx) = mpsc::channel::<PriceTick>(64);
    let symbol = position.symbol.clone();
    let mut tracker = Tracker::new(position, config);

    let task = tokio::spawn(async move {
        while let Some(tick) = rx.recv().await {
            let holding = holdings.read().await.get(&symbol).copied();
            match tracker.on_tick(tick, holding) {
                TickOutcome::None | TickOutcome::AlreadySold => {}
                TickOutcome::SellRequested { quantity, price } => {
                    let result = sink.sell(&symbol, quantity, price).await;
                    let sold = result.is_ok();
                    tracker.on_sell_result(result, tick.ts_ms);
                    if sold {
                        holdings.write().await.remove(&symbol);
                        let _ = sales.send(SaleNotice {
                            symbol: symbol.clone(),
                            quantity,
                            price,
                            ts_ms: tick.ts_ms,
                        });
                    }
                }
            }
            upsert_tolerant(&mut *store.lock().await, tracker.record());
        }
        upsert_tolerant(&mut *store.lock().await, tracker.record());
        info!(%symbol, "apex actor drained");
        tracker.position().clone()
    });

    ApexActorHandle { ticks: tx, task }
}

/// Routes ticks to per-symbol actors, spawning them as positions open.
pub struct ApexRouter {
    config: TrackerConfig,
    store: SharedStore,
    holdings: SharedHoldings,
    sink: Arc<dyn OrderSink>,
    sales: mpsc::UnboundedSender<SaleNotice>,
    actors: HashMap<String, ApexActorHandle>,
}

impl ApexRouter {
    pub fn new(
        config: TrackerConfig,
        store: SharedStore,
        holdings: SharedHoldings,
        sink: Arc<dyn OrderSink>,
        sales: mpsc::UnboundedSender<SaleNotice>,
    ) -> Self {
        Self {
            config,
            store,
            holdings,
            sink,
            sales,
            actors: HashMap::new(),
        }
    }

    /// Start tracking a freshly opened position.
    pub async fn track(&mut self, position: Position) {
        let symbol = position.symbol.clone();
        self.holdings
            .write()
            .await
            .insert(symbol.clone(), position.quantity);
        let handle = spawn(
            position,
            self.config.clone(),
            Arc::clone(&self.store),
            Arc::clone(&self.holdings),
            Arc::clone(&self.sink),
            self.sales.clone(),
        );
        self.actors.insert(symbol, handle);
    }

    pub fn is_tracking(&self, symbol: &str) -> bool {
        self.actors.contains_key(symbol)
    }

    /// Stop tracking a symbol: close its tick channel, wait for the
    /// actor to persist and exit, and return the final position. The
    /// symbol is free for re-entry afterwards.
    pub async fn untrack(&mut self, symbol: &str) -> Option<Position> {
        let handle = self.actors.remove(symbol)?;
        drop(handle.ticks);
        match handle.task.await {
            Ok(position) => Some(position),
            Err(e) => {
                warn!(%symbol, error = %e, "apex actor panicked");
                None
            }
        }
    }

    /// Deliver one tick to the symbol's actor, if any.
    pub async fn route(&self, symbol: &str, tick: PriceTick) {
        if let Some(handle) = self.actors.get(symbol) {
            if handle.ticks.send(tick).await.is_err() {
                warn!(%symbol, "apex actor gone, tick dropped");
            }
        }
    }

    /// Close every tick channel and wait for the actors to persist and
    /// exit. Returns the final positions.
    pub async fn shutdown(&mut self) -> Vec<Position> {
        let mut finals = Vec::new();
        for (symbol, handle) in self.actors.drain() {
            drop(handle.ticks);
            match handle.task.await {
                Ok(position) => finals.push(position),
                Err(e) => warn!(%symbol, error = %e, "apex actor panicked"),
            }
        }
        finals
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{Error, PositionState};
    use tempfile::TempDir;

    struct RecordingSink {
        calls: Mutex<Vec<(String, f64, f64)>>,
        fail_with_status: Option<u16>,
    }

    impl RecordingSink {
        fn ok() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                fail_with_status: None,
            }
        }

        fn failing(status: u16) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                fail_with_status: Some(status),
            }
        }
    }

    #[async_trait]
    impl OrderSink for RecordingSink {
        async fn sell(&self, symbol: &str, quantity: f64, price: f64) -> Result<()> {
            self.calls
                .lock()
                .await
                .push((symbol.to_string(), quantity, price));
            match self.fail_with_status {
                Some(status) => Err(Error::Exchange {
                    status,
                    message: "forced".into(),
                }),
                None => Ok(()),
            }
        }
    }

    fn config() -> TrackerConfig {
        TrackerConfig {
            drop_duration_ms: 30_000,
            stale_threshold_ms: 50_000,
            base_backoff_ms: 1_000,
            max_backoff_ms: 60_000,
        }
    }

    async fn setup(
        sink: Arc<RecordingSink>,
    ) -> (
        ApexRouter,
        SharedHoldings,
        SharedStore,
        mpsc::UnboundedReceiver<SaleNotice>,
        TempDir,
    ) {
        let dir = TempDir::new().unwrap();
        let store: SharedStore = Arc::new(Mutex::new(
            ApexStore::open(dir.path().join("apex.json")).unwrap(),
        ));
        let holdings: SharedHoldings = Arc::new(RwLock::new(HashMap::new()));
        let (sales_tx, sales_rx) = mpsc::unbounded_channel();
        let router = ApexRouter::new(
            config(),
            Arc::clone(&store),
            Arc::clone(&holdings),
            sink,
            sales_tx,
        );
        (router, holdings, store, sales_rx, dir)
    }

    #[tokio::test]
    async fn full_trailing_exit_flow() {
        let sink = Arc::new(RecordingSink::ok());
        let (mut router, holdings, store, mut sales, _dir) = setup(Arc::clone(&sink)).await;
        router.track(Position::open("BTC", 0, 100.0, 1.0)).await;

        let prices = [100.0, 101.0, 102.0, 100.0, 99.0, 99.0, 99.0];
        for (i, price) in prices.iter().enumerate() {
            router
                .route(
                    "BTC",
                    PriceTick {
                        ts_ms: i as i64 * 10_000,
                        price: *price,
                    },
                )
                .await;
        }
        let finals = router.shutdown().await;

        assert_eq!(finals.len(), 1);
        assert_eq!(finals[0].state, PositionState::Sold);
        let calls = sink.calls.lock().await;
        assert_eq!(calls.as_slice(), &[("BTC".to_string(), 1.0, 99.0)]);
        assert!(holdings.read().await.is_empty());

        let store = store.lock().await;
        let record = store.get("BTC").unwrap();
        assert_eq!(record.status, PositionState::Sold);
        assert_eq!(record.apex_price, 102.0);

        let notice = sales.try_recv().unwrap();
        assert_eq!(notice.symbol, "BTC");
        assert_eq!(notice.quantity, 1.0);
        assert_eq!(notice.price, 99.0);
    }

    #[tokio::test]
    async fn sale_notice_allows_reentry_after_untrack() {
        let sink = Arc::new(RecordingSink::ok());
        let (mut router, _holdings, _store, mut sales, _dir) = setup(Arc::clone(&sink)).await;
        router.track(Position::open("BTC", 0, 100.0, 1.0)).await;

        let prices = [100.0, 101.0, 102.0, 100.0, 99.0, 99.0, 99.0];
        for (i, price) in prices.iter().enumerate() {
            router
                .route(
                    "BTC",
                    PriceTick {
                        ts_ms: i as i64 * 10_000,
                        price: *price,
                    },
                )
                .await;
        }

        let notice = sales.recv().await.unwrap();
        assert_eq!(notice.symbol, "BTC");
        assert_eq!(notice.price, 99.0);
        assert_eq!(notice.ts_ms, 60_000);

        let sold = router.untrack("BTC").await.unwrap();
        assert_eq!(sold.state, PositionState::Sold);
        assert!(!router.is_tracking("BTC"));

        router.track(Position::open("BTC", 70_000, 98.0, 1.0)).await;
        assert!(router.is_tracking("BTC"));
        router.shutdown().await;
    }

    #[tokio::test]
    async fn recovery_never_sells() {
        let sink = Arc::new(RecordingSink::ok());
        let (mut router, _holdings, store, _sales, _dir) = setup(Arc::clone(&sink)).await;
        router.track(Position::open("BTC", 0, 100.0, 1.0)).await;

        for (i, price) in [100.0, 105.0, 103.0, 104.0, 106.0].iter().enumerate() {
            router
                .route(
                    "BTC",
                    PriceTick {
                        ts_ms: i as i64 * 10_000,
                        price: *price,
                    },
                )
                .await;
        }
        let finals = router.shutdown().await;

        assert_eq!(finals[0].state, PositionState::Monitoring);
        assert_eq!(finals[0].peak_price, 106.0);
        assert_eq!(finals[0].drop_start_ts_ms, None);
        assert!(sink.calls.lock().await.is_empty());
        assert_eq!(
            store.lock().await.get("BTC").unwrap().status,
            PositionState::Monitoring
        );
    }

    #[tokio::test]
    async fn rejected_order_keeps_dropping_and_retries() {
        let sink = Arc::new(RecordingSink::failing(400));
        let (mut router, _holdings, _store, _sales, _dir) = setup(Arc::clone(&sink)).await;
        router.track(Position::open("BTC", 0, 100.0, 1.0)).await;

        // Two ticks past the threshold: both attempt a sell.
        let prices = [100.0, 99.0, 99.0, 99.0, 99.0, 99.0];
        for (i, price) in prices.iter().enumerate() {
            router
                .route(
                    "BTC",
                    PriceTick {
                        ts_ms: i as i64 * 10_000,
                        price: *price,
                    },
                )
                .await;
        }
        let finals = router.shutdown().await;

        assert_eq!(finals[0].state, PositionState::Dropping);
        assert!(sink.calls.lock().await.len() >= 2);
    }

    #[tokio::test]
    async fn ticks_stay_in_order_per_symbol() {
        // A sink that records tick prices in the order the actor sees
        // them, while many ticks are queued at once.
        let sink = Arc::new(RecordingSink::ok());
        let (mut router, _holdings, store, _sales, _dir) = setup(Arc::clone(&sink)).await;
        router.track(Position::open("ETH", 0, 50.0, 2.0)).await;

        for i in 0..50 {
            router
                .route(
                    "ETH",
                    PriceTick {
                        ts_ms: i * 1_000,
                        price: 50.0 + i as f64,
                    },
                )
                .await;
        }
        router.shutdown().await;
        let store = store.lock().await;
        let record = store.get("ETH").unwrap();
        assert_eq!(record.apex_price, 99.0);
        assert_eq!(record.last_checked_ms, 49_000);
    }

    #[tokio::test]
    async fn untracked_symbols_are_ignored() {
        let sink = Arc::new(RecordingSink::ok());
        let (router, _holdings, _store, _sales, _dir) = setup(Arc::clone(&sink)).await;
        router
            .route(
                "DOGE",
                PriceTick {
                    ts_ms: 0,
                    price: 1.0,
                },
            )
            .await;
        assert!(!router.is_tracking("DOGE"));
    }
}
