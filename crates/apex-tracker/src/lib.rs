//! Trailing-exit tracking: per-symbol actors, the drop-timer state
//! machine and the persisted apex record table.

pub mod actor;
pub mod store;
pub mod tracker;

pub use actor::{
    spawn, ApexActorHandle, ApexRouter, OrderSink, SaleNotice, SharedHoldings, SharedStore,
};
pub use store::ApexStore;
pub use tracker::{TickOutcome, Tracker, TrackerConfig};
