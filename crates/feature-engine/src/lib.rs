//! Deterministic feature engineering over OHLCV bars.

pub mod engine;
pub mod indicators;
pub mod insight;
pub mod pca;

pub use engine::{FeatureEngine, FeatureMatrix, ENGINE_VERSION, MIN_WINDOW};
pub use insight::{extract, InsightReport, MomentumState, TrendDirection};
