//! Shared types, config, and error definitions for apex-bot.

pub mod config;
pub mod error;
pub mod types;

pub use config::{
    ApexConfig, ApiConfig, AppConfig, MemoryConfig, PathsConfig, RiskConfig, TradingConfig,
};
pub use error::Error;
pub use types::*;

/// Convenience Result alias.
pub type Result<T> = std::result::Result<T, Error>;
