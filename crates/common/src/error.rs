//! Unified error type for apex-bot.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("data error: {0}")]
    Data(String),

    #[error("model error: {0}")]
    Model(String),

    #[error("model not found: {0}")]
    ModelNotFound(String),

    #[error("exchange error (status={status}): {message}")]
    Exchange { status: u16, message: String },

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("risk check failed: {0}")]
    RiskViolation(String),

    #[error("state invariant breached: {0}")]
    State(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("stale data: {0}")]
    StaleData(String),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether the caller should retry the failed call.
    ///
    /// Auth failures (401/403) and config errors are terminal; everything on
    /// the exchange path is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Exchange { status, .. } => *status != 401 && *status != 403,
            Error::Http(_) | Error::RateLimited { .. } | Error::StaleData(_) => true,
            _ => false,
        }
    }
}
