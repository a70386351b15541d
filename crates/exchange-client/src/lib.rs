//! Outbound order plumbing: HTTP client, pacing and retries.

pub mod client;
pub mod rate_limit;
pub mod retry;

pub use client::OrderClient;
pub use rate_limit::RateLimiter;
pub use retry::RetryPolicy;
