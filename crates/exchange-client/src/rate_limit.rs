//! Outbound call pacing: a token bucket plus a consecutive-error
//! cool-down.

use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use governor::{Quota, RateLimiter as GovLimiter};
use tracing::warn;

use common::ApiConfig;

type DirectLimiter = GovLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Per-minute token bucket with an error circuit: after
/// `max_consecutive_errors` failures the limiter refuses calls for
/// `error_cooldown_seconds`. A success resets the error count.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    limiter: Arc<DirectLimiter>,
    consecutive_errors: Arc<AtomicU32>,
    cooldown_until_ms: Arc<AtomicU64>,
    max_consecutive_errors: u32,
    cooldown_ms: u64,
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

impl RateLimiter {
    pub fn new(config: &ApiConfig) -> Self {
        let per_minute = NonZeroU32::new(config.calls_per_minute.max(1))
            .unwrap_or(NonZeroU32::MIN);
        Self {
            limiter: Arc::new(GovLimiter::direct(Quota::per_minute(per_minute))),
            consecutive_errors: Arc::new(AtomicU32::new(0)),
            cooldown_until_ms: Arc::new(AtomicU64::new(0)),
            max_consecutive_errors: config.max_consecutive_errors.max(1),
            cooldown_ms: config.error_cooldown_seconds * 1_000,
        }
    }

    /// True when a call may go out right now: not cooling down and a
    /// token is available.
    pub fn can_call(&self) -> bool {
        if now_ms() < self.cooldown_until_ms.load(Ordering::Acquire) {
            return false;
        }
        self.limiter.check().is_ok()
    }

    /// Wait for a token, still subject to the error cool-down.
    pub async fn acquire(&self) -> bool {
        if now_ms() < self.cooldown_until_ms.load(Ordering::Acquire) {
            return false;
        }
        self.limiter.until_ready().await;
        true
    }

    pub fn record_success(&self) {
        self.consecutive_errors.store(0, Ordering::Release);
    }

    pub fn record_error(&self) {
        let errors = self.consecutive_errors.fetch_add(1, Ordering::AcqRel) + 1;
        if errors >= self.max_consecutive_errors {
            let until = now_ms() + self.cooldown_ms;
            self.cooldown_until_ms.store(until, Ordering::Release);
            self.consecutive_errors.store(0, Ordering::Release);
            warn!(errors, cooldown_ms = self.cooldown_ms, "api circuit opened");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(calls_per_minute: u32, max_errors: u32) -> ApiConfig {
        ApiConfig {
            calls_per_minute,
            max_consecutive_errors: max_errors,
            error_cooldown_seconds: 60,
            backoff_factor: 2.0,
            timeout_seconds: 15,
        }
    }

    #[test]
    fn tokens_run_out() {
        let limiter = RateLimiter::new(&config(2, 5));
        assert!(limiter.can_call());
        assert!(limiter.can_call());
        assert!(!limiter.can_call());
    }

    #[test]
    fn error_streak_opens_the_circuit() {
        let limiter = RateLimiter::new(&config(100, 3));
        limiter.record_error();
        limiter.record_error();
        assert!(limiter.can_call());
        limiter.record_error();
        assert!(!limiter.can_call());
    }

    #[test]
    fn success_resets_the_streak() {
        let limiter = RateLimiter::new(&config(100, 2));
        limiter.record_error();
        limiter.record_success();
        limiter.record_error();
        assert!(limiter.can_call());
    }
}
