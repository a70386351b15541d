//! HTTP client for the external order endpoint.

use std::time::Duration;

use tracing::{debug, warn};

use common::{ApiConfig, Error, OrderRequest, OrderResponse, Result};

use crate::rate_limit::RateLimiter;
use crate::retry::RetryPolicy;

#[derive(Debug, Clone)]
pub struct OrderClient {
    client: reqwest::Client,
    url: String,
    limiter: RateLimiter,
    retry: RetryPolicy,
}

impl OrderClient {
    pub fn new(url: &str, config: &ApiConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(4)
            .tcp_keepalive(Duration::from_secs(30))
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| Error::Config(format!("http client: {e}")))?;
        Ok(Self {
            client,
            url: url.to_string(),
            limiter: RateLimiter::new(config),
            retry: RetryPolicy {
                backoff_factor: config.backoff_factor,
                ..RetryPolicy::default()
            },
        })
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Place one order. Rate-limited, retried per policy; 4xx statuses
    /// surface as non-retryable `Exchange` errors except 429.
    pub async fn place_order(&self, request: &OrderRequest) -> Result<OrderResponse> {
        if !self.limiter.acquire().await {
            return Err(Error::RateLimited { retry_after_ms: 0 });
        }
        let result = self
            .retry
            .run("place_order", || self.send(request))
            .await;
        match &result {
            Ok(_) => self.limiter.record_success(),
            Err(e) => {
                warn!(coin = %request.coin_id, error = %e, "order failed");
                self.limiter.record_error();
            }
        }
        result
    }

    async fn send(&self, request: &OrderRequest) -> Result<OrderResponse> {
        let response = self
            .client
            .post(&self.url)
            .json(request)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after_ms = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|secs| secs * 1_000)
                .unwrap_or(1_000);
            return Err(Error::RateLimited { retry_after_ms });
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(Error::Exchange {
                status: status.as_u16(),
                message,
            });
        }

        let body: OrderResponse = response
            .json()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;
        if !body.success {
            return Err(Error::Exchange {
                status: status.as_u16(),
                message: body.message,
            });
        }
        debug!(coin = %request.coin_id, amount = request.amount, "order accepted");
        Ok(body)
    }
}
