//! Retry wrapper: re-sends transient failures with exponential backoff.
//!
//! Rate limits, network errors and 5xx responses are retried up to
//! `max_attempts` times in total. Everything else is returned immediately.

use async_trait::async_trait;
use loopwright_core::error::ProviderError;
use loopwright_core::provider::*;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Returns `true` if the HTTP status code is transient and worth retrying.
pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

/// Exponential backoff with +/-25% jitter and a 100ms floor.
///
/// - attempt 0: ~base
/// - attempt 1: ~2 x base
/// - attempt 2: ~4 x base
pub fn retry_backoff_delay(attempt: u32, base_delay_ms: u64) -> Duration {
    let base_ms = base_delay_ms.saturating_mul(2u64.saturating_pow(attempt));
    let jitter_range = base_ms / 4;
    let jitter = if jitter_range > 0 {
        let offset = rand::thread_rng().gen_range(0..=jitter_range.saturating_mul(2));
        offset as i64 - jitter_range as i64
    } else {
        0
    };
    let delay_ms = (base_ms as i64).saturating_add(jitter).max(100) as u64;
    Duration::from_millis(delay_ms)
}

/// A provider that retries its inner provider on transient errors.
pub struct RetryProvider {
    inner: Arc<dyn Provider>,
    max_attempts: u32,
    base_delay_ms: u64,
}

impl RetryProvider {
    pub fn new(inner: Arc<dyn Provider>) -> Self {
        Self {
            inner,
            max_attempts: 3,
            base_delay_ms: 1_000,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_base_delay_ms(mut self, base_delay_ms: u64) -> Self {
        self.base_delay_ms = base_delay_ms;
        self
    }

    fn delay_for(&self, attempt: u32, error: &ProviderError) -> Duration {
        let backoff = retry_backoff_delay(attempt, self.base_delay_ms);
        match error {
            ProviderError::RateLimited { retry_after_secs } => {
                backoff.max(Duration::from_secs(*retry_after_secs))
            }
            _ => backoff,
        }
    }
}

#[async_trait]
impl Provider for RetryProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        let mut attempt = 0;
        loop {
            match self.inner.complete(request.clone()).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_transient() && attempt + 1 < self.max_attempts => {
                    let delay = self.delay_for(attempt, &e);
                    warn!(
                        provider = %self.inner.name(),
                        attempt = attempt + 1,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient provider error, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn embed(
        &self,
        request: EmbeddingRequest,
    ) -> std::result::Result<EmbeddingResponse, ProviderError> {
        let mut attempt = 0;
        loop {
            match self.inner.embed(request.clone()).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_transient() && attempt + 1 < self.max_attempts => {
                    tokio::time::sleep(self.delay_for(attempt, &e)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        self.inner.health_check().await
    }
}
