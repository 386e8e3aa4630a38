//! Retry logic for generation calls
//!
//! Exponential backoff with jitter for transient provider errors (rate
//! limiting, gateway failures). Whether an error is transient is decided by
//! the client via `GenerationClient::is_retryable`.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

/// Backoff configuration for one call site.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, including the first.
    pub max_attempts: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryConfig {
    /// Delay before the given retry (1-based), exponential with ±25% jitter.
    fn delay_for(&self, retry: usize) -> Duration {
        let exp = self.base_delay.saturating_mul(1u32 << (retry - 1).min(16) as u32);
        let capped = exp.min(self.max_delay);
        let jitter = rand::thread_rng().gen_range(0.75..1.25);
        capped.mul_f64(jitter)
    }
}

/// Run `operation` until it succeeds, the error is not retryable, or the
/// attempt budget is exhausted. Returns the last error in the failure cases.
pub async fn with_retry<T, F, Fut, R>(
    config: &RetryConfig,
    is_retryable: R,
    mut operation: F,
) -> anyhow::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
    R: Fn(&anyhow::Error) -> bool,
{
    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < config.max_attempts && is_retryable(&e) => {
                let delay = config.delay_for(attempt);
                warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Retryable generation error: {e}"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
