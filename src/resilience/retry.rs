use rand::Rng;
use std::future::Future;
use std::time::Duration;

use crate::resilience::ResilientError;

/// Bounded retry with exponential backoff and jitter. Knows nothing about
/// claims; classification lives on the error type.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        Self { max_retries, initial_delay, max_delay }
    }

    /// Delay before retry number `attempt` (0-based): initial * 2^attempt,
    /// capped, with up to 10% random jitter added.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = self.initial_delay.saturating_mul(2u32.saturating_pow(attempt));
        let capped = exp.min(self.max_delay);
        let jitter_cap = capped.as_millis() as u64 / 10;
        let jitter = if jitter_cap == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_cap)
        };
        capped + Duration::from_millis(jitter)
    }

    /// Runs `op` up to `1 + max_retries` times, sleeping between attempts.
    /// Non-retryable errors are returned immediately.
    pub async fn run<T, E, F, Fut>(&self, mut op: F) -> Result<T, E>
    where
        E: ResilientError,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 0u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < self.max_retries => {
                    let delay = self.backoff_delay(attempt);
                    tracing::warn!(
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retryable failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
