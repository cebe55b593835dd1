pub mod breaker;
pub mod retry;

pub use breaker::{BreakerConfig, BreakerSnapshot, CircuitBreaker};
pub use retry::RetryPolicy;

use std::future::Future;

/// Classification hooks the resilience layer needs from an error type.
/// Keeps retry and breaker logic free of any claim knowledge.
pub trait ResilientError: std::fmt::Display {
    /// Worth another attempt after a backoff.
    fn is_retryable(&self) -> bool;

    /// Signals dependency ill-health (as opposed to bad input).
    fn counts_against_breaker(&self) -> bool;

    /// The fast-fail error produced when the circuit rejects a call.
    fn circuit_open(dependency: &str) -> Self;
}

/// Composes breaker and retry around one unit of work: breaker preflight on
/// every attempt, outcome recorded on every attempt, retryable failures
/// backed off within the policy's budget.
pub async fn run_guarded<T, E, F, Fut>(
    breaker: &CircuitBreaker,
    retry: &RetryPolicy,
    mut op: F,
) -> Result<T, E>
where
    E: ResilientError,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0u32;
    loop {
        breaker.preflight::<E>().await?;
        match op().await {
            Ok(value) => {
                breaker.record_success().await;
                return Ok(value);
            }
            Err(err) => {
                if err.counts_against_breaker() {
                    breaker.record_failure().await;
                }
                if err.is_retryable() && attempt < retry.max_retries {
                    let delay = retry.backoff_delay(attempt);
                    tracing::warn!(
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "guarded call failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                } else {
                    return Err(err);
                }
            }
        }
    }
}
