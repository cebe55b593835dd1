use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::db::types::BreakerMode;
use crate::resilience::ResilientError;

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub cool_down: Duration,
}

#[derive(Debug)]
struct BreakerState {
    mode: BreakerMode,
    consecutive_failures: u32,
    open_until: Option<Instant>,
    /// At most one trial call is in flight while half-open.
    trial_in_flight: bool,
}

/// Portable view of breaker state for persistence across restarts.
#[derive(Debug, Clone, PartialEq)]
pub struct BreakerSnapshot {
    pub mode: BreakerMode,
    pub consecutive_failures: u32,
    /// Remaining cool-down at snapshot time, if the circuit is open.
    pub open_remaining: Option<Duration>,
}

/// One instance per guarded dependency, shared by Arc and mutated under a
/// single lock.
pub struct CircuitBreaker {
    dependency: String,
    config: BreakerConfig,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(dependency: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            dependency: dependency.into(),
            config,
            state: Mutex::new(BreakerState {
                mode: BreakerMode::Closed,
                consecutive_failures: 0,
                open_until: None,
                trial_in_flight: false,
            }),
        }
    }

    pub fn dependency(&self) -> &str {
        &self.dependency
    }

    /// Admission check before a guarded call. While open, fails fast until
    /// the cool-down elapses; then exactly one trial call passes.
    pub async fn preflight<E: ResilientError>(&self) -> Result<(), E> {
        let mut state = self.state.lock().await;
        match state.mode {
            BreakerMode::Closed => Ok(()),
            BreakerMode::Open => {
                let elapsed = state.open_until.map(|t| Instant::now() >= t).unwrap_or(true);
                if elapsed {
                    state.mode = BreakerMode::HalfOpen;
                    state.trial_in_flight = true;
                    tracing::info!(dependency = %self.dependency, "circuit half-open, admitting trial call");
                    Ok(())
                } else {
                    Err(E::circuit_open(&self.dependency))
                }
            }
            BreakerMode::HalfOpen => {
                if state.trial_in_flight {
                    Err(E::circuit_open(&self.dependency))
                } else {
                    state.trial_in_flight = true;
                    Ok(())
                }
            }
        }
    }

    pub async fn record_success(&self) {
        let mut state = self.state.lock().await;
        if state.mode != BreakerMode::Closed {
            tracing::info!(dependency = %self.dependency, "circuit closed");
        }
        state.mode = BreakerMode::Closed;
        state.consecutive_failures = 0;
        state.open_until = None;
        state.trial_in_flight = false;
    }

    pub async fn record_failure(&self) {
        let mut state = self.state.lock().await;
        state.consecutive_failures += 1;
        state.trial_in_flight = false;
        let should_open = state.mode == BreakerMode::HalfOpen
            || state.consecutive_failures >= self.config.failure_threshold;
        if should_open {
            state.mode = BreakerMode::Open;
            state.open_until = Some(Instant::now() + self.config.cool_down);
            tracing::warn!(
                dependency = %self.dependency,
                failures = state.consecutive_failures,
                cool_down_s = self.config.cool_down.as_secs(),
                "circuit opened"
            );
        }
    }

    pub async fn snapshot(&self) -> BreakerSnapshot {
        let state = self.state.lock().await;
        let open_remaining = state
            .open_until
            .map(|t| t.saturating_duration_since(Instant::now()))
            .filter(|d| !d.is_zero());
        BreakerSnapshot {
            mode: state.mode,
            consecutive_failures: state.consecutive_failures,
            open_remaining,
        }
    }

    pub async fn restore(&self, snapshot: BreakerSnapshot) {
        let mut state = self.state.lock().await;
        state.mode = snapshot.mode;
        state.consecutive_failures = snapshot.consecutive_failures;
        state.open_until = snapshot.open_remaining.map(|d| Instant::now() + d);
        state.trial_in_flight = false;
    }

    #[cfg(test)]
    pub async fn mode(&self) -> BreakerMode {
        self.state.lock().await.mode
    }
}
