use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::core::state::AppState;
use crate::core::{metrics, shutdown};
use crate::repositories::breaker as breaker_repo;
use crate::repositories::store::{ClaimStore, PgClaimStore};
use crate::resilience::{BreakerConfig, CircuitBreaker, RetryPolicy};
use crate::services::driver::SessionDriver;
use crate::services::messaging::{NoopNotifier, Notifier, WhatsappNotifier};
use crate::services::orchestrator::ClaimOrchestrator;
use crate::services::poller::StatusPoller;
use crate::services::portal::HttpPortalClient;

const IDLE_POLL_DELAY: Duration = Duration::from_secs(1);
const PORTAL_DEPENDENCY: &str = "portal";

/// Wires the pipeline together and runs it until a shutdown signal:
/// N submission workers draining the claim queue plus one periodic status
/// poll loop, all stopped through a shared watch channel.
pub async fn run(state: AppState) -> anyhow::Result<()> {
    let settings = state.settings().clone();
    let processing = &settings.processing;

    let store: Arc<dyn ClaimStore> = Arc::new(PgClaimStore::new(state.db().clone()));

    let recovered = store.recover_interrupted().await?;
    if recovered > 0 {
        tracing::warn!(recovered, "claims interrupted mid-submission marked for reconciliation");
        metrics::claim_failed("ambiguous_outcome");
    }

    let breaker = Arc::new(CircuitBreaker::new(
        PORTAL_DEPENDENCY,
        BreakerConfig {
            failure_threshold: processing.breaker_failure_threshold,
            cool_down: Duration::from_secs(processing.breaker_cool_down_seconds),
        },
    ));
    if let Some(snapshot) = breaker_repo::load(state.db(), PORTAL_DEPENDENCY).await? {
        tracing::info!(mode = ?snapshot.mode, "restored circuit breaker state");
        breaker.restore(snapshot).await;
    }

    let retry = RetryPolicy::new(
        processing.max_retries,
        Duration::from_millis(processing.retry_initial_delay_ms),
        Duration::from_millis(processing.retry_max_delay_ms),
    );

    let portal = Arc::new(HttpPortalClient::from_settings(&settings.portal)?);
    let notifier: Arc<dyn Notifier> = if settings.messaging.enabled {
        Arc::new(WhatsappNotifier::from_settings(&settings.messaging))
    } else {
        Arc::new(NoopNotifier)
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let driver = SessionDriver::new(
        portal.clone(),
        breaker.clone(),
        retry.clone(),
        processing.max_session_restarts,
    );
    let orchestrator = Arc::new(ClaimOrchestrator::new(
        store.clone(),
        driver,
        notifier.clone(),
        processing.max_concurrent_submissions,
        shutdown_rx.clone(),
        settings.extraction.min_confidence,
    ));
    let poller = StatusPoller::new(
        store.clone(),
        portal,
        notifier,
        breaker.clone(),
        retry,
        processing.poll_concurrency,
        processing.max_poll_attempts,
    );

    let mut handles: Vec<JoinHandle<()>> = Vec::new();
    for worker_id in 0..processing.max_concurrent_submissions {
        handles.push(tokio::spawn(submission_worker(
            worker_id,
            orchestrator.clone(),
            shutdown_rx.clone(),
        )));
    }
    handles.push(tokio::spawn(poll_loop(
        poller,
        Duration::from_secs(processing.poll_interval_seconds),
        shutdown_rx.clone(),
    )));

    tracing::info!(
        submission_workers = processing.max_concurrent_submissions,
        poll_interval_s = processing.poll_interval_seconds,
        "claim pipeline started"
    );

    shutdown::signal().await;
    tracing::info!("shutdown signal received, stopping workers");
    // Admissions stop immediately; in-flight drives cancel at the next edge
    // boundary.
    let _ = shutdown_tx.send(true);

    for handle in handles {
        if let Err(err) = handle.await {
            tracing::error!(error = %err, "worker task panicked");
        }
    }

    let snapshot = breaker.snapshot().await;
    if let Err(err) = breaker_repo::upsert(state.db(), PORTAL_DEPENDENCY, &snapshot).await {
        tracing::error!(error = %err, "failed to persist circuit breaker state");
    }

    tracing::info!("claim pipeline stopped");
    Ok(())
}

async fn submission_worker(
    worker_id: usize,
    orchestrator: Arc<ClaimOrchestrator>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }
        let worked = match orchestrator.run_pending_once().await {
            Ok(worked) => worked,
            Err(err) => {
                tracing::error!(worker_id, error = %err, "submission dispatch failed");
                false
            }
        };
        if !worked {
            tokio::select! {
                _ = tokio::time::sleep(IDLE_POLL_DELAY) => {}
                _ = shutdown.changed() => {}
            }
        }
    }
    tracing::debug!(worker_id, "submission worker stopped");
}

async fn poll_loop(
    poller: StatusPoller,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(err) = poller.run_cycle().await {
                    tracing::error!(error = %err, "poll cycle failed");
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    tracing::debug!("status poll loop stopped");
}
