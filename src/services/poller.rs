use std::sync::Arc;
use tokio::sync::Semaphore;

use crate::core::metrics;
use crate::db::models::Claim;
use crate::db::types::{ClaimStatus, ErrorKind};
use crate::repositories::store::{ClaimStore, ClaimTransition};
use crate::resilience::{run_guarded, CircuitBreaker, RetryPolicy};
use crate::schemas::ClaimEvent;
use crate::services::errors::PipelineError;
use crate::services::messaging::Notifier;
use crate::services::portal::{PortalClient, PortalSession, PortalStatusReport};

/// Portal status vocabulary mapped to claim statuses. Anything not listed
/// here goes terminal rather than being passed through silently.
pub fn map_portal_status(raw: &str) -> Option<ClaimStatus> {
    match raw.trim().to_lowercase().as_str() {
        "submitted" | "received" | "claim received" => Some(ClaimStatus::Submitted),
        "processing" | "in progress" | "pending" | "under review" | "in review" => {
            Some(ClaimStatus::UnderReview)
        }
        "approved" | "settled" | "paid" | "completed" => Some(ClaimStatus::Approved),
        "rejected" | "denied" | "declined" => Some(ClaimStatus::Rejected),
        _ => None,
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PollCycleReport {
    pub polled: u64,
    pub transitioned: u64,
}

/// Periodic status check over every post-submission, non-terminal claim.
/// One portal login per cycle; per-claim queries fan out under their own
/// concurrency bound, and one claim's failure never touches the others.
#[derive(Clone)]
pub struct StatusPoller {
    store: Arc<dyn ClaimStore>,
    portal: Arc<dyn PortalClient>,
    notifier: Arc<dyn Notifier>,
    breaker: Arc<CircuitBreaker>,
    retry: RetryPolicy,
    concurrency: usize,
    max_poll_attempts: i32,
}

impl StatusPoller {
    pub fn new(
        store: Arc<dyn ClaimStore>,
        portal: Arc<dyn PortalClient>,
        notifier: Arc<dyn Notifier>,
        breaker: Arc<CircuitBreaker>,
        retry: RetryPolicy,
        concurrency: usize,
        max_poll_attempts: i32,
    ) -> Self {
        Self { store, portal, notifier, breaker, retry, concurrency, max_poll_attempts }
    }

    pub async fn run_cycle(&self) -> anyhow::Result<PollCycleReport> {
        let claims = self.store.list_pollable().await?;
        if claims.is_empty() {
            return Ok(PollCycleReport::default());
        }

        let session = match run_guarded(&self.breaker, &self.retry, || self.portal.login()).await
        {
            Ok(session) => session,
            Err(err @ PipelineError::CircuitOpen(_)) => {
                tracing::warn!(error = %err, "skipping poll cycle, circuit open");
                return Ok(PollCycleReport::default());
            }
            Err(err) => {
                // One bad login fails the whole cycle; claims are retried on
                // the next cycle without burning their poll budgets.
                tracing::warn!(error = %err, "skipping poll cycle, portal login failed");
                return Ok(PollCycleReport::default());
            }
        };

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut join_set = tokio::task::JoinSet::new();
        let mut report = PollCycleReport::default();

        for claim in claims {
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            report.polled += 1;
            let poller = self.clone();
            let session = session.clone();
            join_set.spawn(async move {
                let changed = poller.poll_one(&session, claim).await;
                drop(permit);
                changed
            });
        }

        while let Some(result) = join_set.join_next().await {
            match result {
                Ok(true) => report.transitioned += 1,
                Ok(false) => {}
                Err(err) => tracing::error!(error = %err, "poll task panicked"),
            }
        }

        self.portal.close_session(session).await;
        metrics::poll_cycle_completed(report.polled);
        tracing::info!(polled = report.polled, transitioned = report.transitioned, "poll cycle complete");
        Ok(report)
    }

    /// Returns whether the claim's status changed. Failures are isolated to
    /// the claim and recorded against its poll budget.
    async fn poll_one(&self, session: &PortalSession, claim: Claim) -> bool {
        let Some(claim_number) = claim.portal_claim_number.clone() else {
            tracing::error!(claim_id = %claim.id, "pollable claim without portal claim number");
            return false;
        };

        let outcome = run_guarded(&self.breaker, &self.retry, || {
            self.portal.claim_status(session, &claim_number)
        })
        .await;

        match outcome {
            Ok(status_report) => self.apply_report(&claim, status_report).await,
            Err(PipelineError::CircuitOpen(_)) => {
                // dependency outage, does not count against this claim
                false
            }
            Err(err) => self.record_failed_poll(&claim, err).await,
        }
    }

    async fn apply_report(&self, claim: &Claim, status_report: PortalStatusReport) -> bool {
        let Some(mapped) = map_portal_status(&status_report.raw_status) else {
            tracing::warn!(
                claim_id = %claim.id,
                raw = %status_report.raw_status,
                "unrecognized portal status, marking claim for manual review"
            );
            let message =
                format!("unrecognized portal status: {}", status_report.raw_status);
            let transition = ClaimTransition {
                new_status: Some(ClaimStatus::Error),
                note: Some(message.clone()),
                error: Some((ErrorKind::Portal, message.clone())),
                reset_poll_attempts: true,
                ..Default::default()
            };
            return self.transition(claim, transition, Some(message)).await;
        };

        let settlement = status_report
            .settlement_amount
            .map(|amount| {
                (amount, status_report.settlement_currency.clone().unwrap_or_else(|| "USD".into()))
            });

        // Portals sometimes answer with earlier vocabulary after a claim has
        // already advanced. A status at or behind the current one is no news,
        // never a rewind of the forward-only chain.
        if mapped.progress_rank() <= claim.status.progress_rank() {
            if mapped != claim.status {
                tracing::debug!(
                    claim_id = %claim.id,
                    current = ?claim.status,
                    reported = ?mapped,
                    "portal reported an earlier status, ignoring"
                );
            }
            // healthy poll; clear the failure streak
            let transition =
                ClaimTransition { reset_poll_attempts: true, settlement, ..Default::default() };
            self.transition(claim, transition, None).await;
            return false;
        }

        let detail = match &settlement {
            Some((amount, currency)) => {
                Some(format!("portal status {}, settlement {amount} {currency}", status_report.raw_status))
            }
            None => Some(format!("portal status {}", status_report.raw_status)),
        };
        let transition = ClaimTransition {
            new_status: Some(mapped),
            note: detail.clone(),
            settlement,
            reset_poll_attempts: true,
            ..Default::default()
        };
        self.transition(claim, transition, detail).await
    }

    async fn record_failed_poll(&self, claim: &Claim, err: PipelineError) -> bool {
        let attempts_after = claim.poll_attempts + 1;
        if attempts_after >= self.max_poll_attempts {
            let exhausted = PipelineError::PollExhausted { attempts: attempts_after };
            let message = format!("{exhausted}; last error: {err}");
            tracing::warn!(claim_id = %claim.id, error = %message, "poll budget exhausted");
            metrics::claim_failed("poll_exhausted");
            let transition = ClaimTransition {
                new_status: Some(ClaimStatus::Error),
                note: Some(message.clone()),
                error: Some((ErrorKind::PollExhausted, message.clone())),
                add_poll_attempts: 1,
                ..Default::default()
            };
            return self.transition(claim, transition, Some(message)).await;
        }

        tracing::warn!(claim_id = %claim.id, attempts = attempts_after, error = %err, "status poll failed");
        let transition = ClaimTransition {
            add_poll_attempts: 1,
            error: err.kind().map(|kind| (kind, err.to_string())),
            ..Default::default()
        };
        self.transition(claim, transition, None).await;
        false
    }

    async fn transition(
        &self,
        claim: &Claim,
        transition: ClaimTransition,
        detail: Option<String>,
    ) -> bool {
        let new_status = transition.new_status;
        match self.store.apply_transition(claim.id, transition).await {
            Ok(updated) => {
                let changed = updated.status != claim.status;
                if changed {
                    let event = ClaimEvent {
                        claim_id: updated.id,
                        old_status: claim.status,
                        new_status: updated.status,
                        detail,
                        notify_to: updated.notify_to.clone(),
                    };
                    self.notifier.claim_update(&event).await;
                }
                changed
            }
            Err(err) => {
                tracing::error!(
                    claim_id = %claim.id,
                    target_status = ?new_status,
                    error = %err,
                    "failed to persist poll transition"
                );
                false
            }
        }
    }
}
