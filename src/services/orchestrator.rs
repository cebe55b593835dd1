use std::sync::Arc;
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use uuid::Uuid;
use validator::Validate;

use crate::core::metrics;
use crate::db::models::{Claim, MedicalBill};
use crate::db::types::{ClaimStatus, ErrorKind};
use crate::repositories::store::{ClaimStore, ClaimTransition};
use crate::schemas::{ClaimEvent, NewBill};
use crate::services::driver::{DriveOutcome, EdgeAttempts, SessionDriver};
use crate::services::errors::PipelineError;
use crate::services::messaging::Notifier;

pub fn error_kind_label(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::Validation => "validation",
        ErrorKind::Extraction => "extraction",
        ErrorKind::Auth => "auth",
        ErrorKind::TransientNetwork => "transient_network",
        ErrorKind::AmbiguousOutcome => "ambiguous_outcome",
        ErrorKind::CircuitOpen => "circuit_open",
        ErrorKind::PollExhausted => "poll_exhausted",
        ErrorKind::Portal => "portal",
    }
}

/// Front door of the pipeline: validates and registers incoming bills, and
/// dispatches queued claims through the portal session driver under a
/// bounded slot pool.
pub struct ClaimOrchestrator {
    store: Arc<dyn ClaimStore>,
    driver: SessionDriver,
    notifier: Arc<dyn Notifier>,
    slots: Arc<Semaphore>,
    shutdown: watch::Receiver<bool>,
    min_confidence: f64,
}

impl ClaimOrchestrator {
    pub fn new(
        store: Arc<dyn ClaimStore>,
        driver: SessionDriver,
        notifier: Arc<dyn Notifier>,
        max_concurrent_submissions: usize,
        shutdown: watch::Receiver<bool>,
        min_confidence: f64,
    ) -> Self {
        Self {
            store,
            driver,
            notifier,
            slots: Arc::new(Semaphore::new(max_concurrent_submissions)),
            shutdown,
            min_confidence,
        }
    }

    /// Validates a bill and registers a PENDING claim for it. Admission is
    /// rejected once shutdown has begun.
    pub async fn submit(
        &self,
        bill: NewBill,
        notify_to: Option<String>,
    ) -> anyhow::Result<Uuid> {
        if *self.shutdown.borrow() {
            return Err(PipelineError::Unavailable.into());
        }

        bill.validate()
            .map_err(|e| PipelineError::Validation(e.to_string()))?;
        if bill.extraction_confidence < self.min_confidence {
            return Err(PipelineError::Validation(format!(
                "extraction confidence {:.2} below threshold {:.2}",
                bill.extraction_confidence, self.min_confidence
            ))
            .into());
        }

        let claim = self.store.create_claim(bill.into_bill(), notify_to).await?;
        metrics::claim_created();
        tracing::info!(claim_id = %claim.id, "claim registered");
        Ok(claim.id)
    }

    /// Picks up at most one queued claim and drives it to a post-submission
    /// status. Returns whether the dispatcher made progress; worker loops
    /// idle when the queue is empty or the claim went straight back into it
    /// (open circuit, shutdown).
    pub async fn run_pending_once(&self) -> anyhow::Result<bool> {
        if *self.shutdown.borrow() {
            return Ok(false);
        }

        let permit = match self.slots.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return Ok(false),
        };

        let Some((claim, bill)) = self.store.claim_next_pending().await? else {
            drop(permit);
            return Ok(false);
        };

        Ok(self.process_claim(claim, bill, permit).await)
    }

    async fn process_claim(
        &self,
        claim: Claim,
        bill: MedicalBill,
        permit: OwnedSemaphorePermit,
    ) -> bool {
        tracing::info!(claim_id = %claim.id, "driving claim submission");
        let attempts = EdgeAttempts::default();
        let started = std::time::Instant::now();
        let result = self.driver.drive(&bill, &self.shutdown, &attempts).await;
        // Slot is free as soon as the portal work is done; persistence and
        // notification run outside it.
        drop(permit);
        metrics::submission_duration_seconds(started.elapsed().as_secs_f64());

        match result {
            Ok(DriveOutcome::Submitted { claim_number }) => {
                let transition = ClaimTransition {
                    new_status: Some(ClaimStatus::Submitted),
                    note: Some(format!("submitted to portal as {claim_number}")),
                    portal_claim_number: Some(claim_number.clone()),
                    add_submit_attempts: attempts.total() as i32,
                    ..Default::default()
                };
                match self.store.apply_transition(claim.id, transition).await {
                    Ok(updated) => {
                        metrics::claim_submitted();
                        tracing::info!(claim_id = %claim.id, %claim_number, "claim submitted");
                        self.notify(&claim, &updated, Some(format!("portal claim number {claim_number}")))
                            .await;
                    }
                    Err(err) => {
                        tracing::error!(claim_id = %claim.id, error = %err, "failed to persist submitted transition");
                    }
                }
                true
            }
            Ok(DriveOutcome::Cancelled) => {
                tracing::info!(claim_id = %claim.id, "submission cancelled by shutdown, requeueing");
                if let Err(err) = self.store.release_pending(claim.id).await {
                    tracing::error!(claim_id = %claim.id, error = %err, "failed to requeue cancelled claim");
                }
                false
            }
            Err(PipelineError::CircuitOpen(dependency)) => {
                // Dependency outage, not this claim's fault. Back into the
                // queue, reported as no progress so workers idle instead of
                // spinning claim/release pairs for the whole cool-down.
                tracing::warn!(claim_id = %claim.id, dependency, "circuit open, requeueing claim");
                if let Err(err) = self.store.release_pending(claim.id).await {
                    tracing::error!(claim_id = %claim.id, error = %err, "failed to requeue claim");
                }
                false
            }
            Err(err) => {
                let kind = err.kind().unwrap_or(ErrorKind::Portal);
                let message = err.to_string();
                metrics::claim_failed(error_kind_label(kind));
                tracing::warn!(claim_id = %claim.id, error = %message, "claim submission failed terminally");
                let transition = ClaimTransition {
                    new_status: Some(ClaimStatus::Error),
                    note: Some(message.clone()),
                    error: Some((kind, message.clone())),
                    add_submit_attempts: attempts.total() as i32,
                    ..Default::default()
                };
                match self.store.apply_transition(claim.id, transition).await {
                    Ok(updated) => self.notify(&claim, &updated, Some(message)).await,
                    Err(err) => {
                        tracing::error!(claim_id = %claim.id, error = %err, "failed to persist error transition");
                    }
                }
                true
            }
        }
    }

    async fn notify(&self, before: &Claim, after: &Claim, detail: Option<String>) {
        let event = ClaimEvent {
            claim_id: after.id,
            old_status: before.status,
            new_status: after.status,
            detail,
            notify_to: after.notify_to.clone(),
        };
        self.notifier.claim_update(&event).await;
    }
}
