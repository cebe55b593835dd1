//! Shared doubles and fixtures for the pipeline tests: a scriptable portal,
//! an in-memory claim store with the same semantics as the Postgres one, and
//! a notifier that records everything it is asked to send.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use time::macros::date;
use uuid::Uuid;

use crate::core::time::primitive_now_utc;
use crate::db::models::{Claim, ClaimStatusEntry, MedicalBill};
use crate::db::types::ClaimStatus;
use crate::repositories::store::{ClaimRecord, ClaimStore, ClaimTransition};
use crate::schemas::{ClaimEvent, NewBill};
use crate::services::errors::PipelineError;
use crate::services::messaging::Notifier;
use crate::services::portal::{
    PortalClient, PortalSession, PortalStatusReport, SubmissionReceipt,
};

pub fn bill_request_fixture(patient: &str) -> NewBill {
    NewBill {
        patient_name: patient.to_string(),
        provider_name: "City Medical Center".into(),
        service_date: date!(2026 - 07 - 01),
        total_amount: 250.0,
        currency: "USD".into(),
        diagnosis_codes: vec!["J06.9".into()],
        treatment_description: "General consultation".into(),
        receipt_number: Some("R-1001".into()),
        insurer_guess: Some("Cigna".into()),
        document_kind: Some("receipt".into()),
        source_image: Some("https://media.invalid/bill.jpg".into()),
        extraction_confidence: 0.92,
    }
}

pub fn bill_fixture() -> MedicalBill {
    bill_request_fixture("Jane Smith").into_bill()
}

/// One scripted outcome for a portal workflow edge.
#[derive(Debug, Clone)]
pub enum PortalStep {
    Ok,
    Transient,
    Auth,
    PortalReject,
}

impl PortalStep {
    pub fn ok() -> Self {
        PortalStep::Ok
    }
    pub fn transient() -> Self {
        PortalStep::Transient
    }
    pub fn auth() -> Self {
        PortalStep::Auth
    }
    pub fn portal_reject() -> Self {
        PortalStep::PortalReject
    }

    fn into_result(self) -> Result<(), PipelineError> {
        match self {
            PortalStep::Ok => Ok(()),
            PortalStep::Transient => {
                Err(PipelineError::TransientNetwork("connection reset".into()))
            }
            PortalStep::Auth => Err(PipelineError::Auth("session expired".into())),
            PortalStep::PortalReject => {
                Err(PipelineError::Portal("form validation rejected".into()))
            }
        }
    }
}

/// One scripted outcome for a status query.
#[derive(Debug, Clone)]
pub enum StatusStep {
    Report { raw: String, settlement: Option<(f64, String)> },
    Transient,
}

impl StatusStep {
    pub fn report(raw: &str) -> Self {
        StatusStep::Report { raw: raw.to_string(), settlement: None }
    }

    pub fn report_with_settlement(raw: &str, amount: f64, currency: &str) -> Self {
        StatusStep::Report {
            raw: raw.to_string(),
            settlement: Some((amount, currency.to_string())),
        }
    }

    pub fn transient() -> Self {
        StatusStep::Transient
    }
}

#[derive(Default)]
struct MockPortalInner {
    login_script: Mutex<VecDeque<PortalStep>>,
    form_script: Mutex<VecDeque<PortalStep>>,
    upload_script: Mutex<VecDeque<PortalStep>>,
    submit_script: Mutex<VecDeque<PortalStep>>,
    status_scripts: Mutex<HashMap<String, VecDeque<StatusStep>>>,
    confirmation_text: Mutex<String>,
    sessions_opened: AtomicU32,
    sessions_closed: AtomicU32,
    submit_calls: AtomicU32,
    status_calls: AtomicU32,
}

/// Scriptable portal double. Unscripted edges succeed; unscripted status
/// queries report "received".
#[derive(Clone, Default)]
pub struct MockPortal {
    inner: Arc<MockPortalInner>,
}

impl MockPortal {
    /// A portal where every edge succeeds and submit confirms with `text`.
    pub fn happy(text: &str) -> Self {
        let portal = Self::default();
        *portal.inner.confirmation_text.lock().unwrap() = text.to_string();
        portal
    }

    pub fn script_login(&self, steps: Vec<PortalStep>) {
        *self.inner.login_script.lock().unwrap() = steps.into();
    }

    pub fn script_form(&self, steps: Vec<PortalStep>) {
        *self.inner.form_script.lock().unwrap() = steps.into();
    }

    pub fn script_upload(&self, steps: Vec<PortalStep>) {
        *self.inner.upload_script.lock().unwrap() = steps.into();
    }

    pub fn script_submit(&self, steps: Vec<PortalStep>) {
        *self.inner.submit_script.lock().unwrap() = steps.into();
    }

    pub fn script_status(&self, claim_number: &str, steps: Vec<StatusStep>) {
        self.inner
            .status_scripts
            .lock()
            .unwrap()
            .insert(claim_number.to_string(), steps.into());
    }

    pub fn sessions_closed(&self) -> u32 {
        self.inner.sessions_closed.load(Ordering::SeqCst)
    }

    pub fn submit_calls(&self) -> u32 {
        self.inner.submit_calls.load(Ordering::SeqCst)
    }

    pub fn status_calls(&self) -> u32 {
        self.inner.status_calls.load(Ordering::SeqCst)
    }

    fn next_step(script: &Mutex<VecDeque<PortalStep>>) -> Result<(), PipelineError> {
        script.lock().unwrap().pop_front().unwrap_or(PortalStep::Ok).into_result()
    }
}

#[async_trait]
impl PortalClient for MockPortal {
    async fn login(&self) -> Result<PortalSession, PipelineError> {
        Self::next_step(&self.inner.login_script)?;
        let n = self.inner.sessions_opened.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(PortalSession { token: format!("session-{n}") })
    }

    async fn fill_claim_form(
        &self,
        _session: &PortalSession,
        _bill: &MedicalBill,
    ) -> Result<(), PipelineError> {
        Self::next_step(&self.inner.form_script)
    }

    async fn upload_document(
        &self,
        _session: &PortalSession,
        _bill: &MedicalBill,
    ) -> Result<(), PipelineError> {
        Self::next_step(&self.inner.upload_script)
    }

    async fn submit(&self, _session: &PortalSession) -> Result<SubmissionReceipt, PipelineError> {
        self.inner.submit_calls.fetch_add(1, Ordering::SeqCst);
        Self::next_step(&self.inner.submit_script)?;
        Ok(SubmissionReceipt {
            confirmation_text: self.inner.confirmation_text.lock().unwrap().clone(),
        })
    }

    async fn claim_status(
        &self,
        _session: &PortalSession,
        claim_number: &str,
    ) -> Result<PortalStatusReport, PipelineError> {
        self.inner.status_calls.fetch_add(1, Ordering::SeqCst);
        let step = self
            .inner
            .status_scripts
            .lock()
            .unwrap()
            .get_mut(claim_number)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| StatusStep::report("received"));
        match step {
            StatusStep::Report { raw, settlement } => {
                let (settlement_amount, settlement_currency) = match settlement {
                    Some((amount, currency)) => (Some(amount), Some(currency)),
                    None => (None, None),
                };
                Ok(PortalStatusReport { raw_status: raw, settlement_amount, settlement_currency })
            }
            StatusStep::Transient => {
                Err(PipelineError::TransientNetwork("status endpoint timed out".into()))
            }
        }
    }

    async fn close_session(&self, _session: PortalSession) {
        self.inner.sessions_closed.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct MemoryInner {
    bills: HashMap<Uuid, MedicalBill>,
    claims: HashMap<Uuid, Claim>,
    history: HashMap<Uuid, Vec<ClaimStatusEntry>>,
    order: Vec<Uuid>,
}

/// In-memory `ClaimStore` with the same transition semantics as the
/// Postgres implementation.
#[derive(Default)]
pub struct MemoryClaimStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryClaimStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ClaimStore for MemoryClaimStore {
    async fn create_claim(
        &self,
        bill: MedicalBill,
        notify_to: Option<String>,
    ) -> anyhow::Result<Claim> {
        let mut inner = self.inner.lock().unwrap();
        let now = primitive_now_utc();
        let claim = Claim {
            id: Uuid::new_v4(),
            bill_id: bill.id,
            status: ClaimStatus::Pending,
            portal_claim_number: None,
            submit_attempts: 0,
            poll_attempts: 0,
            last_error_kind: None,
            last_error_message: None,
            settlement_amount: None,
            settlement_currency: None,
            submission_started_at: None,
            notify_to,
            created_at: now,
            updated_at: now,
        };
        inner.bills.insert(bill.id, bill);
        inner.history.insert(
            claim.id,
            vec![ClaimStatusEntry {
                claim_id: claim.id,
                status: ClaimStatus::Pending,
                note: Some("claim registered".into()),
                recorded_at: now,
            }],
        );
        inner.order.push(claim.id);
        inner.claims.insert(claim.id, claim.clone());
        Ok(claim)
    }

    async fn claim_next_pending(&self) -> anyhow::Result<Option<(Claim, MedicalBill)>> {
        let mut inner = self.inner.lock().unwrap();
        let next = inner.order.iter().copied().find(|id| {
            inner
                .claims
                .get(id)
                .map(|c| c.status == ClaimStatus::Pending && c.submission_started_at.is_none())
                .unwrap_or(false)
        });
        let Some(id) = next else { return Ok(None) };
        let now = primitive_now_utc();
        let claim = inner
            .claims
            .get_mut(&id)
            .ok_or_else(|| anyhow::anyhow!("claim {id} vanished"))?;
        claim.submission_started_at = Some(now);
        claim.updated_at = now;
        let claim = claim.clone();
        let bill = inner
            .bills
            .get(&claim.bill_id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("bill {} missing", claim.bill_id))?;
        Ok(Some((claim, bill)))
    }

    async fn release_pending(&self, claim_id: Uuid) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(claim) = inner.claims.get_mut(&claim_id) {
            if claim.status == ClaimStatus::Pending {
                claim.submission_started_at = None;
                claim.updated_at = primitive_now_utc();
            }
        }
        Ok(())
    }

    async fn apply_transition(
        &self,
        claim_id: Uuid,
        transition: ClaimTransition,
    ) -> anyhow::Result<Claim> {
        let mut inner = self.inner.lock().unwrap();
        let claim = inner
            .claims
            .get_mut(&claim_id)
            .ok_or_else(|| anyhow::anyhow!("claim {claim_id} not found"))?;

        let new_status = transition.new_status.unwrap_or(claim.status);
        if claim.status.is_terminal() && new_status != claim.status {
            anyhow::bail!(
                "claim {claim_id} is terminal ({}), refusing transition to {}",
                claim.status.as_str(),
                new_status.as_str()
            );
        }
        if transition.portal_claim_number.is_some() && claim.portal_claim_number.is_some() {
            anyhow::bail!("claim {claim_id} already has a portal claim number");
        }

        let old_status = claim.status;
        let now = primitive_now_utc();
        claim.status = new_status;
        if let Some(number) = transition.portal_claim_number {
            claim.portal_claim_number = Some(number);
        }
        claim.submit_attempts += transition.add_submit_attempts;
        if transition.reset_poll_attempts {
            claim.poll_attempts = 0;
        } else {
            claim.poll_attempts += transition.add_poll_attempts;
        }
        if let Some((kind, message)) = transition.error {
            claim.last_error_kind = Some(kind);
            claim.last_error_message = Some(message);
        }
        if let Some((amount, currency)) = transition.settlement {
            claim.settlement_amount = Some(amount);
            claim.settlement_currency = Some(currency);
        }
        claim.submission_started_at = None;
        claim.updated_at = now;
        let updated = claim.clone();

        if new_status != old_status {
            inner.history.entry(claim_id).or_default().push(ClaimStatusEntry {
                claim_id,
                status: new_status,
                note: transition.note,
                recorded_at: now,
            });
        }
        Ok(updated)
    }

    async fn get_claim(&self, claim_id: Uuid) -> anyhow::Result<Option<Claim>> {
        Ok(self.inner.lock().unwrap().claims.get(&claim_id).cloned())
    }

    async fn list_pollable(&self) -> anyhow::Result<Vec<Claim>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .order
            .iter()
            .filter_map(|id| inner.claims.get(id))
            .filter(|c| c.status.is_pollable())
            .cloned()
            .collect())
    }

    async fn history(&self, claim_id: Uuid) -> anyhow::Result<Vec<ClaimStatusEntry>> {
        Ok(self.inner.lock().unwrap().history.get(&claim_id).cloned().unwrap_or_default())
    }

    async fn snapshot(&self) -> anyhow::Result<Vec<ClaimRecord>> {
        let inner = self.inner.lock().unwrap();
        let mut records = Vec::with_capacity(inner.order.len());
        for id in &inner.order {
            let claim = inner
                .claims
                .get(id)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("claim {id} vanished"))?;
            let bill = inner
                .bills
                .get(&claim.bill_id)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("bill {} missing", claim.bill_id))?;
            let history = inner.history.get(id).cloned().unwrap_or_default();
            records.push(ClaimRecord { claim, bill, history });
        }
        Ok(records)
    }

    async fn recover_interrupted(&self) -> anyhow::Result<u64> {
        let mut inner = self.inner.lock().unwrap();
        let now = primitive_now_utc();
        let stuck: Vec<Uuid> = inner
            .claims
            .values()
            .filter(|c| c.status == ClaimStatus::Pending && c.submission_started_at.is_some())
            .map(|c| c.id)
            .collect();
        let note = crate::repositories::claims::recovery_note();
        for id in &stuck {
            if let Some(claim) = inner.claims.get_mut(id) {
                claim.status = ClaimStatus::Error;
                claim.last_error_kind = Some(crate::db::types::ErrorKind::AmbiguousOutcome);
                claim.last_error_message = Some(note.to_string());
                claim.submission_started_at = None;
                claim.updated_at = now;
            }
            inner.history.entry(*id).or_default().push(ClaimStatusEntry {
                claim_id: *id,
                status: ClaimStatus::Error,
                note: Some(note.to_string()),
                recorded_at: now,
            });
        }
        Ok(stuck.len() as u64)
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<ClaimEvent>>,
    replies: Mutex<Vec<(String, String)>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ClaimEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn replies(&self) -> Vec<(String, String)> {
        self.replies.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn claim_update(&self, event: &ClaimEvent) {
        self.events.lock().unwrap().push(event.clone());
    }

    async fn reply(&self, to: &str, body: &str) {
        self.replies.lock().unwrap().push((to.to_string(), body.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_enforces_at_most_one_in_flight() {
        let store = MemoryClaimStore::new();
        store.create_claim(bill_fixture(), None).await.unwrap();

        let first = store.claim_next_pending().await.unwrap();
        assert!(first.is_some());
        // claimed but unfinished: nothing left for a second worker
        assert!(store.claim_next_pending().await.unwrap().is_none());

        store.release_pending(first.unwrap().0.id).await.unwrap();
        assert!(store.claim_next_pending().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn memory_store_refuses_transitions_out_of_terminal() {
        let store = MemoryClaimStore::new();
        let claim = store.create_claim(bill_fixture(), None).await.unwrap();
        store
            .apply_transition(
                claim.id,
                ClaimTransition {
                    new_status: Some(ClaimStatus::Error),
                    note: Some("failed".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let result = store
            .apply_transition(
                claim.id,
                ClaimTransition {
                    new_status: Some(ClaimStatus::Submitted),
                    ..Default::default()
                },
            )
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn memory_store_sets_claim_number_exactly_once() {
        let store = MemoryClaimStore::new();
        let claim = store.create_claim(bill_fixture(), None).await.unwrap();
        store
            .apply_transition(
                claim.id,
                ClaimTransition {
                    new_status: Some(ClaimStatus::Submitted),
                    portal_claim_number: Some("CLM-1".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let result = store
            .apply_transition(
                claim.id,
                ClaimTransition {
                    portal_claim_number: Some("CLM-2".into()),
                    ..Default::default()
                },
            )
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn memory_store_recovers_interrupted_claims() {
        let store = MemoryClaimStore::new();
        let claim = store.create_claim(bill_fixture(), None).await.unwrap();
        store.claim_next_pending().await.unwrap();

        let recovered = store.recover_interrupted().await.unwrap();
        assert_eq!(recovered, 1);

        let claim = store.get_claim(claim.id).await.unwrap().unwrap();
        assert_eq!(claim.status, ClaimStatus::Error);
        assert!(claim.submission_started_at.is_none());

        let history = store.history(claim.id).await.unwrap();
        assert_eq!(history.last().unwrap().status, ClaimStatus::Error);
    }

    #[tokio::test]
    async fn snapshot_lists_claims_in_creation_order_with_history() {
        let store = MemoryClaimStore::new();
        let first = store.create_claim(bill_fixture(), None).await.unwrap();
        let second = store.create_claim(bill_fixture(), None).await.unwrap();

        let records = store.snapshot().await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].claim.id, first.id);
        assert_eq!(records[1].claim.id, second.id);
        assert!(records.iter().all(|r| !r.history.is_empty()));
        assert!(records.iter().all(|r| r.bill.id == r.claim.bill_id));
    }

    #[tokio::test]
    async fn history_is_ordered_and_ends_at_current_status() {
        let store = MemoryClaimStore::new();
        let claim = store.create_claim(bill_fixture(), None).await.unwrap();
        store
            .apply_transition(
                claim.id,
                ClaimTransition {
                    new_status: Some(ClaimStatus::Submitted),
                    portal_claim_number: Some("CLM-H".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        store
            .apply_transition(
                claim.id,
                ClaimTransition {
                    new_status: Some(ClaimStatus::Approved),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let current = store.get_claim(claim.id).await.unwrap().unwrap();
        let history = store.history(claim.id).await.unwrap();
        assert!(!history.is_empty());
        assert!(history.windows(2).all(|w| w[0].recorded_at <= w[1].recorded_at));
        assert_eq!(history.last().unwrap().status, current.status);
    }
}
