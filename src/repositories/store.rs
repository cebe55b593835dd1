use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::models::{Claim, ClaimStatusEntry, MedicalBill};
use crate::db::types::{ClaimStatus, ErrorKind};
use crate::repositories::{bills, claims};

/// One atomic change to a claim. `new_status: None` means the status stays;
/// a history entry is appended only when the status actually changes.
#[derive(Debug, Default)]
pub struct ClaimTransition {
    pub new_status: Option<ClaimStatus>,
    pub note: Option<String>,
    pub error: Option<(ErrorKind, String)>,
    pub portal_claim_number: Option<String>,
    pub settlement: Option<(f64, String)>,
    pub add_submit_attempts: i32,
    pub add_poll_attempts: i32,
    /// A successful poll clears the consecutive-failure count.
    pub reset_poll_attempts: bool,
}

/// Point-in-time view of one claim with its bill and full history.
#[derive(Debug, Clone)]
pub struct ClaimRecord {
    pub claim: Claim,
    pub bill: MedicalBill,
    pub history: Vec<ClaimStatusEntry>,
}

/// Persistence seam for the pipeline. Production uses Postgres; tests use
/// an in-memory double.
#[async_trait]
pub trait ClaimStore: Send + Sync {
    /// Registers a bill and a PENDING claim for it, atomically.
    async fn create_claim(
        &self,
        bill: MedicalBill,
        notify_to: Option<String>,
    ) -> anyhow::Result<Claim>;

    /// Hands the oldest queued claim to a submission worker, marking it
    /// in-flight so no other worker can pick it up.
    async fn claim_next_pending(&self) -> anyhow::Result<Option<(Claim, MedicalBill)>>;

    /// Returns an in-flight claim to the queue untouched.
    async fn release_pending(&self, claim_id: Uuid) -> anyhow::Result<()>;

    async fn apply_transition(
        &self,
        claim_id: Uuid,
        transition: ClaimTransition,
    ) -> anyhow::Result<Claim>;

    async fn get_claim(&self, claim_id: Uuid) -> anyhow::Result<Option<Claim>>;

    async fn list_pollable(&self) -> anyhow::Result<Vec<Claim>>;

    async fn history(&self, claim_id: Uuid) -> anyhow::Result<Vec<ClaimStatusEntry>>;

    /// Read-only export: every claim with bill and history, ordered by
    /// creation time.
    async fn snapshot(&self) -> anyhow::Result<Vec<ClaimRecord>>;

    /// Marks claims interrupted mid-submission as terminal errors. Returns
    /// how many were recovered.
    async fn recover_interrupted(&self) -> anyhow::Result<u64>;
}

pub struct PgClaimStore {
    pool: PgPool,
}

impl PgClaimStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ClaimStore for PgClaimStore {
    async fn create_claim(
        &self,
        bill: MedicalBill,
        notify_to: Option<String>,
    ) -> anyhow::Result<Claim> {
        claims::create(&self.pool, bill, notify_to).await
    }

    async fn claim_next_pending(&self) -> anyhow::Result<Option<(Claim, MedicalBill)>> {
        claims::claim_next_pending(&self.pool).await
    }

    async fn release_pending(&self, claim_id: Uuid) -> anyhow::Result<()> {
        claims::release(&self.pool, claim_id).await
    }

    async fn apply_transition(
        &self,
        claim_id: Uuid,
        transition: ClaimTransition,
    ) -> anyhow::Result<Claim> {
        claims::apply_transition(&self.pool, claim_id, transition).await
    }

    async fn get_claim(&self, claim_id: Uuid) -> anyhow::Result<Option<Claim>> {
        claims::get(&self.pool, claim_id).await
    }

    async fn list_pollable(&self) -> anyhow::Result<Vec<Claim>> {
        claims::list_pollable(&self.pool).await
    }

    async fn history(&self, claim_id: Uuid) -> anyhow::Result<Vec<ClaimStatusEntry>> {
        claims::history(&self.pool, claim_id).await
    }

    async fn snapshot(&self) -> anyhow::Result<Vec<ClaimRecord>> {
        let all = claims::list_all(&self.pool).await?;
        let mut records = Vec::with_capacity(all.len());
        for claim in all {
            let bill = bills::get(&self.pool, claim.bill_id).await?.ok_or_else(|| {
                anyhow::anyhow!("claim {} references missing bill {}", claim.id, claim.bill_id)
            })?;
            let history = claims::history(&self.pool, claim.id).await?;
            records.push(ClaimRecord { claim, bill, history });
        }
        Ok(records)
    }

    async fn recover_interrupted(&self) -> anyhow::Result<u64> {
        claims::recover_interrupted(&self.pool).await
    }
}
