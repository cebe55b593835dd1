use anyhow::Context;
use sqlx::{PgExecutor, PgPool};
use uuid::Uuid;

use crate::db::models::{Claim, ClaimStatusEntry, MedicalBill};
use crate::repositories::bills;
use crate::repositories::store::ClaimTransition;

const COLUMNS: &str = "id, bill_id, status, portal_claim_number, submit_attempts, poll_attempts, \
     last_error_kind, last_error_message, settlement_amount, settlement_currency, \
     submission_started_at, notify_to, created_at, updated_at";

const HISTORY_COLUMNS: &str = "claim_id, status, note, recorded_at";

const RECOVERY_NOTE: &str =
    "interrupted mid-submission, outcome unknown, manual reconciliation required";

/// Registers a bill and its claim atomically; the claim starts PENDING with
/// one history entry.
pub async fn create(
    pool: &PgPool,
    bill: MedicalBill,
    notify_to: Option<String>,
) -> anyhow::Result<Claim> {
    let mut tx = pool.begin().await?;

    bills::insert(&mut tx, &bill).await?;

    let claim = sqlx::query_as::<_, Claim>(&format!(
        "INSERT INTO claims (id, bill_id, status, notify_to) \
         VALUES ($1, $2, 'pending', $3) \
         RETURNING {COLUMNS}"
    ))
    .bind(Uuid::new_v4())
    .bind(bill.id)
    .bind(notify_to)
    .fetch_one(&mut *tx)
    .await?;

    sqlx::query(
        "INSERT INTO claim_status_history (claim_id, status, note) \
         VALUES ($1, 'pending', 'claim registered')",
    )
    .bind(claim.id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(claim)
}

/// Atomically claims the oldest queued claim for a submission worker.
/// `submission_started_at` marks the claim in-flight; SKIP LOCKED keeps
/// concurrent workers off the same row.
pub async fn claim_next_pending(pool: &PgPool) -> anyhow::Result<Option<(Claim, MedicalBill)>> {
    let claim = sqlx::query_as::<_, Claim>(&format!(
        "WITH candidate AS ( \
           SELECT id FROM claims \
           WHERE status = 'pending' AND submission_started_at IS NULL \
           ORDER BY created_at \
           LIMIT 1 \
           FOR UPDATE SKIP LOCKED \
         ) \
         UPDATE claims c SET submission_started_at = now(), updated_at = now() \
         FROM candidate \
         WHERE c.id = candidate.id \
         RETURNING {COLUMNS}"
    ))
    .fetch_optional(pool)
    .await?;

    let Some(claim) = claim else { return Ok(None) };
    let bill = bills::get(pool, claim.bill_id)
        .await?
        .with_context(|| format!("claim {} references missing bill {}", claim.id, claim.bill_id))?;
    Ok(Some((claim, bill)))
}

/// Returns a claimed-but-unprocessed claim to the queue (circuit open,
/// shutdown before work started).
pub async fn release(pool: &PgPool, claim_id: Uuid) -> anyhow::Result<()> {
    sqlx::query(
        "UPDATE claims SET submission_started_at = NULL, updated_at = now() \
         WHERE id = $1 AND status = 'pending'",
    )
    .bind(claim_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Applies one transition atomically: claim row update plus a history entry
/// when the status actually changes. Rejects transitions out of a terminal
/// status and a second portal claim number.
pub async fn apply_transition(
    pool: &PgPool,
    claim_id: Uuid,
    transition: ClaimTransition,
) -> anyhow::Result<Claim> {
    let mut tx = pool.begin().await?;

    let current = sqlx::query_as::<_, Claim>(&format!(
        "SELECT {COLUMNS} FROM claims WHERE id = $1 FOR UPDATE"
    ))
    .bind(claim_id)
    .fetch_optional(&mut *tx)
    .await?
    .with_context(|| format!("claim {claim_id} not found"))?;

    let new_status = transition.new_status.unwrap_or(current.status);
    if current.status.is_terminal() && new_status != current.status {
        anyhow::bail!(
            "claim {claim_id} is terminal ({}), refusing transition to {}",
            current.status.as_str(),
            new_status.as_str()
        );
    }
    if transition.portal_claim_number.is_some() && current.portal_claim_number.is_some() {
        anyhow::bail!("claim {claim_id} already has a portal claim number");
    }

    let portal_claim_number =
        transition.portal_claim_number.or(current.portal_claim_number);
    let (error_kind, error_message) = match transition.error {
        Some((kind, message)) => (Some(kind), Some(message)),
        None => (current.last_error_kind, current.last_error_message),
    };
    let (settlement_amount, settlement_currency) = match transition.settlement {
        Some((amount, currency)) => (Some(amount), Some(currency)),
        None => (current.settlement_amount, current.settlement_currency),
    };

    let updated = sqlx::query_as::<_, Claim>(&format!(
        "UPDATE claims SET \
           status = $2, portal_claim_number = $3, \
           submit_attempts = submit_attempts + $4, \
           poll_attempts = CASE WHEN $10 THEN 0 ELSE poll_attempts + $5 END, \
           last_error_kind = $6, last_error_message = $7, \
           settlement_amount = $8, settlement_currency = $9, \
           submission_started_at = NULL, updated_at = now() \
         WHERE id = $1 \
         RETURNING {COLUMNS}"
    ))
    .bind(claim_id)
    .bind(new_status)
    .bind(&portal_claim_number)
    .bind(transition.add_submit_attempts)
    .bind(transition.add_poll_attempts)
    .bind(error_kind)
    .bind(&error_message)
    .bind(settlement_amount)
    .bind(&settlement_currency)
    .bind(transition.reset_poll_attempts)
    .fetch_one(&mut *tx)
    .await?;

    if new_status != current.status {
        sqlx::query(
            "INSERT INTO claim_status_history (claim_id, status, note) VALUES ($1, $2, $3)",
        )
        .bind(claim_id)
        .bind(new_status)
        .bind(&transition.note)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(updated)
}

pub async fn get<'e>(executor: impl PgExecutor<'e>, claim_id: Uuid) -> anyhow::Result<Option<Claim>> {
    let claim =
        sqlx::query_as::<_, Claim>(&format!("SELECT {COLUMNS} FROM claims WHERE id = $1"))
            .bind(claim_id)
            .fetch_optional(executor)
            .await?;
    Ok(claim)
}

pub async fn list_pollable(pool: &PgPool) -> anyhow::Result<Vec<Claim>> {
    let claims = sqlx::query_as::<_, Claim>(&format!(
        "SELECT {COLUMNS} FROM claims \
         WHERE status IN ('submitted', 'under_review') \
         ORDER BY created_at"
    ))
    .fetch_all(pool)
    .await?;
    Ok(claims)
}

pub async fn list_all(pool: &PgPool) -> anyhow::Result<Vec<Claim>> {
    let claims = sqlx::query_as::<_, Claim>(&format!(
        "SELECT {COLUMNS} FROM claims ORDER BY created_at"
    ))
    .fetch_all(pool)
    .await?;
    Ok(claims)
}

pub async fn history(pool: &PgPool, claim_id: Uuid) -> anyhow::Result<Vec<ClaimStatusEntry>> {
    let entries = sqlx::query_as::<_, ClaimStatusEntry>(&format!(
        "SELECT {HISTORY_COLUMNS} FROM claim_status_history \
         WHERE claim_id = $1 ORDER BY recorded_at, id"
    ))
    .bind(claim_id)
    .fetch_all(pool)
    .await?;
    Ok(entries)
}

/// Boot-time recovery: a claim found mid-submission after a restart has an
/// unknown portal-side outcome and goes terminal for manual reconciliation.
pub async fn recover_interrupted(pool: &PgPool) -> anyhow::Result<u64> {
    let recovered = sqlx::query(
        "WITH stuck AS ( \
           SELECT id FROM claims \
           WHERE status = 'pending' AND submission_started_at IS NOT NULL \
           FOR UPDATE SKIP LOCKED \
         ), updated AS ( \
           UPDATE claims SET \
             status = 'error', \
             last_error_kind = 'ambiguous_outcome', \
             last_error_message = $1, \
             submission_started_at = NULL, \
             updated_at = now() \
           WHERE id IN (SELECT id FROM stuck) \
           RETURNING id \
         ) \
         INSERT INTO claim_status_history (claim_id, status, note) \
         SELECT id, 'error', $1 FROM updated",
    )
    .bind(RECOVERY_NOTE)
    .execute(pool)
    .await?;
    Ok(recovered.rows_affected())
}

pub fn recovery_note() -> &'static str {
    RECOVERY_NOTE
}
