use serde::Serialize;
use sqlx::FromRow;
use time::{Date, PrimitiveDateTime};
use uuid::Uuid;

use crate::db::types::{BreakerMode, ClaimStatus, ErrorKind};

/// Immutable extraction result. Never mutated after insert; claims reference
/// it by id.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct MedicalBill {
    pub id: Uuid,
    pub patient_name: String,
    pub provider_name: String,
    pub service_date: Date,
    pub total_amount: f64,
    pub currency: String,
    pub diagnosis_codes: Vec<String>,
    pub treatment_description: String,
    pub receipt_number: Option<String>,
    pub insurer_guess: Option<String>,
    pub document_kind: Option<String>,
    pub source_image: Option<String>,
    pub extraction_confidence: f64,
    pub created_at: PrimitiveDateTime,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Claim {
    pub id: Uuid,
    pub bill_id: Uuid,
    pub status: ClaimStatus,
    pub portal_claim_number: Option<String>,
    pub submit_attempts: i32,
    pub poll_attempts: i32,
    pub last_error_kind: Option<ErrorKind>,
    pub last_error_message: Option<String>,
    pub settlement_amount: Option<f64>,
    pub settlement_currency: Option<String>,
    /// Set while a submission worker holds the claim; NULL otherwise.
    pub submission_started_at: Option<PrimitiveDateTime>,
    pub notify_to: Option<String>,
    pub created_at: PrimitiveDateTime,
    pub updated_at: PrimitiveDateTime,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ClaimStatusEntry {
    pub claim_id: Uuid,
    pub status: ClaimStatus,
    pub note: Option<String>,
    pub recorded_at: PrimitiveDateTime,
}

/// Persisted circuit-breaker state, one row per guarded dependency.
#[derive(Debug, Clone, FromRow)]
pub struct BreakerRecord {
    pub dependency: String,
    pub mode: BreakerMode,
    pub consecutive_failures: i32,
    pub open_until: Option<PrimitiveDateTime>,
    pub updated_at: PrimitiveDateTime,
}
