use serde::Deserialize;
use time::Date;
use uuid::Uuid;
use validator::Validate;

use crate::core::time::primitive_now_utc;
use crate::db::models::MedicalBill;
use crate::db::types::ClaimStatus;

/// Extraction output offered for claim registration. Validated before a
/// claim is created; nothing invalid is silently dropped.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewBill {
    #[validate(length(min = 1, message = "patient name is required"))]
    pub patient_name: String,
    #[validate(length(min = 1, message = "provider name is required"))]
    pub provider_name: String,
    pub service_date: Date,
    #[validate(range(min = 0.01, message = "total amount must be positive"))]
    pub total_amount: f64,
    #[validate(length(min = 3, max = 3, message = "currency must be a 3-letter code"))]
    pub currency: String,
    #[serde(default)]
    pub diagnosis_codes: Vec<String>,
    #[validate(length(min = 1, message = "treatment description is required"))]
    pub treatment_description: String,
    pub receipt_number: Option<String>,
    pub insurer_guess: Option<String>,
    pub document_kind: Option<String>,
    pub source_image: Option<String>,
    #[validate(range(min = 0.0, max = 1.0, message = "confidence must be within [0, 1]"))]
    pub extraction_confidence: f64,
}

impl NewBill {
    pub fn into_bill(self) -> MedicalBill {
        MedicalBill {
            id: Uuid::new_v4(),
            patient_name: self.patient_name,
            provider_name: self.provider_name,
            service_date: self.service_date,
            total_amount: self.total_amount,
            currency: self.currency,
            diagnosis_codes: self.diagnosis_codes,
            treatment_description: self.treatment_description,
            receipt_number: self.receipt_number,
            insurer_guess: self.insurer_guess,
            document_kind: self.document_kind,
            source_image: self.source_image,
            extraction_confidence: self.extraction_confidence,
            created_at: primitive_now_utc(),
        }
    }
}

/// Emitted on every claim status transition for best-effort notification.
#[derive(Debug, Clone)]
pub struct ClaimEvent {
    pub claim_id: Uuid,
    pub old_status: ClaimStatus,
    pub new_status: ClaimStatus,
    pub detail: Option<String>,
    pub notify_to: Option<String>,
}
