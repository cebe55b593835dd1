use sqlx::{PgExecutor, Postgres, Transaction};
use uuid::Uuid;

use crate::db::models::MedicalBill;

const COLUMNS: &str = "id, patient_name, provider_name, service_date, total_amount, currency, \
     diagnosis_codes, treatment_description, receipt_number, insurer_guess, document_kind, \
     source_image, extraction_confidence, created_at";

pub async fn insert(
    tx: &mut Transaction<'_, Postgres>,
    bill: &MedicalBill,
) -> anyhow::Result<()> {
    sqlx::query(
        "INSERT INTO medical_bills \
         (id, patient_name, provider_name, service_date, total_amount, currency, \
          diagnosis_codes, treatment_description, receipt_number, insurer_guess, \
          document_kind, source_image, extraction_confidence, created_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)",
    )
    .bind(bill.id)
    .bind(&bill.patient_name)
    .bind(&bill.provider_name)
    .bind(bill.service_date)
    .bind(bill.total_amount)
    .bind(&bill.currency)
    .bind(&bill.diagnosis_codes)
    .bind(&bill.treatment_description)
    .bind(&bill.receipt_number)
    .bind(&bill.insurer_guess)
    .bind(&bill.document_kind)
    .bind(&bill.source_image)
    .bind(bill.extraction_confidence)
    .bind(bill.created_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

pub async fn get<'e>(
    executor: impl PgExecutor<'e>,
    bill_id: Uuid,
) -> anyhow::Result<Option<MedicalBill>> {
    let bill = sqlx::query_as::<_, MedicalBill>(&format!(
        "SELECT {COLUMNS} FROM medical_bills WHERE id = $1"
    ))
    .bind(bill_id)
    .fetch_optional(executor)
    .await?;
    Ok(bill)
}
