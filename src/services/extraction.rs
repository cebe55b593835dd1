use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use crate::core::config::ExtractionSettings;
use crate::schemas::NewBill;
use crate::services::errors::PipelineError;

/// Seam for turning a bill photo into a structured `NewBill`.
#[async_trait]
pub trait BillExtractor: Send + Sync {
    async fn extract(&self, image_url: &str) -> Result<NewBill, PipelineError>;
}

const STRUCTURING_SYSTEM_PROMPT: &str = r#"You are an expert at extracting structured data from medical bills and receipts.

Extract the following information from the provided medical bill text and return it as a JSON object:

{
    "patient_name": "Full name of the patient",
    "provider_name": "Name of the medical provider/hospital/clinic",
    "service_date": "Date of service in YYYY-MM-DD format",
    "total_amount": "Total amount as a number (no currency symbols)",
    "currency": "Currency code (e.g., USD, EUR, SGD)",
    "diagnosis_codes": ["Array of diagnosis codes if available"],
    "treatment_description": "Description of treatment/services provided",
    "receipt_number": "Receipt or invoice number if available",
    "insurer_guess": "Insurer named on the bill, if any",
    "document_kind": "receipt, invoice or statement",
    "confidence": "Your confidence in this extraction as a number between 0 and 1"
}

Rules:
1. If a field is not found, use null for strings and an empty array for lists
2. Convert all monetary amounts to plain numbers
3. Be conservative; only extract information you are confident about
4. If multiple currencies are mentioned, use the one associated with the total amount

Return only the JSON object, no additional text."#;

#[derive(Debug, Deserialize)]
struct OcrResponse {
    text: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct ExtractedBill {
    patient_name: Option<String>,
    provider_name: Option<String>,
    service_date: Option<String>,
    total_amount: Option<f64>,
    currency: Option<String>,
    #[serde(default)]
    diagnosis_codes: Vec<String>,
    treatment_description: Option<String>,
    receipt_number: Option<String>,
    insurer_guess: Option<String>,
    document_kind: Option<String>,
    confidence: Option<f64>,
}

/// Turns a bill photo into a structured `NewBill`: OCR for raw text, then a
/// strict-JSON language-model pass to structure it.
pub struct BillExtractionService {
    client: reqwest::Client,
    settings: ExtractionSettings,
}

#[async_trait]
impl BillExtractor for BillExtractionService {
    async fn extract(&self, image_url: &str) -> Result<NewBill, PipelineError> {
        let raw_text = self.ocr(image_url).await?;
        tracing::debug!(chars = raw_text.len(), "ocr text extracted");
        if raw_text.trim().is_empty() {
            return Err(PipelineError::Extraction("document contains no readable text".into()));
        }
        let bill = self.structure(&raw_text).await?;
        tracing::info!(patient = %bill.patient_name, "bill data extracted");
        Ok(bill)
    }
}

impl BillExtractionService {
    pub(crate) fn from_settings(settings: &ExtractionSettings) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_seconds))
            .build()?;
        Ok(Self { client, settings: settings.clone() })
    }

    async fn ocr(&self, image_url: &str) -> Result<String, PipelineError> {
        let url = format!("{}/api/v1/ocr", self.settings.ocr_base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .header("X-Api-Key", &self.settings.ocr_api_key)
            .json(&json!({ "file_url": image_url, "langs": "eng" }))
            .send()
            .await
            .map_err(|e| PipelineError::Extraction(format!("ocr request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(PipelineError::Extraction(format!(
                "ocr service returned {}",
                response.status()
            )));
        }
        let body: OcrResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::Extraction(format!("malformed ocr response: {e}")))?;
        Ok(body.text)
    }

    async fn structure(&self, raw_text: &str) -> Result<NewBill, PipelineError> {
        let url = format!(
            "{}/chat/completions",
            self.settings.openai_base_url.trim_end_matches('/')
        );
        let payload = json!({
            "model": self.settings.model,
            "temperature": 0.1,
            "max_tokens": self.settings.max_tokens,
            "messages": [
                { "role": "system", "content": STRUCTURING_SYSTEM_PROMPT },
                { "role": "user", "content": format!("Extract structured data from this medical bill:\n\n{raw_text}") },
            ],
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.settings.openai_api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| PipelineError::Extraction(format!("structuring request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(PipelineError::Extraction(format!(
                "structuring service returned {}",
                response.status()
            )));
        }
        let body: ChatCompletionResponse = response.json().await.map_err(|e| {
            PipelineError::Extraction(format!("malformed structuring response: {e}"))
        })?;
        let content = body
            .choices
            .first()
            .map(|choice| choice.message.content.as_str())
            .ok_or_else(|| PipelineError::Extraction("structuring response had no choices".into()))?;

        parse_extracted_bill(content)
    }
}

/// Parses the model's JSON (tolerating markdown fences) into a `NewBill`.
pub fn parse_extracted_bill(content: &str) -> Result<NewBill, PipelineError> {
    let stripped = strip_code_fences(content);
    let extracted: ExtractedBill = serde_json::from_str(stripped)
        .map_err(|e| PipelineError::Extraction(format!("model returned invalid JSON: {e}")))?;

    let service_date_raw = extracted
        .service_date
        .ok_or_else(|| PipelineError::Extraction("no service date extracted".into()))?;
    let format = time::macros::format_description!("[year]-[month]-[day]");
    let service_date = time::Date::parse(&service_date_raw, &format).map_err(|e| {
        PipelineError::Extraction(format!("unparseable service date {service_date_raw}: {e}"))
    })?;

    Ok(NewBill {
        patient_name: extracted.patient_name.unwrap_or_default(),
        provider_name: extracted.provider_name.unwrap_or_default(),
        service_date,
        total_amount: extracted.total_amount.unwrap_or(0.0),
        currency: extracted.currency.unwrap_or_else(|| "USD".into()),
        diagnosis_codes: extracted.diagnosis_codes,
        treatment_description: extracted.treatment_description.unwrap_or_default(),
        receipt_number: extracted.receipt_number,
        insurer_guess: extracted.insurer_guess,
        document_kind: extracted.document_kind,
        source_image: None,
        extraction_confidence: extracted.confidence.unwrap_or(0.0),
    })
}

fn strip_code_fences(content: &str) -> &str {
    let trimmed = content.trim();
    let trimmed = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    trimmed.strip_suffix("```").unwrap_or(trimmed).trim()
}
