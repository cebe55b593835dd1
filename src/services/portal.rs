use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use crate::core::config::PortalSettings;
use crate::db::models::MedicalBill;
use crate::services::errors::PipelineError;

/// Authenticated portal session handle. Cheap to clone; the portal side
/// tracks it by token.
#[derive(Debug, Clone)]
pub struct PortalSession {
    pub token: String,
}

/// Raw confirmation page text returned by the submit step. The driver owns
/// claim-number extraction.
#[derive(Debug, Clone)]
pub struct SubmissionReceipt {
    pub confirmation_text: String,
}

#[derive(Debug, Clone)]
pub struct PortalStatusReport {
    pub raw_status: String,
    pub settlement_amount: Option<f64>,
    pub settlement_currency: Option<String>,
}

/// Boundary to the insurer web portal. Each method is one unit of work for
/// the resilience layer; implementations classify their own failures.
#[async_trait]
pub trait PortalClient: Send + Sync {
    async fn login(&self) -> Result<PortalSession, PipelineError>;

    async fn fill_claim_form(
        &self,
        session: &PortalSession,
        bill: &MedicalBill,
    ) -> Result<(), PipelineError>;

    async fn upload_document(
        &self,
        session: &PortalSession,
        bill: &MedicalBill,
    ) -> Result<(), PipelineError>;

    async fn submit(&self, session: &PortalSession) -> Result<SubmissionReceipt, PipelineError>;

    async fn claim_status(
        &self,
        session: &PortalSession,
        claim_number: &str,
    ) -> Result<PortalStatusReport, PipelineError>;

    /// Best-effort session release; must be called on every exit path.
    async fn close_session(&self, session: PortalSession);
}

pub struct HttpPortalClient {
    client: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
}

#[derive(Deserialize)]
struct LoginResponse {
    token: String,
}

#[derive(Deserialize)]
struct SubmitResponse {
    confirmation_text: String,
}

#[derive(Deserialize)]
struct StatusResponse {
    status: String,
    settlement_amount: Option<f64>,
    settlement_currency: Option<String>,
}

impl HttpPortalClient {
    pub(crate) fn from_settings(settings: &PortalSettings) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_seconds))
            .build()?;
        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            username: settings.username.clone(),
            password: settings.password.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn classify_transport(err: reqwest::Error) -> PipelineError {
        if err.is_timeout() || err.is_connect() || err.is_request() {
            PipelineError::TransientNetwork(err.to_string())
        } else {
            PipelineError::Portal(err.to_string())
        }
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, PipelineError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let detail = format!("{status}: {body}");
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(PipelineError::Auth(detail)),
            StatusCode::TOO_MANY_REQUESTS => Err(PipelineError::TransientNetwork(detail)),
            s if s.is_server_error() => Err(PipelineError::TransientNetwork(detail)),
            _ => Err(PipelineError::Portal(detail)),
        }
    }
}

#[async_trait]
impl PortalClient for HttpPortalClient {
    async fn login(&self) -> Result<PortalSession, PipelineError> {
        let response = self
            .client
            .post(self.url("/api/login"))
            .json(&json!({ "username": self.username, "password": self.password }))
            .send()
            .await
            .map_err(Self::classify_transport)?;
        let response = Self::check(response).await?;
        let body: LoginResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::Portal(format!("malformed login response: {e}")))?;
        Ok(PortalSession { token: body.token })
    }

    async fn fill_claim_form(
        &self,
        session: &PortalSession,
        bill: &MedicalBill,
    ) -> Result<(), PipelineError> {
        let payload = json!({
            "patient_name": bill.patient_name,
            "provider_name": bill.provider_name,
            "service_date": bill.service_date.to_string(),
            "total_amount": bill.total_amount,
            "currency": bill.currency,
            "diagnosis_codes": bill.diagnosis_codes,
            "treatment_description": bill.treatment_description,
            "receipt_number": bill.receipt_number,
        });
        let response = self
            .client
            .post(self.url("/api/claims/draft"))
            .bearer_auth(&session.token)
            .json(&payload)
            .send()
            .await
            .map_err(Self::classify_transport)?;
        Self::check(response).await?;
        Ok(())
    }

    async fn upload_document(
        &self,
        session: &PortalSession,
        bill: &MedicalBill,
    ) -> Result<(), PipelineError> {
        let source = bill.source_image.clone().ok_or_else(|| {
            PipelineError::Validation("bill has no source document to upload".into())
        })?;
        let form = reqwest::multipart::Form::new()
            .text("file_url", source)
            .text("bill_id", bill.id.to_string());
        let response = self
            .client
            .post(self.url("/api/claims/draft/document"))
            .bearer_auth(&session.token)
            .multipart(form)
            .send()
            .await
            .map_err(Self::classify_transport)?;
        Self::check(response).await?;
        Ok(())
    }

    async fn submit(&self, session: &PortalSession) -> Result<SubmissionReceipt, PipelineError> {
        let response = self
            .client
            .post(self.url("/api/claims/draft/submit"))
            .bearer_auth(&session.token)
            .send()
            .await
            .map_err(Self::classify_transport)?;
        let response = Self::check(response).await?;
        let body: SubmitResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::Portal(format!("malformed submit response: {e}")))?;
        Ok(SubmissionReceipt { confirmation_text: body.confirmation_text })
    }

    async fn claim_status(
        &self,
        session: &PortalSession,
        claim_number: &str,
    ) -> Result<PortalStatusReport, PipelineError> {
        let response = self
            .client
            .get(self.url(&format!("/api/claims/{claim_number}/status")))
            .bearer_auth(&session.token)
            .send()
            .await
            .map_err(Self::classify_transport)?;
        let response = Self::check(response).await?;
        let body: StatusResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::Portal(format!("malformed status response: {e}")))?;
        Ok(PortalStatusReport {
            raw_status: body.status,
            settlement_amount: body.settlement_amount,
            settlement_currency: body.settlement_currency,
        })
    }

    async fn close_session(&self, session: PortalSession) {
        let result = self
            .client
            .post(self.url("/api/logout"))
            .bearer_auth(&session.token)
            .send()
            .await;
        if let Err(err) = result {
            tracing::debug!(error = %err, "portal logout failed, session will expire server-side");
        }
    }
}
