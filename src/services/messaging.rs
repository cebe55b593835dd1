use async_trait::async_trait;

use crate::core::config::MessagingSettings;
use crate::schemas::ClaimEvent;

/// Outbound notification seam. Implementations are fire-and-forget:
/// failures are logged, never retried, and never roll back a transition.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn claim_update(&self, event: &ClaimEvent);

    async fn reply(&self, to: &str, body: &str);
}

/// Used when messaging is disabled in configuration.
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn claim_update(&self, event: &ClaimEvent) {
        tracing::debug!(
            claim_id = %event.claim_id,
            old = event.old_status.as_str(),
            new = event.new_status.as_str(),
            "claim transition (messaging disabled)"
        );
    }

    async fn reply(&self, _to: &str, _body: &str) {}
}

pub struct WhatsappNotifier {
    client: reqwest::Client,
    account_sid: String,
    auth_token: String,
    from_number: String,
}

impl WhatsappNotifier {
    pub(crate) fn from_settings(settings: &MessagingSettings) -> Self {
        Self {
            client: reqwest::Client::new(),
            account_sid: settings.account_sid.clone(),
            auth_token: settings.auth_token.clone(),
            from_number: settings.from_number.clone(),
        }
    }

    async fn send(&self, to: &str, body: &str) {
        let url = format!(
            "https://api.twilio.com/2010-04-01/Accounts/{}/Messages.json",
            self.account_sid
        );
        let params =
            [("To", to), ("From", self.from_number.as_str()), ("Body", body)];
        let result = self
            .client
            .post(&url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&params)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {}
            Ok(response) => {
                tracing::warn!(to, status = %response.status(), "status message rejected by twilio");
            }
            Err(err) => {
                tracing::warn!(to, error = %err, "failed to send status message");
            }
        }
    }
}

pub fn format_claim_update(event: &ClaimEvent) -> String {
    let mut body = format!(
        "Claim update\n\nClaim ID: {}\nStatus: {}",
        event.claim_id,
        event.new_status.as_str().to_uppercase()
    );
    if let Some(detail) = &event.detail {
        body.push_str("\nDetail: ");
        body.push_str(detail);
    }
    body
}

#[async_trait]
impl Notifier for WhatsappNotifier {
    async fn claim_update(&self, event: &ClaimEvent) {
        let Some(to) = &event.notify_to else { return };
        self.send(to, &format_claim_update(event)).await;
    }

    async fn reply(&self, to: &str, body: &str) {
        self.send(to, body).await;
    }
}
