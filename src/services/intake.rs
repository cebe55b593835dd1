use std::sync::Arc;

use crate::services::errors::PipelineError;
use crate::services::extraction::BillExtractor;
use crate::services::messaging::Notifier;
use crate::services::orchestrator::ClaimOrchestrator;

/// Library entry for the messaging webhook transport: takes a sender and a
/// bill photo URL, runs extraction and claim registration, and replies with
/// the result. Never propagates a failure back to the transport.
pub struct IntakeService {
    extraction: Arc<dyn BillExtractor>,
    orchestrator: Arc<ClaimOrchestrator>,
    notifier: Arc<dyn Notifier>,
}

impl IntakeService {
    pub fn new(
        extraction: Arc<dyn BillExtractor>,
        orchestrator: Arc<ClaimOrchestrator>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self { extraction, orchestrator, notifier }
    }

    pub async fn handle_media(&self, sender: &str, media_url: &str) {
        let mut bill = match self.extraction.extract(media_url).await {
            Ok(bill) => bill,
            Err(err) => {
                tracing::warn!(sender, error = %err, "bill extraction failed");
                self.notifier
                    .reply(
                        sender,
                        "Sorry, I couldn't read that medical bill. Please make sure the photo is \
                         clear and includes the provider, patient name and total amount.",
                    )
                    .await;
                return;
            }
        };
        bill.source_image = Some(media_url.to_string());

        let summary = format!(
            "Provider: {}\nPatient: {}\nDate: {}\nAmount: {} {}",
            bill.provider_name,
            bill.patient_name,
            bill.service_date,
            bill.total_amount,
            bill.currency
        );

        match self.orchestrator.submit(bill, Some(sender.to_string())).await {
            Ok(claim_id) => {
                let confirmation = format!(
                    "Medical bill received.\n\nClaim ID: {claim_id}\n{summary}\n\nI'll submit \
                     this claim to your insurer automatically and keep you posted on its status."
                );
                self.notifier.reply(sender, &confirmation).await;
            }
            Err(err) => {
                tracing::warn!(sender, error = %err, "claim registration rejected");
                let reason = err
                    .downcast_ref::<PipelineError>()
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "an internal error occurred".into());
                self.notifier
                    .reply(sender, &format!("I couldn't register this claim: {reason}"))
                    .await;
            }
        }
    }
}
