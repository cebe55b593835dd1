use regex::Regex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::sync::watch;

use crate::db::models::MedicalBill;
use crate::resilience::{run_guarded, CircuitBreaker, RetryPolicy};
use crate::services::errors::PipelineError;
use crate::services::portal::PortalClient;

/// Per-edge attempt counters for one submission drive. Shared with the
/// retry closures, so counters are atomics.
#[derive(Debug, Default)]
pub struct EdgeAttempts {
    pub login: AtomicU32,
    pub form: AtomicU32,
    pub upload: AtomicU32,
    pub submit: AtomicU32,
}

impl EdgeAttempts {
    pub fn total(&self) -> u32 {
        self.login.load(Ordering::SeqCst)
            + self.form.load(Ordering::SeqCst)
            + self.upload.load(Ordering::SeqCst)
            + self.submit.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub enum DriveOutcome {
    Submitted { claim_number: String },
    /// Shutdown observed at an edge boundary before the submit edge started.
    Cancelled,
}

/// Drives one claim through the portal submission workflow:
/// Init -> LoggedIn -> FormFilled -> DocumentUploaded -> SubmittedOk | Failed.
///
/// Each edge is one guarded unit of work; a failure on an edge retries that
/// edge only. Auth failures on a post-login edge invalidate the session and
/// restart from Init, within a bounded restart budget.
pub struct SessionDriver {
    portal: Arc<dyn PortalClient>,
    breaker: Arc<CircuitBreaker>,
    retry: RetryPolicy,
    max_session_restarts: u32,
}

impl SessionDriver {
    pub fn new(
        portal: Arc<dyn PortalClient>,
        breaker: Arc<CircuitBreaker>,
        retry: RetryPolicy,
        max_session_restarts: u32,
    ) -> Self {
        Self { portal, breaker, retry, max_session_restarts }
    }

    pub async fn drive(
        &self,
        bill: &MedicalBill,
        cancel: &watch::Receiver<bool>,
        attempts: &EdgeAttempts,
    ) -> Result<DriveOutcome, PipelineError> {
        let mut restarts = 0u32;

        loop {
            if *cancel.borrow() {
                return Ok(DriveOutcome::Cancelled);
            }

            let session = run_guarded(&self.breaker, &self.retry, || {
                attempts.login.fetch_add(1, Ordering::SeqCst);
                self.portal.login()
            })
            .await?;

            if *cancel.borrow() {
                self.portal.close_session(session).await;
                return Ok(DriveOutcome::Cancelled);
            }

            let filled = run_guarded(&self.breaker, &self.retry, || {
                attempts.form.fetch_add(1, Ordering::SeqCst);
                self.portal.fill_claim_form(&session, bill)
            })
            .await;
            match filled {
                Ok(()) => {}
                Err(PipelineError::Auth(msg)) if restarts < self.max_session_restarts => {
                    restarts += 1;
                    tracing::warn!(restarts, error = %msg, "session expired mid-workflow, restarting from login");
                    self.portal.close_session(session).await;
                    continue;
                }
                Err(err) => {
                    self.portal.close_session(session).await;
                    return Err(err);
                }
            }

            if *cancel.borrow() {
                self.portal.close_session(session).await;
                return Ok(DriveOutcome::Cancelled);
            }

            let uploaded = run_guarded(&self.breaker, &self.retry, || {
                attempts.upload.fetch_add(1, Ordering::SeqCst);
                self.portal.upload_document(&session, bill)
            })
            .await;
            match uploaded {
                Ok(()) => {}
                Err(PipelineError::Auth(msg)) if restarts < self.max_session_restarts => {
                    restarts += 1;
                    tracing::warn!(restarts, error = %msg, "session expired mid-workflow, restarting from login");
                    self.portal.close_session(session).await;
                    continue;
                }
                Err(err) => {
                    self.portal.close_session(session).await;
                    return Err(err);
                }
            }

            // Last cancellation point. Once submit starts it runs to
            // completion so the portal-side outcome is never unknown.
            if *cancel.borrow() {
                self.portal.close_session(session).await;
                return Ok(DriveOutcome::Cancelled);
            }

            let submitted = run_guarded(&self.breaker, &self.retry, || {
                attempts.submit.fetch_add(1, Ordering::SeqCst);
                self.portal.submit(&session)
            })
            .await;
            let receipt = match submitted {
                Ok(receipt) => receipt,
                Err(PipelineError::Auth(msg)) if restarts < self.max_session_restarts => {
                    restarts += 1;
                    tracing::warn!(restarts, error = %msg, "session expired mid-workflow, restarting from login");
                    self.portal.close_session(session).await;
                    continue;
                }
                Err(err) => {
                    self.portal.close_session(session).await;
                    return Err(err);
                }
            };

            self.portal.close_session(session).await;

            return match extract_claim_number(&receipt.confirmation_text) {
                Some(claim_number) => Ok(DriveOutcome::Submitted { claim_number }),
                // Submit went through but left nothing to poll by. Terminal;
                // retrying would risk a duplicate filing.
                None => Err(PipelineError::AmbiguousOutcome(
                    "submission accepted but no claim number found in confirmation".into(),
                )),
            };
        }
    }
}

/// Pulls the portal-assigned claim number out of confirmation text.
pub fn extract_claim_number(text: &str) -> Option<String> {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    let patterns = PATTERNS.get_or_init(|| {
        [
            r"(?i)claim\s*(?:number|no\.?|#)?\s*[:#]\s*([A-Z0-9][A-Z0-9-]{3,})",
            r"(?i)reference\s*(?:number|no\.?|#)?\s*[:#]\s*([A-Z0-9][A-Z0-9-]{3,})",
            r"(?i)confirmation\s*(?:number|no\.?|#)?\s*[:#]\s*([A-Z0-9][A-Z0-9-]{3,})",
        ]
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
    });

    for pattern in patterns {
        if let Some(captures) = pattern.captures(text) {
            if let Some(m) = captures.get(1) {
                return Some(m.as_str().to_uppercase());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::BreakerConfig;
    use crate::test_support::{bill_fixture, MockPortal, PortalStep};
    use std::time::Duration;

    fn driver_over(portal: MockPortal) -> SessionDriver {
        let breaker = Arc::new(CircuitBreaker::new(
            "portal",
            BreakerConfig { failure_threshold: 50, cool_down: Duration::from_secs(60) },
        ));
        let retry =
            RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(2));
        SessionDriver::new(Arc::new(portal), breaker, retry, 1)
    }

    fn no_cancel() -> watch::Receiver<bool> {
        watch::channel(false).1
    }

    #[test]
    fn claim_number_extraction_recognizes_portal_phrasings() {
        assert_eq!(
            extract_claim_number("Your Claim #: CLM-2024-001 was received"),
            Some("CLM-2024-001".into())
        );
        assert_eq!(
            extract_claim_number("reference number: abc12345"),
            Some("ABC12345".into())
        );
        assert_eq!(
            extract_claim_number("Confirmation #: 9988776655"),
            Some("9988776655".into())
        );
        assert_eq!(extract_claim_number("Thank you for your submission."), None);
    }

    #[tokio::test]
    async fn happy_path_walks_every_edge_once() {
        let portal = MockPortal::happy("Claim #: CLM-42-OK");
        let driver = driver_over(portal);
        let attempts = EdgeAttempts::default();

        let outcome = driver.drive(&bill_fixture(), &no_cancel(), &attempts).await.unwrap();
        match outcome {
            DriveOutcome::Submitted { claim_number } => {
                assert_eq!(claim_number, "CLM-42-OK");
            }
            other => panic!("expected Submitted, got {other:?}"),
        }
        assert_eq!(attempts.login.load(Ordering::SeqCst), 1);
        assert_eq!(attempts.form.load(Ordering::SeqCst), 1);
        assert_eq!(attempts.upload.load(Ordering::SeqCst), 1);
        assert_eq!(attempts.submit.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn login_retries_do_not_touch_later_edges() {
        let portal = MockPortal::happy("Claim #: CLM-RETRY-1");
        portal.script_login(vec![
            PortalStep::transient(),
            PortalStep::transient(),
            PortalStep::transient(),
            PortalStep::ok(),
        ]);
        let driver = driver_over(portal);
        let attempts = EdgeAttempts::default();

        let outcome = driver.drive(&bill_fixture(), &no_cancel(), &attempts).await.unwrap();
        assert!(matches!(outcome, DriveOutcome::Submitted { .. }));
        assert_eq!(attempts.login.load(Ordering::SeqCst), 4);
        assert_eq!(attempts.form.load(Ordering::SeqCst), 1);
        assert_eq!(attempts.upload.load(Ordering::SeqCst), 1);
        assert_eq!(attempts.submit.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn auth_failure_mid_workflow_restarts_from_login() {
        let portal = MockPortal::happy("Claim #: CLM-RESTART");
        portal.script_upload(vec![PortalStep::auth(), PortalStep::ok()]);
        let driver = driver_over(portal.clone());
        let attempts = EdgeAttempts::default();

        let outcome = driver.drive(&bill_fixture(), &no_cancel(), &attempts).await.unwrap();
        assert!(matches!(outcome, DriveOutcome::Submitted { .. }));
        // second pass logs in and refills the form
        assert_eq!(attempts.login.load(Ordering::SeqCst), 2);
        assert_eq!(attempts.form.load(Ordering::SeqCst), 2);
        assert_eq!(attempts.upload.load(Ordering::SeqCst), 2);
        assert_eq!(portal.sessions_closed(), 2);
    }

    #[tokio::test]
    async fn restart_budget_is_bounded() {
        let portal = MockPortal::happy("Claim #: CLM-NOPE");
        portal.script_form(vec![PortalStep::auth(), PortalStep::auth()]);
        let driver = driver_over(portal.clone());
        let attempts = EdgeAttempts::default();

        let err = driver.drive(&bill_fixture(), &no_cancel(), &attempts).await.unwrap_err();
        assert!(matches!(err, PipelineError::Auth(_)));
        assert_eq!(portal.sessions_closed(), 2);
    }

    #[tokio::test]
    async fn missing_claim_number_is_terminal_and_never_retried() {
        let portal = MockPortal::happy("Thanks! We got it.");
        let driver = driver_over(portal);
        let attempts = EdgeAttempts::default();

        let err = driver.drive(&bill_fixture(), &no_cancel(), &attempts).await.unwrap_err();
        assert!(matches!(err, PipelineError::AmbiguousOutcome(_)));
        assert_eq!(attempts.submit.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancellation_is_honored_at_edge_boundaries_only() {
        let portal = MockPortal::happy("Claim #: CLM-CANCEL");
        let driver = driver_over(portal);
        let attempts = EdgeAttempts::default();

        let (tx, rx) = watch::channel(true);
        let outcome = driver.drive(&bill_fixture(), &rx, &attempts).await.unwrap();
        assert!(matches!(outcome, DriveOutcome::Cancelled));
        assert_eq!(attempts.login.load(Ordering::SeqCst), 0);
        drop(tx);
    }

    #[tokio::test]
    async fn every_exit_path_releases_the_session() {
        let portal = MockPortal::happy("Claim #: CLM-CLOSE");
        portal.script_submit(vec![PortalStep::portal_reject()]);
        let driver = driver_over(portal.clone());
        let attempts = EdgeAttempts::default();

        let err = driver.drive(&bill_fixture(), &no_cancel(), &attempts).await.unwrap_err();
        assert!(matches!(err, PipelineError::Portal(_)));
        assert_eq!(portal.sessions_closed(), 1);
    }
}
