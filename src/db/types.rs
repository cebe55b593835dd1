use serde::{Deserialize, Serialize};
use sqlx::Type;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "claimstatus", rename_all = "snake_case")]
pub enum ClaimStatus {
    Pending,
    Submitted,
    UnderReview,
    Approved,
    Rejected,
    Error,
}

impl ClaimStatus {
    /// No automated transition ever leaves a terminal status.
    pub fn is_terminal(self) -> bool {
        matches!(self, ClaimStatus::Approved | ClaimStatus::Rejected | ClaimStatus::Error)
    }

    /// Post-submission statuses the poller keeps tracking.
    pub fn is_pollable(self) -> bool {
        matches!(self, ClaimStatus::Submitted | ClaimStatus::UnderReview)
    }

    /// Position in the forward-only lifecycle. Poll updates may only move a
    /// claim to a strictly higher rank.
    pub fn progress_rank(self) -> u8 {
        match self {
            ClaimStatus::Pending => 0,
            ClaimStatus::Submitted => 1,
            ClaimStatus::UnderReview => 2,
            ClaimStatus::Approved | ClaimStatus::Rejected | ClaimStatus::Error => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ClaimStatus::Pending => "pending",
            ClaimStatus::Submitted => "submitted",
            ClaimStatus::UnderReview => "under_review",
            ClaimStatus::Approved => "approved",
            ClaimStatus::Rejected => "rejected",
            ClaimStatus::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "claimerrorkind", rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Extraction,
    Auth,
    TransientNetwork,
    AmbiguousOutcome,
    CircuitOpen,
    PollExhausted,
    Portal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "breakermode", rename_all = "snake_case")]
pub enum BreakerMode {
    Closed,
    Open,
    HalfOpen,
}
