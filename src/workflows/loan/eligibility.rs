use serde::Serialize;
use tracing::{info, warn};

use super::backend::SaccoBackend;
use super::domain::{EligibilitySnapshot, IneligibilityReason, MemberSession};

/// Outcome of the eligibility fetch. "Could not determine" is kept apart
/// from "not eligible": the first is retryable, the second is a business
/// decision that requires profile changes.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum EligibilityStatus {
    /// No fetch has completed yet.
    Unknown,
    /// The fetch failed; retrying may succeed.
    Unavailable { message: String },
    /// The backend answered. The snapshot says whether the member may borrow.
    Determined(EligibilitySnapshot),
}

/// Gate deciding whether the workflow may advance past the eligibility step.
#[derive(Debug, Clone)]
pub struct EligibilityGate {
    status: EligibilityStatus,
}

impl Default for EligibilityGate {
    fn default() -> Self {
        Self::new()
    }
}

impl EligibilityGate {
    pub fn new() -> Self {
        Self {
            status: EligibilityStatus::Unknown,
        }
    }

    /// Query the backend and record the outcome. A transport failure becomes
    /// `Unavailable`, never a terminal ineligibility.
    pub async fn refresh<B: SaccoBackend>(
        &mut self,
        backend: &B,
        session: &MemberSession,
    ) -> &EligibilityStatus {
        match backend.check_eligibility(session).await {
            Ok(snapshot) => {
                info!(
                    member = %session.member_id.0,
                    eligible = snapshot.eligible,
                    max_loan_amount = snapshot.max_loan_amount,
                    "eligibility determined"
                );
                self.status = EligibilityStatus::Determined(snapshot);
            }
            Err(err) => {
                warn!(member = %session.member_id.0, error = %err, "eligibility check failed");
                self.status = EligibilityStatus::Unavailable {
                    message: err.to_string(),
                };
            }
        }
        &self.status
    }

    pub fn status(&self) -> &EligibilityStatus {
        &self.status
    }

    /// True only when the backend has answered and the answer is positive.
    pub fn may_proceed(&self) -> bool {
        matches!(
            &self.status,
            EligibilityStatus::Determined(snapshot) if snapshot.eligible
        )
    }

    /// Individual disqualifiers when the determination is negative; empty
    /// otherwise.
    pub fn blocking_reasons(&self) -> Vec<IneligibilityReason> {
        match &self.status {
            EligibilityStatus::Determined(snapshot) => snapshot.disqualifying_reasons(),
            _ => Vec::new(),
        }
    }

    /// Transport error message when the last fetch failed.
    pub fn unavailable_message(&self) -> Option<&str> {
        match &self.status {
            EligibilityStatus::Unavailable { message } => Some(message),
            _ => None,
        }
    }
}
