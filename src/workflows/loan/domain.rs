use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier wrapper for society members.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MemberId(pub String);

/// Identifier assigned by the backend once a draft application is created.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApplicationId(pub String);

/// Monetary amount in the society's single operating currency.
pub type Money = f64;

/// Tolerance for percentage comparisons so decimal arithmetic cannot produce
/// a false "not exactly 100%" at submission time.
pub const PERCENT_EPSILON: f64 = 1e-6;

/// Loan terms the society offers, in months.
pub const PERMITTED_TERMS_MONTHS: [u32; 5] = [6, 12, 24, 36, 48];

/// Identity handle passed into every backend call so the workflow never
/// depends on process-wide auth state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberSession {
    pub member_id: MemberId,
    pub token: String,
}

/// Point-in-time borrowing-capacity determination, fetched once per workflow
/// entry and never mutated locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EligibilitySnapshot {
    pub eligible: bool,
    pub reason: Option<String>,
    pub max_loan_amount: Money,
    pub multiplier: f64,
    pub total_deposits: Money,
    pub is_verified: bool,
    pub is_on_hold: bool,
    pub outstanding_loans: Money,
}

impl EligibilitySnapshot {
    /// Break the snapshot down into individual disqualifiers. Each maps to a
    /// different corrective action for the member, so they are never merged
    /// into one opaque message.
    pub fn disqualifying_reasons(&self) -> Vec<IneligibilityReason> {
        if self.eligible {
            return Vec::new();
        }

        let mut reasons = Vec::new();
        if !self.is_verified {
            reasons.push(IneligibilityReason::NotVerified);
        }
        if self.is_on_hold {
            reasons.push(IneligibilityReason::AccountOnHold);
        }
        if self.outstanding_loans > 0.0 && self.outstanding_loans >= self.max_loan_amount {
            reasons.push(IneligibilityReason::OutstandingLoansExceedCapacity {
                outstanding: self.outstanding_loans,
                capacity: self.max_loan_amount,
            });
        }
        if let Some(stated) = &self.reason {
            reasons.push(IneligibilityReason::Stated(stated.clone()));
        }
        if reasons.is_empty() {
            reasons.push(IneligibilityReason::Stated(
                "member does not meet the society's lending requirements".to_string(),
            ));
        }
        reasons
    }
}

/// One disqualifying condition, rendered individually so the member knows
/// what to fix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum IneligibilityReason {
    NotVerified,
    AccountOnHold,
    OutstandingLoansExceedCapacity { outstanding: Money, capacity: Money },
    Stated(String),
}

impl IneligibilityReason {
    pub fn message(&self) -> String {
        match self {
            IneligibilityReason::NotVerified => {
                "membership is not yet verified; complete identity verification".to_string()
            }
            IneligibilityReason::AccountOnHold => {
                "account is on hold; contact the society office to lift the hold".to_string()
            }
            IneligibilityReason::OutstandingLoansExceedCapacity {
                outstanding,
                capacity,
            } => format!(
                "outstanding loans of {outstanding:.2} exhaust the borrowing capacity of {capacity:.2}"
            ),
            IneligibilityReason::Stated(reason) => reason.clone(),
        }
    }
}

/// Reference to an already-uploaded supporting document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRef {
    pub name: String,
    pub storage_key: String,
}

/// The in-progress application. Mutable until the backend acknowledges
/// creation, after which it is frozen into a [`SubmittedApplication`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoanDraft {
    pub amount: Money,
    pub term_months: u32,
    pub purpose: String,
    pub needs_guarantors: bool,
    pub supporting_document: Option<DocumentRef>,
}

impl Default for LoanDraft {
    fn default() -> Self {
        Self {
            amount: 0.0,
            term_months: PERMITTED_TERMS_MONTHS[1],
            purpose: String::new(),
            needs_guarantors: true,
            supporting_document: None,
        }
    }
}

/// A draft the backend has accepted. The draft inside is immutable from this
/// point on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmittedApplication {
    pub application_id: ApplicationId,
    pub draft: LoanDraft,
    pub submitted_at: DateTime<Utc>,
}

/// A member able to guarantee the requested amount, together with both of
/// their ceilings. Read-only; re-fetched whenever the requested amount
/// changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuarantorCandidate {
    pub id: MemberId,
    pub full_name: String,
    pub contact: String,
    pub available_guarantee_amount: Money,
    pub maximum_percentage: f64,
}

/// A selected candidate with the percentage of coverage they have pledged.
/// Invariant: `0 < percentage <= candidate.maximum_percentage`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuarantorPledge {
    pub candidate: GuarantorCandidate,
    pub percentage: f64,
}

/// Stages of the application workflow, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStep {
    Eligibility,
    Details,
    Guarantors,
    Confirmation,
}

impl WorkflowStep {
    pub fn label(&self) -> &'static str {
        match self {
            WorkflowStep::Eligibility => "Eligibility",
            WorkflowStep::Details => "Application Details",
            WorkflowStep::Guarantors => "Guarantor Allocation",
            WorkflowStep::Confirmation => "Confirmation",
        }
    }

    pub fn index(&self) -> usize {
        match self {
            WorkflowStep::Eligibility => 0,
            WorkflowStep::Details => 1,
            WorkflowStep::Guarantors => 2,
            WorkflowStep::Confirmation => 3,
        }
    }
}
