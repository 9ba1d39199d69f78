//! Loan application and guarantor allocation workflow.
//!
//! The member moves through Eligibility → Application Details → Guarantor
//! Allocation → Confirmation. Forward navigation is gated on each step's
//! completion conditions; backward navigation is free until the application
//! is final.

pub mod allocation;
pub mod backend;
pub mod controller;
pub mod domain;
pub mod eligibility;
pub mod pool;
pub mod router;
pub mod submission;

#[cfg(test)]
mod tests;

pub use allocation::{AllocationError, AllocationState};
pub use backend::{BackendError, HttpBackendConfig, HttpSaccoBackend, SaccoBackend};
pub use controller::{
    DraftValidationError, LoanWorkflow, LoanWorkflowError, WorkflowView,
};
pub use domain::{
    ApplicationId, DocumentRef, EligibilitySnapshot, GuarantorCandidate, GuarantorPledge,
    IneligibilityReason, LoanDraft, MemberId, MemberSession, Money, SubmittedApplication,
    WorkflowStep, PERCENT_EPSILON, PERMITTED_TERMS_MONTHS,
};
pub use eligibility::{EligibilityGate, EligibilityStatus};
pub use pool::GuarantorPoolResolver;
pub use router::{loan_router, WorkflowRegistry};
pub use submission::{submit_guarantee_requests, GuarantorRequestOutcome, SubmissionReport};
