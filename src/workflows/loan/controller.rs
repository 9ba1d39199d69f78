//! The outer state machine: ELIGIBILITY → DETAILS → GUARANTORS →
//! CONFIRMATION. Forward movement is gated on the previous step's completion
//! conditions, re-checked on every attempt; backward movement is free until
//! the application is final.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::info;

use super::allocation::{AllocationError, AllocationState};
use super::backend::{BackendError, SaccoBackend};
use super::domain::{
    DocumentRef, GuarantorCandidate, GuarantorPledge, IneligibilityReason, LoanDraft, MemberId,
    MemberSession, Money, SubmittedApplication, WorkflowStep, PERMITTED_TERMS_MONTHS,
};
use super::eligibility::{EligibilityGate, EligibilityStatus};
use super::pool::GuarantorPoolResolver;
use super::submission::{submit_guarantee_requests, SubmissionReport};

/// Form-level rejections raised before anything reaches the network.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DraftValidationError {
    #[error("loan amount must be greater than zero")]
    AmountRequired,
    #[error("{term} months is not a permitted loan term")]
    TermNotPermitted { term: u32 },
    #[error("loan purpose is required")]
    PurposeRequired,
}

/// Outcome of a workflow command. Callers branch on the variant; nothing is
/// thrown.
#[derive(Debug, thiserror::Error)]
pub enum LoanWorkflowError {
    #[error("eligibility has not been determined yet")]
    EligibilityUnknown,
    #[error("could not determine eligibility: {message}")]
    EligibilityUnavailable { message: String },
    #[error("member is not eligible to apply for a loan")]
    Ineligible { reasons: Vec<IneligibilityReason> },
    #[error(transparent)]
    InvalidDraft(#[from] DraftValidationError),
    #[error("the application has already been created and can no longer be edited")]
    DraftAlreadyCreated,
    #[error("no draft application has been created yet")]
    NoApplication,
    #[error("this action belongs to the {} step", .expected.label())]
    WrongStep { expected: WorkflowStep },
    #[error(transparent)]
    Allocation(#[from] AllocationError),
    #[error("guarantor coverage is at {total}%; submission requires exactly 100%")]
    AllocationIncomplete { total: f64 },
    #[error("{} of {} guarantee requests failed", .report.failed().len(), .report.outcomes.len())]
    GuaranteeRequestsFailed { report: SubmissionReport },
    #[error("the application is final; navigation is no longer possible")]
    ApplicationFinal,
    #[error("cannot jump ahead to the {} step", .target.label())]
    ForwardJumpNotAllowed { target: WorkflowStep },
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Step-indexed renderable state handed to the surrounding application.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowView {
    pub member_id: String,
    pub step: WorkflowStep,
    pub step_label: &'static str,
    pub step_index: usize,
    pub furthest_step: WorkflowStep,
    pub eligibility: EligibilityStatus,
    pub draft: LoanDraft,
    pub draft_created: bool,
    pub pledges: Vec<GuarantorPledge>,
    pub total_percentage: f64,
    pub remaining_percentage: f64,
    pub can_submit: bool,
    pub last_submission: Option<SubmissionReport>,
    pub submitted_application: Option<SubmittedApplication>,
}

/// One member's loan application workflow, owner of all mutable state.
pub struct LoanWorkflow<B> {
    backend: Arc<B>,
    session: MemberSession,
    step: WorkflowStep,
    furthest: WorkflowStep,
    gate: EligibilityGate,
    draft: LoanDraft,
    submitted: Option<SubmittedApplication>,
    allocation: AllocationState,
    pool: GuarantorPoolResolver,
    last_submission: Option<SubmissionReport>,
}

impl<B: SaccoBackend> LoanWorkflow<B> {
    pub fn new(backend: Arc<B>, session: MemberSession) -> Self {
        Self {
            backend,
            session,
            step: WorkflowStep::Eligibility,
            furthest: WorkflowStep::Eligibility,
            gate: EligibilityGate::new(),
            draft: LoanDraft::default(),
            submitted: None,
            allocation: AllocationState::new(),
            pool: GuarantorPoolResolver::new(),
            last_submission: None,
        }
    }

    /// Entry point: fetch the eligibility snapshot for this member.
    pub async fn start(&mut self) -> &EligibilityStatus {
        self.gate.refresh(self.backend.as_ref(), &self.session).await
    }

    /// Re-query eligibility. Useful after a transport failure or after the
    /// member corrected their profile. A changed profile can also change who
    /// may guarantee, so the cached pool is dropped along the way.
    pub async fn refresh_eligibility(&mut self) -> &EligibilityStatus {
        self.pool.invalidate();
        self.gate.refresh(self.backend.as_ref(), &self.session).await
    }

    pub fn step(&self) -> WorkflowStep {
        self.step
    }

    /// Replace the credentials used for backend calls. A member who restarts
    /// the workflow with a fresh token keeps their in-progress state but
    /// authenticates with the new token from then on.
    pub fn set_session(&mut self, session: MemberSession) {
        self.session = session;
    }

    pub fn eligibility(&self) -> &EligibilityStatus {
        self.gate.status()
    }

    pub fn allocation(&self) -> &AllocationState {
        &self.allocation
    }

    pub fn submitted_application(&self) -> Option<&SubmittedApplication> {
        self.submitted.as_ref()
    }

    fn editable_draft(&mut self) -> Result<&mut LoanDraft, LoanWorkflowError> {
        if self.submitted.is_some() {
            return Err(LoanWorkflowError::DraftAlreadyCreated);
        }
        Ok(&mut self.draft)
    }

    /// Update the requested amount, clamped into `(0, max_loan_amount]` on
    /// every edit so a value the backend would reject for exceeding capacity
    /// can never be entered. Returns the value actually stored.
    pub fn set_amount(&mut self, amount: Money) -> Result<Money, LoanWorkflowError> {
        let ceiling = match self.gate.status() {
            EligibilityStatus::Determined(snapshot) => snapshot.max_loan_amount,
            EligibilityStatus::Unavailable { message } => {
                return Err(LoanWorkflowError::EligibilityUnavailable {
                    message: message.clone(),
                })
            }
            EligibilityStatus::Unknown => return Err(LoanWorkflowError::EligibilityUnknown),
        };

        let clamped = amount.clamp(0.0, ceiling);
        self.editable_draft()?.amount = clamped;
        Ok(clamped)
    }

    pub fn set_term_months(&mut self, term: u32) -> Result<(), LoanWorkflowError> {
        if !PERMITTED_TERMS_MONTHS.contains(&term) {
            return Err(DraftValidationError::TermNotPermitted { term }.into());
        }
        self.editable_draft()?.term_months = term;
        Ok(())
    }

    pub fn set_purpose(&mut self, purpose: String) -> Result<(), LoanWorkflowError> {
        self.editable_draft()?.purpose = purpose;
        Ok(())
    }

    pub fn set_needs_guarantors(&mut self, needs: bool) -> Result<(), LoanWorkflowError> {
        self.editable_draft()?.needs_guarantors = needs;
        Ok(())
    }

    pub fn set_supporting_document(
        &mut self,
        document: Option<DocumentRef>,
    ) -> Result<(), LoanWorkflowError> {
        self.editable_draft()?.supporting_document = document;
        Ok(())
    }

    fn validate_draft(&self) -> Result<(), DraftValidationError> {
        if self.draft.amount <= 0.0 {
            return Err(DraftValidationError::AmountRequired);
        }
        if !PERMITTED_TERMS_MONTHS.contains(&self.draft.term_months) {
            return Err(DraftValidationError::TermNotPermitted {
                term: self.draft.term_months,
            });
        }
        if self.draft.purpose.trim().is_empty() {
            return Err(DraftValidationError::PurposeRequired);
        }
        Ok(())
    }

    fn require_eligible(&self) -> Result<(), LoanWorkflowError> {
        match self.gate.status() {
            EligibilityStatus::Determined(snapshot) if snapshot.eligible => Ok(()),
            EligibilityStatus::Determined(_) => Err(LoanWorkflowError::Ineligible {
                reasons: self.gate.blocking_reasons(),
            }),
            EligibilityStatus::Unavailable { message } => {
                Err(LoanWorkflowError::EligibilityUnavailable {
                    message: message.clone(),
                })
            }
            EligibilityStatus::Unknown => Err(LoanWorkflowError::EligibilityUnknown),
        }
    }

    fn advance_to(&mut self, step: WorkflowStep) {
        info!(
            member = %self.session.member_id.0,
            from = self.step.label(),
            to = step.label(),
            "workflow step advanced"
        );
        self.step = step;
        if step > self.furthest {
            self.furthest = step;
        }
    }

    /// Attempt the forward transition out of the current step. Every gating
    /// condition is evaluated at call time; nothing is trusted from earlier
    /// renders.
    pub async fn next(&mut self) -> Result<WorkflowStep, LoanWorkflowError> {
        match self.step {
            WorkflowStep::Eligibility => {
                self.require_eligible()?;
                self.advance_to(WorkflowStep::Details);
            }
            WorkflowStep::Details => {
                self.require_eligible()?;
                self.ensure_application_created().await?;
                if self.application_needs_guarantors() {
                    self.enter_guarantors().await?;
                } else {
                    self.advance_to(WorkflowStep::Confirmation);
                }
            }
            WorkflowStep::Guarantors => {
                self.require_eligible()?;
                let application = self
                    .submitted
                    .as_ref()
                    .ok_or(LoanWorkflowError::NoApplication)?;
                if !self.allocation.can_submit() {
                    return Err(LoanWorkflowError::AllocationIncomplete {
                        total: self.allocation.total_percentage(),
                    });
                }

                let message = format!(
                    "Please guarantee my loan application of {:.2} for {}",
                    application.draft.amount, application.draft.purpose
                );
                let report = submit_guarantee_requests(
                    self.backend.as_ref(),
                    &self.session,
                    &application.application_id,
                    self.allocation.pledges(),
                    &message,
                )
                .await;

                let complete = report.all_succeeded();
                self.last_submission = Some(report.clone());
                if !complete {
                    // Allocation is preserved; the user may retry the full
                    // set (at-least-once, no rollback of accepted requests).
                    return Err(LoanWorkflowError::GuaranteeRequestsFailed { report });
                }
                self.advance_to(WorkflowStep::Confirmation);
            }
            WorkflowStep::Confirmation => return Err(LoanWorkflowError::ApplicationFinal),
        }
        Ok(self.step)
    }

    /// Move one step back. Free except past a final application.
    pub fn back(&mut self) -> Result<WorkflowStep, LoanWorkflowError> {
        match self.step {
            WorkflowStep::Confirmation => Err(LoanWorkflowError::ApplicationFinal),
            WorkflowStep::Eligibility => Ok(self.step),
            WorkflowStep::Details => {
                self.step = WorkflowStep::Eligibility;
                Ok(self.step)
            }
            WorkflowStep::Guarantors => {
                self.step = WorkflowStep::Details;
                Ok(self.step)
            }
        }
    }

    /// Jump directly to a step. Backward jumps are free (never past a final
    /// application); forward jumps are honored only up to the furthest step
    /// legitimately reached, and only after re-checking the gating conditions
    /// of every predecessor.
    pub fn jump_to(&mut self, target: WorkflowStep) -> Result<WorkflowStep, LoanWorkflowError> {
        if self.step == WorkflowStep::Confirmation {
            return Err(LoanWorkflowError::ApplicationFinal);
        }
        if target == self.step {
            return Ok(self.step);
        }
        if target < self.step {
            self.step = target;
            return Ok(self.step);
        }

        if target > self.furthest || target == WorkflowStep::Confirmation {
            return Err(LoanWorkflowError::ForwardJumpNotAllowed { target });
        }

        // Re-validate the chain instead of trusting the high-water mark.
        self.require_eligible()?;
        if target >= WorkflowStep::Guarantors {
            if self.submitted.is_none() {
                return Err(LoanWorkflowError::NoApplication);
            }
            if !self.application_needs_guarantors() {
                return Err(LoanWorkflowError::ForwardJumpNotAllowed { target });
            }
        }

        self.step = target;
        Ok(self.step)
    }

    fn application_needs_guarantors(&self) -> bool {
        self.submitted
            .as_ref()
            .map(|application| application.draft.needs_guarantors)
            .unwrap_or(self.draft.needs_guarantors)
    }

    /// Create the draft server-side exactly once. On failure the form stays
    /// populated and the backend's error is surfaced verbatim; no draft is
    /// considered created until the identifier arrives.
    async fn ensure_application_created(&mut self) -> Result<(), LoanWorkflowError> {
        if self.submitted.is_some() {
            return Ok(());
        }
        self.validate_draft()?;

        let application_id = self
            .backend
            .create_loan_application(&self.session, &self.draft)
            .await?;

        info!(
            member = %self.session.member_id.0,
            application = %application_id.0,
            amount = self.draft.amount,
            "draft application created"
        );

        self.submitted = Some(SubmittedApplication {
            application_id,
            draft: self.draft.clone(),
            submitted_at: Utc::now(),
        });
        Ok(())
    }

    async fn enter_guarantors(&mut self) -> Result<(), LoanWorkflowError> {
        let amount = self
            .submitted
            .as_ref()
            .map(|application| application.draft.amount)
            .unwrap_or(self.draft.amount);
        self.pool
            .refresh(self.backend.as_ref(), &self.session, amount)
            .await?;
        self.advance_to(WorkflowStep::Guarantors);
        Ok(())
    }

    fn require_step(&self, expected: WorkflowStep) -> Result<(), LoanWorkflowError> {
        if self.step == expected {
            Ok(())
        } else {
            Err(LoanWorkflowError::WrongStep { expected })
        }
    }

    /// Candidates currently open for selection, with pledged members
    /// filtered out. Refreshes the pool when the amount under consideration
    /// has changed; otherwise serves the cache.
    pub async fn available_guarantors(
        &mut self,
    ) -> Result<Vec<GuarantorCandidate>, LoanWorkflowError> {
        self.require_step(WorkflowStep::Guarantors)?;
        let amount = self
            .submitted
            .as_ref()
            .map(|application| application.draft.amount)
            .unwrap_or(self.draft.amount);
        self.pool
            .refresh(self.backend.as_ref(), &self.session, amount)
            .await?;
        Ok(self.pool.available(&self.allocation))
    }

    /// Select a guarantor from the pool. The default pledge converges toward
    /// 100% coverage; see [`AllocationState::add`].
    pub fn add_guarantor(&mut self, guarantor_id: &str) -> Result<f64, LoanWorkflowError> {
        self.require_step(WorkflowStep::Guarantors)?;
        let candidate = self
            .pool
            .find(guarantor_id)
            .cloned()
            .ok_or_else(|| AllocationError::UnknownGuarantor {
                id: guarantor_id.to_string(),
            })?;
        Ok(self.allocation.add(candidate)?)
    }

    pub fn remove_guarantor(&mut self, guarantor_id: &str) -> Result<(), LoanWorkflowError> {
        self.require_step(WorkflowStep::Guarantors)?;
        self.allocation
            .remove(&MemberId(guarantor_id.to_string()))?;
        Ok(())
    }

    pub fn set_guarantor_percentage(
        &mut self,
        guarantor_id: &str,
        percentage: f64,
    ) -> Result<(), LoanWorkflowError> {
        self.require_step(WorkflowStep::Guarantors)?;
        self.allocation
            .set_percentage(&MemberId(guarantor_id.to_string()), percentage)?;
        Ok(())
    }

    /// Snapshot of everything a front end needs to render the current step.
    pub fn view(&self) -> WorkflowView {
        WorkflowView {
            member_id: self.session.member_id.0.clone(),
            step: self.step,
            step_label: self.step.label(),
            step_index: self.step.index(),
            furthest_step: self.furthest,
            eligibility: self.gate.status().clone(),
            draft: self
                .submitted
                .as_ref()
                .map(|application| application.draft.clone())
                .unwrap_or_else(|| self.draft.clone()),
            draft_created: self.submitted.is_some(),
            pledges: self.allocation.pledges().to_vec(),
            total_percentage: self.allocation.total_percentage(),
            remaining_percentage: self.allocation.remaining_percentage(),
            can_submit: self.allocation.can_submit(),
            last_submission: self.last_submission.clone(),
            submitted_application: if self.step == WorkflowStep::Confirmation {
                self.submitted.clone()
            } else {
                None
            },
        }
    }
}
