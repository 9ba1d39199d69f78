use std::sync::atomic::Ordering;
use std::sync::Arc;

use super::common::{candidate, ineligible_snapshot, session, StubBackend};
use crate::workflows::loan::allocation::AllocationError;
use crate::workflows::loan::controller::{
    DraftValidationError, LoanWorkflow, LoanWorkflowError,
};
use crate::workflows::loan::domain::WorkflowStep;

async fn started_workflow(backend: Arc<StubBackend>) -> LoanWorkflow<StubBackend> {
    let mut workflow = LoanWorkflow::new(backend, session());
    workflow.start().await;
    workflow
}

async fn workflow_at_details(backend: Arc<StubBackend>) -> LoanWorkflow<StubBackend> {
    let mut workflow = started_workflow(backend).await;
    workflow.next().await.expect("eligible member advances");
    workflow.set_amount(120_000.0).expect("amount accepted");
    workflow.set_term_months(24).expect("term accepted");
    workflow
        .set_purpose("School fees".to_string())
        .expect("purpose accepted");
    workflow
}

async fn workflow_at_guarantors(backend: Arc<StubBackend>) -> LoanWorkflow<StubBackend> {
    let mut workflow = workflow_at_details(backend).await;
    workflow.next().await.expect("draft creation succeeds");
    assert_eq!(workflow.step(), WorkflowStep::Guarantors);
    workflow
}

#[tokio::test]
async fn next_from_eligibility_blocked_when_ineligible() {
    let backend = Arc::new(StubBackend::new());
    backend.set_eligibility(Ok(ineligible_snapshot()));
    let mut workflow = started_workflow(backend).await;

    let error = workflow.next().await.expect_err("gate holds");
    assert!(matches!(
        error,
        LoanWorkflowError::Ineligible { ref reasons } if !reasons.is_empty()
    ));
    assert_eq!(workflow.step(), WorkflowStep::Eligibility);
}

#[tokio::test]
async fn next_from_eligibility_blocked_when_fetch_failed() {
    let backend = Arc::new(StubBackend::new());
    backend.set_eligibility(Err("gateway timeout".to_string()));
    let mut workflow = started_workflow(backend).await;

    let error = workflow.next().await.expect_err("gate holds");
    assert!(matches!(
        error,
        LoanWorkflowError::EligibilityUnavailable { .. }
    ));
}

#[tokio::test]
async fn amount_is_clamped_to_borrowing_capacity() {
    let backend = Arc::new(StubBackend::new());
    let mut workflow = started_workflow(backend).await;
    workflow.next().await.expect("advance to details");

    // Capacity in the stub snapshot is 300_000.
    let stored = workflow.set_amount(500_000.0).expect("edit accepted");
    assert_eq!(stored, 300_000.0);

    let stored = workflow.set_amount(-10.0).expect("edit accepted");
    assert_eq!(stored, 0.0);
}

#[tokio::test]
async fn draft_validation_rejects_bad_term_and_missing_purpose() {
    let backend = Arc::new(StubBackend::new());
    let mut workflow = started_workflow(backend).await;
    workflow.next().await.expect("advance to details");

    let error = workflow.set_term_months(7).expect_err("term restricted");
    assert!(matches!(
        error,
        LoanWorkflowError::InvalidDraft(DraftValidationError::TermNotPermitted { term: 7 })
    ));

    workflow.set_amount(50_000.0).expect("amount accepted");
    workflow.set_term_months(12).expect("term accepted");
    let error = workflow.next().await.expect_err("purpose required");
    assert!(matches!(
        error,
        LoanWorkflowError::InvalidDraft(DraftValidationError::PurposeRequired)
    ));
    assert_eq!(workflow.step(), WorkflowStep::Details);
}

#[tokio::test]
async fn details_submission_failure_leaves_form_populated() {
    let backend = Arc::new(StubBackend::new());
    *backend.fail_create_application.lock().expect("fail mutex") =
        Some("amount exceeds product limits".to_string());
    let mut workflow = workflow_at_details(Arc::clone(&backend)).await;

    let error = workflow.next().await.expect_err("creation fails");
    assert!(matches!(error, LoanWorkflowError::Backend(_)));
    assert_eq!(workflow.step(), WorkflowStep::Details);
    assert!(workflow.submitted_application().is_none());

    // The form is still editable and a retry succeeds.
    *backend.fail_create_application.lock().expect("fail mutex") = None;
    workflow.set_amount(110_000.0).expect("still editable");
    workflow.next().await.expect("retry succeeds");
    assert!(workflow.submitted_application().is_some());
}

#[tokio::test]
async fn draft_freezes_once_created() {
    let backend = Arc::new(StubBackend::with_candidates(vec![candidate(
        "g-1", "Alice", 60.0,
    )]));
    let mut workflow = workflow_at_guarantors(backend).await;

    let error = workflow.set_amount(90_000.0).expect_err("frozen draft");
    assert!(matches!(error, LoanWorkflowError::DraftAlreadyCreated));
}

#[tokio::test]
async fn skipping_guarantors_lands_on_confirmation() {
    let backend = Arc::new(StubBackend::new());
    let mut workflow = workflow_at_details(Arc::clone(&backend)).await;
    workflow.set_needs_guarantors(false).expect("flag accepted");

    let step = workflow.next().await.expect("creation succeeds");
    assert_eq!(step, WorkflowStep::Confirmation);
    assert!(workflow.view().submitted_application.is_some());
    // No guarantor pool fetch happened for this application.
    assert_eq!(backend.pool_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn next_from_guarantors_requires_full_allocation() {
    let backend = Arc::new(StubBackend::with_candidates(vec![candidate(
        "g-1", "Alice", 60.0,
    )]));
    let mut workflow = workflow_at_guarantors(backend).await;

    workflow.add_guarantor("g-1").expect("add accepted");
    let error = workflow.next().await.expect_err("60% is not enough");
    assert!(matches!(
        error,
        LoanWorkflowError::AllocationIncomplete { total } if total == 60.0
    ));
    assert_eq!(workflow.step(), WorkflowStep::Guarantors);
}

#[tokio::test]
async fn full_allocation_submits_and_reaches_confirmation() {
    let backend = Arc::new(StubBackend::with_candidates(vec![
        candidate("g-1", "Alice", 60.0),
        candidate("g-2", "Bob", 50.0),
    ]));
    let mut workflow = workflow_at_guarantors(Arc::clone(&backend)).await;

    let pool = workflow.available_guarantors().await.expect("pool loads");
    assert_eq!(pool.len(), 2);
    workflow.add_guarantor("g-1").expect("add accepted");
    workflow.add_guarantor("g-2").expect("add accepted");
    assert!(workflow.allocation().can_submit());

    let step = workflow.next().await.expect("submission succeeds");
    assert_eq!(step, WorkflowStep::Confirmation);

    let recorded = backend.recorded();
    assert_eq!(recorded.len(), 2);
    assert!(recorded.iter().all(|r| r.application_id == "app-1001"));

    let view = workflow.view();
    let application = view.submitted_application.expect("terminal event");
    assert_eq!(application.application_id.0, "app-1001");
}

#[tokio::test]
async fn adding_unknown_guarantor_fails() {
    let backend = Arc::new(StubBackend::with_candidates(vec![candidate(
        "g-1", "Alice", 60.0,
    )]));
    let mut workflow = workflow_at_guarantors(backend).await;
    workflow.available_guarantors().await.expect("pool loads");

    let error = workflow.add_guarantor("g-9").expect_err("not in pool");
    assert!(matches!(
        error,
        LoanWorkflowError::Allocation(AllocationError::UnknownGuarantor { .. })
    ));
}

#[tokio::test]
async fn back_navigation_is_free_until_confirmation() {
    let backend = Arc::new(StubBackend::with_candidates(vec![candidate(
        "g-1", "Alice", 60.0,
    )]));
    let mut workflow = workflow_at_guarantors(backend).await;

    assert_eq!(workflow.back().expect("back"), WorkflowStep::Details);
    assert_eq!(workflow.back().expect("back"), WorkflowStep::Eligibility);
    // Backing off the first step is a no-op rather than an error.
    assert_eq!(workflow.back().expect("back"), WorkflowStep::Eligibility);
}

#[tokio::test]
async fn confirmation_disables_backward_navigation() {
    let backend = Arc::new(StubBackend::new());
    let mut workflow = workflow_at_details(backend).await;
    workflow.set_needs_guarantors(false).expect("flag accepted");
    workflow.next().await.expect("confirmation reached");

    let error = workflow.back().expect_err("application is final");
    assert!(matches!(error, LoanWorkflowError::ApplicationFinal));
    let error = workflow.next().await.expect_err("nothing past confirmation");
    assert!(matches!(error, LoanWorkflowError::ApplicationFinal));
}

#[tokio::test]
async fn forward_jumps_are_rejected_beyond_reached_steps() {
    let backend = Arc::new(StubBackend::new());
    let mut workflow = started_workflow(backend).await;

    let error = workflow
        .jump_to(WorkflowStep::Guarantors)
        .expect_err("never reached");
    assert!(matches!(
        error,
        LoanWorkflowError::ForwardJumpNotAllowed { .. }
    ));
}

#[tokio::test]
async fn forward_jump_to_reached_step_revalidates_conditions() {
    let backend = Arc::new(StubBackend::with_candidates(vec![candidate(
        "g-1", "Alice", 60.0,
    )]));
    let mut workflow = workflow_at_guarantors(backend).await;

    workflow.back().expect("back to details");
    let step = workflow
        .jump_to(WorkflowStep::Guarantors)
        .expect("conditions still hold");
    assert_eq!(step, WorkflowStep::Guarantors);

    // Jumping to confirmation is never allowed; it is only entered through a
    // successful submission.
    workflow.back().expect("back to details");
    let error = workflow
        .jump_to(WorkflowStep::Confirmation)
        .expect_err("confirmation is not jumpable");
    assert!(matches!(
        error,
        LoanWorkflowError::ForwardJumpNotAllowed { .. }
    ));
}

#[tokio::test]
async fn refreshing_eligibility_drops_the_cached_pool() {
    let backend = Arc::new(StubBackend::with_candidates(vec![candidate(
        "g-1", "Alice", 60.0,
    )]));
    let mut workflow = workflow_at_guarantors(Arc::clone(&backend)).await;

    workflow
        .available_guarantors()
        .await
        .expect("pool fetched on entry");
    assert_eq!(backend.pool_calls.load(Ordering::SeqCst), 1);

    workflow.refresh_eligibility().await;
    workflow
        .available_guarantors()
        .await
        .expect("pool fetched again");
    assert_eq!(backend.pool_calls.load(Ordering::SeqCst), 2);
}
