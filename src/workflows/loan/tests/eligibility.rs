use super::common::{ineligible_snapshot, session, StubBackend};
use crate::workflows::loan::domain::IneligibilityReason;
use crate::workflows::loan::eligibility::{EligibilityGate, EligibilityStatus};

#[tokio::test]
async fn transport_failure_is_unavailable_not_ineligible() {
    let backend = StubBackend::new();
    backend.set_eligibility(Err("connection refused".to_string()));

    let mut gate = EligibilityGate::new();
    gate.refresh(&backend, &session()).await;

    assert!(matches!(
        gate.status(),
        EligibilityStatus::Unavailable { .. }
    ));
    assert!(!gate.may_proceed());
    // A failed fetch carries no business reasons; it is retryable.
    assert!(gate.blocking_reasons().is_empty());
    assert!(gate.unavailable_message().is_some());
}

#[tokio::test]
async fn retry_after_transport_failure_can_succeed() {
    let backend = StubBackend::new();
    backend.set_eligibility(Err("connection refused".to_string()));

    let mut gate = EligibilityGate::new();
    gate.refresh(&backend, &session()).await;
    assert!(!gate.may_proceed());

    backend.set_eligibility(Ok(super::common::eligible_snapshot()));
    gate.refresh(&backend, &session()).await;
    assert!(gate.may_proceed());
}

#[tokio::test]
async fn ineligible_member_gets_individual_reasons() {
    let backend = StubBackend::new();
    backend.set_eligibility(Ok(ineligible_snapshot()));

    let mut gate = EligibilityGate::new();
    gate.refresh(&backend, &session()).await;

    assert!(!gate.may_proceed());
    let reasons = gate.blocking_reasons();
    assert!(reasons.contains(&IneligibilityReason::NotVerified));
    assert!(reasons.contains(&IneligibilityReason::AccountOnHold));
    assert!(reasons.iter().any(|reason| matches!(
        reason,
        IneligibilityReason::Stated(stated) if stated.contains("share capital")
    )));
}

#[tokio::test]
async fn unfetched_gate_blocks_progress() {
    let gate = EligibilityGate::new();
    assert_eq!(gate.status(), &EligibilityStatus::Unknown);
    assert!(!gate.may_proceed());
}
