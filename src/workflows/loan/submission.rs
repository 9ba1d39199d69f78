//! Fires one guarantee request per pledge, all at once, and waits for every
//! request to settle before reporting. There is no server-side transaction
//! spanning the requests, so a partial failure is reported guarantor by
//! guarantor instead of being collapsed into one aggregate error.

use futures::future::join_all;
use serde::Serialize;
use tracing::{info, warn};

use super::backend::{BackendError, SaccoBackend};
use super::domain::{ApplicationId, GuarantorPledge, MemberId, MemberSession};

/// Result of a single guarantee request.
#[derive(Debug, Clone, Serialize)]
pub struct GuarantorRequestOutcome {
    pub guarantor_id: MemberId,
    pub full_name: String,
    pub percentage: f64,
    pub succeeded: bool,
    pub error: Option<String>,
}

/// Settled outcomes for the whole pledge set.
#[derive(Debug, Clone, Serialize)]
pub struct SubmissionReport {
    pub application_id: ApplicationId,
    pub outcomes: Vec<GuarantorRequestOutcome>,
}

impl SubmissionReport {
    pub fn all_succeeded(&self) -> bool {
        self.outcomes.iter().all(|outcome| outcome.succeeded)
    }

    pub fn succeeded(&self) -> Vec<&GuarantorRequestOutcome> {
        self.outcomes
            .iter()
            .filter(|outcome| outcome.succeeded)
            .collect()
    }

    pub fn failed(&self) -> Vec<&GuarantorRequestOutcome> {
        self.outcomes
            .iter()
            .filter(|outcome| !outcome.succeeded)
            .collect()
    }
}

/// Issue every pledge's guarantee request concurrently and collect the
/// settled outcomes. Nothing is retried here; retry is always an explicit
/// user action, and already-succeeded requests are never rolled back.
pub async fn submit_guarantee_requests<B: SaccoBackend>(
    backend: &B,
    session: &MemberSession,
    application_id: &ApplicationId,
    pledges: &[GuarantorPledge],
    message: &str,
) -> SubmissionReport {
    let requests = pledges.iter().map(|pledge| async move {
        let result = backend
            .create_guarantor_request(
                session,
                application_id,
                &pledge.candidate.id,
                pledge.percentage,
                message,
            )
            .await;
        (pledge, result)
    });

    let settled: Vec<(&GuarantorPledge, Result<(), BackendError>)> = join_all(requests).await;

    let outcomes = settled
        .into_iter()
        .map(|(pledge, result)| match result {
            Ok(()) => GuarantorRequestOutcome {
                guarantor_id: pledge.candidate.id.clone(),
                full_name: pledge.candidate.full_name.clone(),
                percentage: pledge.percentage,
                succeeded: true,
                error: None,
            },
            Err(err) => GuarantorRequestOutcome {
                guarantor_id: pledge.candidate.id.clone(),
                full_name: pledge.candidate.full_name.clone(),
                percentage: pledge.percentage,
                succeeded: false,
                error: Some(err.to_string()),
            },
        })
        .collect::<Vec<_>>();

    let report = SubmissionReport {
        application_id: application_id.clone(),
        outcomes,
    };

    if report.all_succeeded() {
        info!(
            application = %report.application_id.0,
            guarantors = report.outcomes.len(),
            "all guarantee requests accepted"
        );
    } else {
        warn!(
            application = %report.application_id.0,
            failed = report.failed().len(),
            succeeded = report.succeeded().len(),
            "guarantee requests partially failed"
        );
    }

    report
}
