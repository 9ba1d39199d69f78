use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::workflows::loan::backend::{BackendError, SaccoBackend};
use crate::workflows::loan::domain::{
    ApplicationId, EligibilitySnapshot, GuarantorCandidate, LoanDraft, MemberId, MemberSession,
    Money,
};

pub(super) fn session() -> MemberSession {
    MemberSession {
        member_id: MemberId("m-001".to_string()),
        token: "test-token".to_string(),
    }
}

pub(super) fn eligible_snapshot() -> EligibilitySnapshot {
    EligibilitySnapshot {
        eligible: true,
        reason: None,
        max_loan_amount: 300_000.0,
        multiplier: 3.0,
        total_deposits: 100_000.0,
        is_verified: true,
        is_on_hold: false,
        outstanding_loans: 0.0,
    }
}

pub(super) fn ineligible_snapshot() -> EligibilitySnapshot {
    EligibilitySnapshot {
        eligible: false,
        reason: Some("share capital contribution incomplete".to_string()),
        max_loan_amount: 0.0,
        multiplier: 3.0,
        total_deposits: 4_000.0,
        is_verified: false,
        is_on_hold: true,
        outstanding_loans: 0.0,
    }
}

pub(super) fn candidate(id: &str, name: &str, maximum_percentage: f64) -> GuarantorCandidate {
    GuarantorCandidate {
        id: MemberId(id.to_string()),
        full_name: name.to_string(),
        contact: format!("{id}@example.org"),
        available_guarantee_amount: 150_000.0,
        maximum_percentage,
    }
}

/// Record of one guarantee request the stub accepted.
#[derive(Debug, Clone, PartialEq)]
pub(super) struct RecordedRequest {
    pub application_id: String,
    pub guarantor_id: String,
    pub percentage: f64,
}

/// Scriptable in-process backend shared by the unit suites.
pub(super) struct StubBackend {
    pub eligibility: Mutex<Result<EligibilitySnapshot, String>>,
    pub candidates: Mutex<Vec<GuarantorCandidate>>,
    pub failing_guarantors: Mutex<HashSet<String>>,
    pub fail_create_application: Mutex<Option<String>>,
    pub guarantor_request_delay: Mutex<Option<Duration>>,
    pub eligibility_calls: AtomicUsize,
    pub pool_calls: AtomicUsize,
    pub recorded_requests: Mutex<Vec<RecordedRequest>>,
    pub seen_tokens: Mutex<Vec<String>>,
}

impl StubBackend {
    pub fn new() -> Self {
        Self {
            eligibility: Mutex::new(Ok(eligible_snapshot())),
            candidates: Mutex::new(Vec::new()),
            failing_guarantors: Mutex::new(HashSet::new()),
            fail_create_application: Mutex::new(None),
            guarantor_request_delay: Mutex::new(None),
            eligibility_calls: AtomicUsize::new(0),
            pool_calls: AtomicUsize::new(0),
            recorded_requests: Mutex::new(Vec::new()),
            seen_tokens: Mutex::new(Vec::new()),
        }
    }

    pub fn with_candidates(candidates: Vec<GuarantorCandidate>) -> Self {
        let stub = Self::new();
        *stub.candidates.lock().expect("candidates mutex") = candidates;
        stub
    }

    pub fn set_eligibility(&self, result: Result<EligibilitySnapshot, String>) {
        *self.eligibility.lock().expect("eligibility mutex") = result;
    }

    pub fn fail_guarantor(&self, id: &str) {
        self.failing_guarantors
            .lock()
            .expect("failing mutex")
            .insert(id.to_string());
    }

    pub fn clear_guarantor_failures(&self) {
        self.failing_guarantors.lock().expect("failing mutex").clear();
    }

    pub fn delay_guarantor_requests(&self, delay: Duration) {
        *self.guarantor_request_delay.lock().expect("delay mutex") = Some(delay);
    }

    pub fn recorded(&self) -> Vec<RecordedRequest> {
        self.recorded_requests
            .lock()
            .expect("recorded mutex")
            .clone()
    }

    pub fn seen_tokens(&self) -> Vec<String> {
        self.seen_tokens.lock().expect("tokens mutex").clone()
    }
}

#[async_trait]
impl SaccoBackend for StubBackend {
    async fn check_eligibility(
        &self,
        session: &MemberSession,
    ) -> Result<EligibilitySnapshot, BackendError> {
        self.eligibility_calls.fetch_add(1, Ordering::SeqCst);
        self.seen_tokens
            .lock()
            .expect("tokens mutex")
            .push(session.token.clone());
        self.eligibility
            .lock()
            .expect("eligibility mutex")
            .clone()
            .map_err(BackendError::Transport)
    }

    async fn list_eligible_guarantors(
        &self,
        _session: &MemberSession,
        _amount: Money,
    ) -> Result<Vec<GuarantorCandidate>, BackendError> {
        self.pool_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.candidates.lock().expect("candidates mutex").clone())
    }

    async fn create_loan_application(
        &self,
        _session: &MemberSession,
        _draft: &LoanDraft,
    ) -> Result<ApplicationId, BackendError> {
        if let Some(message) = self
            .fail_create_application
            .lock()
            .expect("fail mutex")
            .clone()
        {
            return Err(BackendError::Api {
                status: 422,
                message,
            });
        }
        Ok(ApplicationId("app-1001".to_string()))
    }

    async fn create_guarantor_request(
        &self,
        _session: &MemberSession,
        application_id: &ApplicationId,
        guarantor_id: &MemberId,
        percentage: f64,
        _message: &str,
    ) -> Result<(), BackendError> {
        let delay = *self.guarantor_request_delay.lock().expect("delay mutex");
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self
            .failing_guarantors
            .lock()
            .expect("failing mutex")
            .contains(&guarantor_id.0)
        {
            return Err(BackendError::Transport(format!(
                "connection reset while contacting guarantor {}",
                guarantor_id.0
            )));
        }

        self.recorded_requests
            .lock()
            .expect("recorded mutex")
            .push(RecordedRequest {
                application_id: application_id.0.clone(),
                guarantor_id: guarantor_id.0.clone(),
                percentage,
            });
        Ok(())
    }
}
