//! Boundary to the society's REST backend. The workflow only ever talks to
//! the backend through [`SaccoBackend`], so tests and the demo command can
//! substitute an in-process implementation.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use super::domain::{
    ApplicationId, EligibilitySnapshot, GuarantorCandidate, LoanDraft, MemberId, MemberSession,
    Money,
};

/// Failure modes of a backend call, split along the retryability line:
/// transport failures are safe to retry, API rejections are business
/// decisions surfaced verbatim.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("could not reach the society backend: {0}")]
    Transport(String),
    #[error("{message}")]
    Api { status: u16, message: String },
}

impl BackendError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, BackendError::Transport(_))
    }
}

/// Logical operations the workflow consumes from the backend collaborator.
/// Every call receives the member's session explicitly.
#[async_trait]
pub trait SaccoBackend: Send + Sync {
    async fn check_eligibility(
        &self,
        session: &MemberSession,
    ) -> Result<EligibilitySnapshot, BackendError>;

    async fn list_eligible_guarantors(
        &self,
        session: &MemberSession,
        amount: Money,
    ) -> Result<Vec<GuarantorCandidate>, BackendError>;

    async fn create_loan_application(
        &self,
        session: &MemberSession,
        draft: &LoanDraft,
    ) -> Result<ApplicationId, BackendError>;

    async fn create_guarantor_request(
        &self,
        session: &MemberSession,
        application_id: &ApplicationId,
        guarantor_id: &MemberId,
        percentage: f64,
        message: &str,
    ) -> Result<(), BackendError>;
}

/// Connection settings for the HTTP backend.
#[derive(Debug, Clone)]
pub struct HttpBackendConfig {
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for HttpBackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/api".to_string(),
            timeout_secs: 30,
        }
    }
}

/// REST implementation of [`SaccoBackend`].
pub struct HttpSaccoBackend {
    config: HttpBackendConfig,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
}

#[derive(Debug, Serialize)]
struct CreateApplicationBody<'a> {
    amount: Money,
    term_months: u32,
    purpose: &'a str,
    needs_guarantors: bool,
    supporting_document: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct CreateApplicationResponse {
    application_id: String,
}

#[derive(Debug, Serialize)]
struct GuarantorRequestBody<'a> {
    guarantor_id: &'a str,
    percentage: f64,
    message: &'a str,
}

impl HttpSaccoBackend {
    pub fn new(config: HttpBackendConfig) -> Result<Self, BackendError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|err| BackendError::Transport(err.to_string()))?;

        Ok(Self { config, client })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn read_error(response: reqwest::Response) -> BackendError {
        let status = response.status().as_u16();
        let message = match response.json::<ApiErrorBody>().await {
            Ok(body) => body.message,
            Err(_) => format!("backend returned status {status}"),
        };
        BackendError::Api { status, message }
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, BackendError> {
        if response.status() == StatusCode::OK || response.status() == StatusCode::CREATED {
            Ok(response)
        } else {
            Err(Self::read_error(response).await)
        }
    }
}

#[async_trait]
impl SaccoBackend for HttpSaccoBackend {
    async fn check_eligibility(
        &self,
        session: &MemberSession,
    ) -> Result<EligibilitySnapshot, BackendError> {
        let response = self
            .client
            .get(self.url("loans/eligibility"))
            .bearer_auth(&session.token)
            .send()
            .await
            .map_err(|err| BackendError::Transport(err.to_string()))?;

        Self::check_status(response)
            .await?
            .json::<EligibilitySnapshot>()
            .await
            .map_err(|err| BackendError::Transport(err.to_string()))
    }

    async fn list_eligible_guarantors(
        &self,
        session: &MemberSession,
        amount: Money,
    ) -> Result<Vec<GuarantorCandidate>, BackendError> {
        let response = self
            .client
            .get(self.url("loans/guarantors"))
            .query(&[("amount", amount)])
            .bearer_auth(&session.token)
            .send()
            .await
            .map_err(|err| BackendError::Transport(err.to_string()))?;

        Self::check_status(response)
            .await?
            .json::<Vec<GuarantorCandidate>>()
            .await
            .map_err(|err| BackendError::Transport(err.to_string()))
    }

    async fn create_loan_application(
        &self,
        session: &MemberSession,
        draft: &LoanDraft,
    ) -> Result<ApplicationId, BackendError> {
        let body = CreateApplicationBody {
            amount: draft.amount,
            term_months: draft.term_months,
            purpose: &draft.purpose,
            needs_guarantors: draft.needs_guarantors,
            supporting_document: draft
                .supporting_document
                .as_ref()
                .map(|doc| doc.storage_key.as_str()),
        };

        let response = self
            .client
            .post(self.url("loans/applications"))
            .bearer_auth(&session.token)
            .json(&body)
            .send()
            .await
            .map_err(|err| BackendError::Transport(err.to_string()))?;

        let created = Self::check_status(response)
            .await?
            .json::<CreateApplicationResponse>()
            .await
            .map_err(|err| BackendError::Transport(err.to_string()))?;

        Ok(ApplicationId(created.application_id))
    }

    async fn create_guarantor_request(
        &self,
        session: &MemberSession,
        application_id: &ApplicationId,
        guarantor_id: &MemberId,
        percentage: f64,
        message: &str,
    ) -> Result<(), BackendError> {
        let body = GuarantorRequestBody {
            guarantor_id: &guarantor_id.0,
            percentage,
            message,
        };

        let response = self
            .client
            .post(self.url(&format!(
                "loans/applications/{}/guarantor-requests",
                application_id.0
            )))
            .bearer_auth(&session.token)
            .json(&body)
            .send()
            .await
            .map_err(|err| BackendError::Transport(err.to_string()))?;

        Self::check_status(response).await.map(|_| ())
    }
}
