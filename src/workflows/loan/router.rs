use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Mutex;

use super::backend::SaccoBackend;
use super::controller::{LoanWorkflow, LoanWorkflowError};
use super::domain::{MemberId, MemberSession, Money, WorkflowStep};

/// One workflow per member, created on demand and owned by the service.
/// Each workflow sits behind its own lock; the registry lock covers only the
/// map, so one member's slow backend call never stalls another member's
/// requests.
pub struct WorkflowRegistry<B> {
    backend: Arc<B>,
    workflows: Mutex<HashMap<String, Arc<Mutex<LoanWorkflow<B>>>>>,
}

impl<B: SaccoBackend> WorkflowRegistry<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self {
            backend,
            workflows: Mutex::new(HashMap::new()),
        }
    }

    /// Fetch or create the member's workflow, holding the registry lock only
    /// for the map access. Re-starting refreshes the stored session so a new
    /// token replaces the old one.
    async fn start_workflow(&self, session: MemberSession) -> Arc<Mutex<LoanWorkflow<B>>> {
        let member_id = session.member_id.0.clone();
        let mut workflows = self.workflows.lock().await;
        match workflows.get(&member_id) {
            Some(workflow) => {
                let workflow = Arc::clone(workflow);
                drop(workflows);
                workflow.lock().await.set_session(session);
                workflow
            }
            None => {
                let workflow = Arc::new(Mutex::new(LoanWorkflow::new(
                    Arc::clone(&self.backend),
                    session,
                )));
                workflows.insert(member_id, Arc::clone(&workflow));
                workflow
            }
        }
    }

    async fn find(&self, member_id: &str) -> Option<Arc<Mutex<LoanWorkflow<B>>>> {
        self.workflows.lock().await.get(member_id).cloned()
    }
}

/// HTTP control surface over the workflow facade.
pub fn loan_router<B>(registry: Arc<WorkflowRegistry<B>>) -> Router
where
    B: SaccoBackend + 'static,
{
    Router::new()
        .route("/api/v1/loans/workflow", post(start_handler::<B>))
        .route("/api/v1/loans/workflow/:member_id", get(view_handler::<B>))
        .route(
            "/api/v1/loans/workflow/:member_id/eligibility",
            post(refresh_eligibility_handler::<B>),
        )
        .route(
            "/api/v1/loans/workflow/:member_id/details",
            put(details_handler::<B>),
        )
        .route(
            "/api/v1/loans/workflow/:member_id/next",
            post(next_handler::<B>),
        )
        .route(
            "/api/v1/loans/workflow/:member_id/back",
            post(back_handler::<B>),
        )
        .route(
            "/api/v1/loans/workflow/:member_id/jump",
            post(jump_handler::<B>),
        )
        .route(
            "/api/v1/loans/workflow/:member_id/guarantors",
            get(pool_handler::<B>).post(add_guarantor_handler::<B>),
        )
        .route(
            "/api/v1/loans/workflow/:member_id/guarantors/:guarantor_id",
            put(set_percentage_handler::<B>).delete(remove_guarantor_handler::<B>),
        )
        .with_state(registry)
}

#[derive(Debug, Deserialize)]
struct StartBody {
    member_id: String,
    token: String,
}

#[derive(Debug, Deserialize, Default)]
struct DetailsBody {
    amount: Option<Money>,
    term_months: Option<u32>,
    purpose: Option<String>,
    needs_guarantors: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct JumpBody {
    step: WorkflowStep,
}

#[derive(Debug, Deserialize)]
struct AddGuarantorBody {
    guarantor_id: String,
}

#[derive(Debug, Deserialize)]
struct PercentageBody {
    percentage: f64,
}

fn error_response(error: LoanWorkflowError) -> Response {
    let status = match &error {
        LoanWorkflowError::Backend(backend_error) if backend_error.is_retryable() => {
            StatusCode::BAD_GATEWAY
        }
        LoanWorkflowError::EligibilityUnavailable { .. }
        | LoanWorkflowError::GuaranteeRequestsFailed { .. } => StatusCode::BAD_GATEWAY,
        LoanWorkflowError::DraftAlreadyCreated
        | LoanWorkflowError::ApplicationFinal
        | LoanWorkflowError::WrongStep { .. }
        | LoanWorkflowError::ForwardJumpNotAllowed { .. } => StatusCode::CONFLICT,
        _ => StatusCode::UNPROCESSABLE_ENTITY,
    };

    let mut payload = json!({ "error": error.to_string() });
    match &error {
        LoanWorkflowError::Ineligible { reasons } => {
            payload["reasons"] = json!(reasons
                .iter()
                .map(|reason| reason.message())
                .collect::<Vec<_>>());
        }
        LoanWorkflowError::GuaranteeRequestsFailed { report } => {
            payload["outcomes"] = json!(report.outcomes);
        }
        _ => {}
    }

    (status, Json(payload)).into_response()
}

fn not_found(member_id: &str) -> Response {
    let payload = json!({ "error": format!("no loan workflow for member {member_id}") });
    (StatusCode::NOT_FOUND, Json(payload)).into_response()
}

async fn start_handler<B>(
    State(registry): State<Arc<WorkflowRegistry<B>>>,
    Json(body): Json<StartBody>,
) -> Response
where
    B: SaccoBackend + 'static,
{
    let session = MemberSession {
        member_id: MemberId(body.member_id),
        token: body.token,
    };

    let workflow = registry.start_workflow(session).await;
    let mut workflow = workflow.lock().await;
    workflow.start().await;

    (StatusCode::CREATED, Json(workflow.view())).into_response()
}

async fn view_handler<B>(
    State(registry): State<Arc<WorkflowRegistry<B>>>,
    Path(member_id): Path<String>,
) -> Response
where
    B: SaccoBackend + 'static,
{
    match registry.find(&member_id).await {
        Some(workflow) => {
            let workflow = workflow.lock().await;
            (StatusCode::OK, Json(workflow.view())).into_response()
        }
        None => not_found(&member_id),
    }
}

async fn refresh_eligibility_handler<B>(
    State(registry): State<Arc<WorkflowRegistry<B>>>,
    Path(member_id): Path<String>,
) -> Response
where
    B: SaccoBackend + 'static,
{
    match registry.find(&member_id).await {
        Some(workflow) => {
            let mut workflow = workflow.lock().await;
            workflow.refresh_eligibility().await;
            (StatusCode::OK, Json(workflow.view())).into_response()
        }
        None => not_found(&member_id),
    }
}

async fn details_handler<B>(
    State(registry): State<Arc<WorkflowRegistry<B>>>,
    Path(member_id): Path<String>,
    Json(body): Json<DetailsBody>,
) -> Response
where
    B: SaccoBackend + 'static,
{
    let Some(workflow) = registry.find(&member_id).await else {
        return not_found(&member_id);
    };
    let mut workflow = workflow.lock().await;

    if let Some(amount) = body.amount {
        if let Err(error) = workflow.set_amount(amount) {
            return error_response(error);
        }
    }
    if let Some(term) = body.term_months {
        if let Err(error) = workflow.set_term_months(term) {
            return error_response(error);
        }
    }
    if let Some(purpose) = body.purpose {
        if let Err(error) = workflow.set_purpose(purpose) {
            return error_response(error);
        }
    }
    if let Some(needs) = body.needs_guarantors {
        if let Err(error) = workflow.set_needs_guarantors(needs) {
            return error_response(error);
        }
    }

    (StatusCode::OK, Json(workflow.view())).into_response()
}

async fn next_handler<B>(
    State(registry): State<Arc<WorkflowRegistry<B>>>,
    Path(member_id): Path<String>,
) -> Response
where
    B: SaccoBackend + 'static,
{
    let Some(workflow) = registry.find(&member_id).await else {
        return not_found(&member_id);
    };
    let mut workflow = workflow.lock().await;

    match workflow.next().await {
        Ok(_) => (StatusCode::OK, Json(workflow.view())).into_response(),
        Err(error) => error_response(error),
    }
}

async fn back_handler<B>(
    State(registry): State<Arc<WorkflowRegistry<B>>>,
    Path(member_id): Path<String>,
) -> Response
where
    B: SaccoBackend + 'static,
{
    let Some(workflow) = registry.find(&member_id).await else {
        return not_found(&member_id);
    };
    let mut workflow = workflow.lock().await;

    match workflow.back() {
        Ok(_) => (StatusCode::OK, Json(workflow.view())).into_response(),
        Err(error) => error_response(error),
    }
}

async fn jump_handler<B>(
    State(registry): State<Arc<WorkflowRegistry<B>>>,
    Path(member_id): Path<String>,
    Json(body): Json<JumpBody>,
) -> Response
where
    B: SaccoBackend + 'static,
{
    let Some(workflow) = registry.find(&member_id).await else {
        return not_found(&member_id);
    };
    let mut workflow = workflow.lock().await;

    match workflow.jump_to(body.step) {
        Ok(_) => (StatusCode::OK, Json(workflow.view())).into_response(),
        Err(error) => error_response(error),
    }
}

async fn pool_handler<B>(
    State(registry): State<Arc<WorkflowRegistry<B>>>,
    Path(member_id): Path<String>,
) -> Response
where
    B: SaccoBackend + 'static,
{
    let Some(workflow) = registry.find(&member_id).await else {
        return not_found(&member_id);
    };
    let mut workflow = workflow.lock().await;

    match workflow.available_guarantors().await {
        Ok(candidates) => (StatusCode::OK, Json(candidates)).into_response(),
        Err(error) => error_response(error),
    }
}

async fn add_guarantor_handler<B>(
    State(registry): State<Arc<WorkflowRegistry<B>>>,
    Path(member_id): Path<String>,
    Json(body): Json<AddGuarantorBody>,
) -> Response
where
    B: SaccoBackend + 'static,
{
    let Some(workflow) = registry.find(&member_id).await else {
        return not_found(&member_id);
    };
    let mut workflow = workflow.lock().await;

    match workflow.add_guarantor(&body.guarantor_id) {
        Ok(assigned) => {
            let mut payload =
                serde_json::to_value(workflow.view()).unwrap_or_else(|_| json!({}));
            payload["assigned_percentage"] = json!(assigned);
            (StatusCode::OK, Json(payload)).into_response()
        }
        Err(error) => error_response(error),
    }
}

async fn remove_guarantor_handler<B>(
    State(registry): State<Arc<WorkflowRegistry<B>>>,
    Path((member_id, guarantor_id)): Path<(String, String)>,
) -> Response
where
    B: SaccoBackend + 'static,
{
    let Some(workflow) = registry.find(&member_id).await else {
        return not_found(&member_id);
    };
    let mut workflow = workflow.lock().await;

    match workflow.remove_guarantor(&guarantor_id) {
        Ok(()) => (StatusCode::OK, Json(workflow.view())).into_response(),
        Err(error) => error_response(error),
    }
}

async fn set_percentage_handler<B>(
    State(registry): State<Arc<WorkflowRegistry<B>>>,
    Path((member_id, guarantor_id)): Path<(String, String)>,
    Json(body): Json<PercentageBody>,
) -> Response
where
    B: SaccoBackend + 'static,
{
    let Some(workflow) = registry.find(&member_id).await else {
        return not_found(&member_id);
    };
    let mut workflow = workflow.lock().await;

    match workflow.set_guarantor_percentage(&guarantor_id, body.percentage) {
        Ok(()) => (StatusCode::OK, Json(workflow.view())).into_response(),
        Err(error) => error_response(error),
    }
}
