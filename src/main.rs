use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use axum_prometheus::PrometheusMetricLayer;
use clap::{Args, Parser, Subcommand};
use metrics_exporter_prometheus::PrometheusHandle;
use sacco_loans::config::AppConfig;
use sacco_loans::error::AppError;
use sacco_loans::telemetry;
use sacco_loans::workflows::loan::{
    loan_router, ApplicationId, BackendError, EligibilitySnapshot, GuarantorCandidate, LoanDraft,
    LoanWorkflow, MemberId, MemberSession, Money, SaccoBackend, WorkflowRegistry,
    HttpBackendConfig, HttpSaccoBackend,
};
use serde_json::json;
use tracing::info;

#[derive(Clone)]
struct AppState {
    readiness: Arc<AtomicBool>,
    metrics: PrometheusHandle,
}

#[derive(Parser, Debug)]
#[command(
    name = "SACCO Loan Workflow",
    about = "Run the loan application and guarantor allocation workflow service",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Walk the loan workflow end to end against an in-process backend
    Demo(DemoArgs),
}

#[derive(Args, Debug, Default)]
struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    port: Option<u16>,
}

#[derive(Args, Debug)]
struct DemoArgs {
    /// Requested loan amount
    #[arg(long, default_value_t = 120_000.0)]
    amount: f64,
    /// Loan term in months
    #[arg(long, default_value_t = 24)]
    term: u32,
}

#[tokio::main]
async fn main() {
    if let Err(err) = run_cli().await {
        eprintln!("application error: {err}");
        std::process::exit(1);
    }
}

async fn run_cli() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => run_server(args).await,
        Command::Demo(args) => run_demo(args).await,
    }
}

async fn run_server(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let backend = HttpSaccoBackend::new(HttpBackendConfig {
        base_url: config.backend.base_url.clone(),
        timeout_secs: config.backend.timeout_secs,
    })
    .map_err(|err| AppError::Workflow(err.into()))?;
    let registry = Arc::new(WorkflowRegistry::new(Arc::new(backend)));

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(AtomicBool::new(false));
    let state = AppState {
        readiness: readiness_flag.clone(),
        metrics: prometheus_handle,
    };

    let app = Router::new()
        .route("/health", get(healthcheck))
        .route("/ready", get(readiness_endpoint))
        .route("/metrics", get(metrics_endpoint))
        .with_state(state)
        .merge(loan_router(registry))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, "loan workflow service ready");

    axum::serve(listener, app).await?;
    Ok(())
}

async fn healthcheck() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn readiness_endpoint(State(state): State<AppState>) -> impl IntoResponse {
    let ready = state.readiness.load(Ordering::Relaxed);
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let payload = if ready {
        json!({ "status": "ready" })
    } else {
        json!({ "status": "initializing" })
    };

    (status, Json(payload))
}

async fn metrics_endpoint(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

/// Canned backend so the demo runs without a live society API.
struct DemoBackend {
    candidates: Vec<GuarantorCandidate>,
}

impl DemoBackend {
    fn new() -> Self {
        let candidates = vec![
            GuarantorCandidate {
                id: MemberId("m-102".to_string()),
                full_name: "Grace Wanjiru".to_string(),
                contact: "grace@example.org".to_string(),
                available_guarantee_amount: 90_000.0,
                maximum_percentage: 60.0,
            },
            GuarantorCandidate {
                id: MemberId("m-215".to_string()),
                full_name: "Peter Otieno".to_string(),
                contact: "peter@example.org".to_string(),
                available_guarantee_amount: 70_000.0,
                maximum_percentage: 50.0,
            },
        ];
        Self { candidates }
    }
}

#[async_trait]
impl SaccoBackend for DemoBackend {
    async fn check_eligibility(
        &self,
        _session: &MemberSession,
    ) -> Result<EligibilitySnapshot, BackendError> {
        Ok(EligibilitySnapshot {
            eligible: true,
            reason: None,
            max_loan_amount: 300_000.0,
            multiplier: 3.0,
            total_deposits: 100_000.0,
            is_verified: true,
            is_on_hold: false,
            outstanding_loans: 0.0,
        })
    }

    async fn list_eligible_guarantors(
        &self,
        _session: &MemberSession,
        _amount: Money,
    ) -> Result<Vec<GuarantorCandidate>, BackendError> {
        Ok(self.candidates.clone())
    }

    async fn create_loan_application(
        &self,
        _session: &MemberSession,
        _draft: &LoanDraft,
    ) -> Result<ApplicationId, BackendError> {
        Ok(ApplicationId("demo-app-001".to_string()))
    }

    async fn create_guarantor_request(
        &self,
        _session: &MemberSession,
        _application_id: &ApplicationId,
        _guarantor_id: &MemberId,
        _percentage: f64,
        _message: &str,
    ) -> Result<(), BackendError> {
        Ok(())
    }
}

async fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let session = MemberSession {
        member_id: MemberId("m-001".to_string()),
        token: "demo-token".to_string(),
    };
    let mut workflow = LoanWorkflow::new(Arc::new(DemoBackend::new()), session);

    println!("Loan workflow demo");
    println!("==================");

    workflow.start().await;
    println!("eligibility: {:?}", workflow.eligibility());
    workflow.next().await.map_err(AppError::Workflow)?;

    workflow.set_amount(args.amount).map_err(AppError::Workflow)?;
    workflow.set_term_months(args.term).map_err(AppError::Workflow)?;
    workflow
        .set_purpose("Working capital for the family shop".to_string())
        .map_err(AppError::Workflow)?;
    println!("details: {:.2} over {} months", args.amount, args.term);
    workflow.next().await.map_err(AppError::Workflow)?;

    let pool = workflow
        .available_guarantors()
        .await
        .map_err(AppError::Workflow)?;
    println!("guarantor pool: {} candidate(s)", pool.len());
    for candidate in &pool {
        let assigned = workflow
            .add_guarantor(&candidate.id.0)
            .map_err(AppError::Workflow)?;
        println!(
            "  pledged {} at {:.1}% (total {:.1}%)",
            candidate.full_name,
            assigned,
            workflow.allocation().total_percentage()
        );
    }

    workflow.next().await.map_err(AppError::Workflow)?;
    let view = workflow.view();
    match view.submitted_application {
        Some(application) => println!(
            "application submitted with id {}",
            application.application_id.0
        ),
        None => println!("workflow stopped at {}", view.step_label),
    }

    Ok(())
}
