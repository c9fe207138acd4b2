use axum::{
    Json, Router,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use steel_cut_optimizer::config::{Constraints, SolverConfig};
use steel_cut_optimizer::error::OptimizeError;
use steel_cut_optimizer::inventory::{
    DesignSegment, ModuleBar, WeldingCheck, check_welding_feasibility, normalize,
};
use steel_cut_optimizer::solver::{CancelToken, Progress, RunRequest};
use steel_cut_optimizer::types::{RunOutcome, RunStatus};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<RunStatus>,
    error: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    demand_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    suggested_welds: Option<u32>,
}

struct ApiError(OptimizeError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            OptimizeError::InvalidInput { .. } => StatusCode::BAD_REQUEST,
            OptimizeError::Infeasible { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            OptimizeError::Internal { .. } => {
                sentry::capture_error(&self.0);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let (demand_id, suggested_welds) = match &self.0 {
            OptimizeError::Infeasible {
                demand_id,
                suggested_welds,
                ..
            } => (Some(demand_id.clone()), *suggested_welds),
            _ => (None, None),
        };
        let body = ErrorBody {
            status: self.0.status(),
            error: self.0.kind(),
            message: self.0.to_string(),
            demand_id,
            suggested_welds,
        };
        (status, Json(body)).into_response()
    }
}

impl From<OptimizeError> for ApiError {
    fn from(err: OptimizeError) -> Self {
        ApiError(err)
    }
}

#[derive(Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
struct ValidateRequest {
    design_segments: Vec<DesignSegment>,
    module_bars: Vec<ModuleBar>,
    #[serde(default)]
    constraints: Constraints,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ValidateResponse {
    valid: bool,
    errors: Vec<String>,
    welding: Option<WeldingCheck>,
    #[serde(skip_serializing_if = "Option::is_none")]
    warning: Option<String>,
}

async fn validate(Json(req): Json<ValidateRequest>) -> Json<ValidateResponse> {
    let mut errors = req.constraints.violations();
    let welding = match normalize(&req.design_segments, &req.module_bars, false) {
        Ok(inventory) => Some(check_welding_feasibility(
            &inventory.demand,
            &inventory.supply,
            req.constraints.max_welding_segments,
        )),
        Err(e) => {
            errors.push(e.to_string());
            None
        }
    };
    let warning = welding.as_ref().and_then(WeldingCheck::message);
    Json(ValidateResponse {
        valid: errors.is_empty() && welding.as_ref().is_some_and(|w| w.feasible),
        errors,
        welding,
        warning,
    })
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OptimizeResponse {
    #[serde(flatten)]
    outcome: RunOutcome,
    partial: bool,
    loss_rate_percent: f64,
    samples: Vec<Progress>,
}

/// Cancels the run if the handler future is dropped before it finishes.
struct CancelOnDrop(CancelToken);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

async fn optimize(Json(req): Json<RunRequest>) -> Result<Json<OptimizeResponse>, ApiError> {
    tracing::info!(
        body = serde_json::to_string(&req).unwrap_or_default(),
        "POST /optimize"
    );

    let solver = req.solver(SolverConfig::default())?;
    let _guard = CancelOnDrop(solver.cancel_token());

    let run = tokio::task::spawn_blocking(move || {
        let mut samples: Vec<Progress> = Vec::new();
        let mut sink = |p: &Progress| samples.push(p.clone());
        let outcome = solver.solve_with_progress(&mut sink);
        outcome.map(|outcome| (outcome, samples))
    })
    .await
    .map_err(|e| OptimizeError::internal(format!("optimization worker failed: {e}")))?;

    let (outcome, samples) = run?;
    Ok(Json(OptimizeResponse {
        partial: outcome.is_partial(),
        loss_rate_percent: outcome.plan.loss_rate_percent(),
        outcome,
        samples,
    }))
}

#[tokio::main]
async fn main() {
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open("development.log")
        .expect("failed to open development.log");

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_target(false)
        .with_ansi(false)
        .with_max_level(Level::INFO)
        .init();

    let _sentry = std::env::var("SENTRY_DSN").ok().map(|dsn| {
        sentry::init((
            dsn,
            sentry::ClientOptions {
                release: sentry::release_name!(),
                ..Default::default()
            },
        ))
    });

    let port = std::env::var("PORT").unwrap_or_else(|_| "3001".to_string());
    let addr = format!("0.0.0.0:{port}");

    let app = Router::new()
        .route("/up", get(|| async { "ok" }))
        .route("/validate", post(validate))
        .route("/optimize", post(optimize))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        );

    let listener = tokio::net::TcpListener::bind(&addr).await.unwrap();
    eprintln!("Listening on {addr}");
    axum::serve(listener, app).await.unwrap();
}
