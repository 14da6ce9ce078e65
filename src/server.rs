//! HTTP job intake.
//!
//! `POST /api-endpoint` authenticates the request with the shared secret,
//! validates it into a [`BuildJob`](crate::models::BuildJob), hands it to the
//! [`PipelineRunner`] and answers immediately. Pipeline outcomes are only
//! visible through logs, the callback, and the run endpoints.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::errors::PipelineError;
use crate::models::JobRequest;
use crate::orchestrator::PipelineRunner;

/// Header carrying the shared secret on operator endpoints.
pub const SECRET_HEADER: &str = "x-shared-secret";

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub runner: PipelineRunner,
    pub shared_secret: String,
}

impl AppState {
    /// Exact match against the configured secret. An unset secret matches
    /// nothing.
    fn secret_matches(&self, candidate: &str) -> bool {
        !self.shared_secret.is_empty() && candidate == self.shared_secret
    }
}

pub type SharedState = Arc<AppState>;

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    Forbidden(String),
    BadRequest(String),
    NotFound(String),
    Conflict(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::AlreadyRunning { .. } => ApiError::Conflict(err.to_string()),
            other => ApiError::BadRequest(other.to_string()),
        }
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/api-endpoint", post(accept_job))
        .route("/api/runs", get(list_runs))
        .route("/api/runs/{id}", get(get_run))
        .route("/api/runs/{id}/cancel", post(cancel_run))
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

async fn accept_job(
    State(state): State<SharedState>,
    Json(body): Json<serde_json::Value>,
) -> Result<impl IntoResponse, ApiError> {
    let secret = body.get("secret").and_then(|s| s.as_str()).unwrap_or("");
    if !state.secret_matches(secret) {
        tracing::warn!(
            task = body.get("task").and_then(|t| t.as_str()).unwrap_or(""),
            "rejected job request: invalid secret"
        );
        return Err(ApiError::Forbidden("Invalid secret".to_string()));
    }

    let request: JobRequest = serde_json::from_value(body)
        .map_err(|e| ApiError::BadRequest(format!("Invalid job request: {}", e)))?;
    let job = request.into_job()?;
    let task = job.task.clone();
    let round = job.round;

    let run_id = state.runner.start_run(job)?;
    tracing::info!(%run_id, task = %task, round, "job accepted");

    Ok(Json(serde_json::json!({
        "status": "accepted",
        "message": "Request received and verified.",
        "run_id": run_id,
        "task": task,
        "round": round,
    })))
}

async fn list_runs(State(state): State<SharedState>) -> impl IntoResponse {
    Json(state.runner.runs())
}

fn parse_run_id(id: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(id).map_err(|_| ApiError::BadRequest(format!("Invalid run id: {}", id)))
}

async fn get_run(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let run_id = parse_run_id(&id)?;
    state
        .runner
        .run(run_id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Run {} not found", run_id)))
}

async fn cancel_run(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let secret = headers
        .get(SECRET_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if !state.secret_matches(secret) {
        return Err(ApiError::Forbidden("Invalid secret".to_string()));
    }

    let run_id = parse_run_id(&id)?;
    if !state.runner.cancel(run_id) {
        return Err(ApiError::NotFound(format!(
            "Run {} not found or already finished",
            run_id
        )));
    }
    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({"status": "cancelling", "run_id": run_id})),
    ))
}

// ── Server lifecycle ──────────────────────────────────────────────────

/// Serve until Ctrl-C, then let in-flight runs stop at their next stage
/// boundary.
pub async fn start_server(state: SharedState, addr: &str) -> Result<()> {
    let app = build_router(Arc::clone(&state));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    tracing::info!(%local_addr, "pagesmith listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("waiting for in-flight runs");
    state.runner.shutdown().await;
    tracing::info!("server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}
