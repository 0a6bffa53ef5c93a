use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::AppState;
use crate::errors::JobServiceError;

// ---------------------------------------------------------------------------
// Error response
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

fn error_response(status: StatusCode, error: &str, message: &str) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
            message: message.to_string(),
        }),
    )
        .into_response()
}

fn status_for(err: &JobServiceError) -> StatusCode {
    match err {
        JobServiceError::NotRegistered(_) => StatusCode::NOT_FOUND,
        JobServiceError::AlreadyQueued(_) | JobServiceError::AlreadyRunning(_) => {
            StatusCode::CONFLICT
        }
        JobServiceError::ExecutionNotNecessary(_) => StatusCode::PRECONDITION_FAILED,
        JobServiceError::ExecutionDisabled(_) => StatusCode::SERVICE_UNAVAILABLE,
        JobServiceError::UnknownJob(_) => StatusCode::BAD_REQUEST,
        JobServiceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for JobServiceError {
    fn into_response(self) -> Response {
        let status = status_for(&self);
        if status.is_server_error() {
            tracing::error!("{}", self);
        }
        error_response(status, self.code(), &self.to_string())
    }
}

fn internal_error(context: &str, e: anyhow::Error) -> Response {
    tracing::error!("{}: {:#}", context, e);
    error_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        "internal_error",
        &format!("{}: {:#}", context, e),
    )
}

// ---------------------------------------------------------------------------
// Request / response bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Default)]
pub struct ExecuteParams {
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ExecuteResponse {
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ExecutionStatus {
    pub execution_enabled: bool,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// GET /api/jobs
pub async fn list_jobs(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.service.list_job_names())
}

/// GET /api/constraints
pub async fn list_constraints(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.service.list_running_constraints())
}

/// POST /api/jobs/{name}?force=bool
pub async fn execute_job(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Query(params): Query<ExecuteParams>,
) -> Response {
    match state.service.execute_job(&name, params.force).await {
        Ok(id) => {
            tracing::info!("Execution of '{}' requested via API: {}", name, id);
            (StatusCode::CREATED, Json(ExecuteResponse { id, name })).into_response()
        }
        Err(e) => {
            tracing::debug!("Execution of '{}' rejected: {}", name, e);
            e.into_response()
        }
    }
}

/// DELETE /api/jobs/{name}/queued
pub async fn remove_queued(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Response {
    match state.service.repository().remove_queued(&name).await {
        Ok(true) => {
            tracing::info!("Removed queued job '{}'", name);
            StatusCode::NO_CONTENT.into_response()
        }
        Ok(false) => error_response(
            StatusCode::NOT_FOUND,
            "not_queued",
            &format!("No queued job named '{}'", name),
        ),
        Err(e) => internal_error("Failed to remove queued job", e),
    }
}

/// GET /api/jobs/{name}/history
pub async fn job_history(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Response {
    match state.service.repository().find_by_name(&name).await {
        Ok(jobs) => Json(jobs).into_response(),
        Err(e) => internal_error("Failed to load job history", e),
    }
}

/// GET /api/job-infos/{id}
pub async fn get_job_info(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> Response {
    match state.service.repository().find_by_id(id).await {
        Ok(Some(job)) => Json(job).into_response(),
        Ok(None) => error_response(
            StatusCode::NOT_FOUND,
            "not_found",
            &format!("Job info '{}' not found", id),
        ),
        Err(e) => internal_error("Failed to load job info", e),
    }
}

/// POST /api/execution/enable
pub async fn enable_execution(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.service.set_execution_enabled(true);
    Json(ExecutionStatus {
        execution_enabled: true,
    })
}

/// POST /api/execution/disable
pub async fn disable_execution(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.service.set_execution_enabled(false);
    Json(ExecutionStatus {
        execution_enabled: false,
    })
}
