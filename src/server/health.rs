use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use super::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub host: String,
    pub uptime_seconds: u64,
    pub registered_jobs: usize,
    pub execution_enabled: bool,
    pub version: String,
}

pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    tracing::debug!("Health check");

    let response = HealthResponse {
        status: "ok".to_string(),
        host: state.service.host().to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        registered_jobs: state.service.list_job_names().len(),
        execution_enabled: state.service.is_execution_enabled(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    };

    (StatusCode::OK, Json(response))
}
