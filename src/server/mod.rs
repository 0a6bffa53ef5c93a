pub mod health;
pub mod routes;

use std::sync::Arc;
use std::time::Instant;

use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::daemon::scheduler::JobService;
use crate::models::ServiceConfig;

/// Shared application state for the Axum server.
pub struct AppState {
    pub service: Arc<JobService>,
    pub config: Arc<ServiceConfig>,
    pub start_time: Instant,
}

/// Create the Axum router with all routes.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/api/jobs", get(routes::list_jobs))
        .route("/api/jobs/{name}", post(routes::execute_job))
        .route("/api/jobs/{name}/queued", delete(routes::remove_queued))
        .route("/api/jobs/{name}/history", get(routes::job_history))
        .route("/api/job-infos/{id}", get(routes::get_job_info))
        .route("/api/constraints", get(routes::list_constraints))
        .route("/api/execution/enable", post(routes::enable_execution))
        .route("/api/execution/disable", post(routes::disable_execution))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
}
