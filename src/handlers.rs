use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use std::sync::Arc;

use crate::health::HealthChecker;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health: Arc<HealthChecker>,
}

/// Rate limited demo endpoint
pub async fn hello() -> &'static str {
    "Hello, world!"
}

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let status = state.health.check_health().await;
    let code = if status.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (code, Json(status))
}
