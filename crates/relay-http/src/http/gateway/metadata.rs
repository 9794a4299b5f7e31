//! Metadata route handlers for the publish gateway

use super::server::AppState;
use crate::http::HealthCheckResponse;
use axum::{extract::State, response::Json};
use log::trace;

pub const SERVICE_NAME: &str = "relay";

pub async fn health_check(State(_app_state): State<AppState>) -> Json<HealthCheckResponse> {
    trace!("GET /health");
    Json(HealthCheckResponse {
        status: "healthy".to_string(),
        service: SERVICE_NAME.to_string(),
        timestamp: chrono::Utc::now().timestamp().max(0) as u64,
    })
}
