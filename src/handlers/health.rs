use axum::{extract::State, Json};
use chrono::Utc;
use tracing::debug;

use crate::models::HealthResponse;
use crate::ws::RoomRegistry;
use crate::AppState;

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    debug!("Health check requested");
    Json(health_response(&state.registry))
}

pub fn health_response(registry: &RoomRegistry) -> HealthResponse {
    HealthResponse {
        status: "ok".to_string(),
        document_count: registry.len(),
        timestamp: Utc::now().to_rfc3339(),
    }
}
