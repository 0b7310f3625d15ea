use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use citabot_providers::{HubHealth, IntegrationHub};
use serde::Serialize;

#[derive(Clone)]
pub struct HealthState {
    hub: Arc<IntegrationHub>,
}

#[derive(Clone, Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    #[serde(flatten)]
    pub hub: HubHealth,
    pub checked_at: String,
}

pub fn router(hub: Arc<IntegrationHub>) -> Router {
    Router::new().route("/health", get(health)).with_state(HealthState { hub })
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let hub = state.hub.health_check().await;
    let ready = hub.is_ready();

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        hub,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}
