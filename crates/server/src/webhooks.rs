//! Inbound webhook endpoints for the messaging and scheduling providers.
//!
//! Providers deliver at-least-once: a handled duplicate is a 200, not an
//! error. Only synchronous input validation (an unparseable phone) is a 400;
//! provider outages behind the orchestrator surface through retries and
//! escalation, never as webhook failure storms.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::post,
    Router,
};
use serde_json::json;
use tracing::{error, info};

use citabot_orchestrator::{
    InboundMessage, InboundOutcome, Orchestrator, OrchestratorError, SchedulingCallback,
};

#[derive(Clone)]
pub struct WebhookState {
    orchestrator: Arc<Orchestrator>,
}

pub fn router(orchestrator: Arc<Orchestrator>) -> Router {
    Router::new()
        .route("/webhooks/messaging", post(messaging_webhook))
        .route("/webhooks/scheduling", post(scheduling_webhook))
        .with_state(WebhookState { orchestrator })
}

async fn messaging_webhook(
    State(state): State<WebhookState>,
    Json(inbound): Json<InboundMessage>,
) -> impl IntoResponse {
    match state.orchestrator.handle_inbound_message(inbound).await {
        Ok(InboundOutcome::Duplicate) => {
            (StatusCode::OK, Json(json!({ "accepted": true, "duplicate": true })))
        }
        Ok(InboundOutcome::Handled { step, reply_sent }) => (
            StatusCode::OK,
            Json(json!({
                "accepted": true,
                "duplicate": false,
                "step": step.as_str(),
                "reply_sent": reply_sent,
            })),
        ),
        Err(OrchestratorError::InvalidPhone(error)) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "accepted": false, "error": error.to_string() })),
        ),
        Err(error) => {
            error!(
                event_name = "webhooks.messaging_failed",
                error = %error,
                "inbound message processing failed"
            );
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "accepted": false, "error": "internal processing failure" })),
            )
        }
    }
}

async fn scheduling_webhook(
    State(state): State<WebhookState>,
    Json(callback): Json<SchedulingCallback>,
) -> impl IntoResponse {
    let kind = callback.kind.as_str();
    match state.orchestrator.handle_scheduling_event(callback).await {
        Ok(outcome) => {
            info!(
                event_name = "webhooks.scheduling_handled",
                kind,
                outcome = ?outcome,
                "scheduling callback handled"
            );
            (StatusCode::OK, Json(json!({ "accepted": true })))
        }
        Err(error) => {
            error!(
                event_name = "webhooks.scheduling_failed",
                kind,
                error = %error,
                "scheduling callback processing failed"
            );
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "accepted": false, "error": "internal processing failure" })),
            )
        }
    }
}
