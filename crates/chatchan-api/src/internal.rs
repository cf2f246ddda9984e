use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde_json::json;
use tracing::warn;

use chatchan_types::api::{EnqueueSendMessageRequest, HealthResponse};

use crate::error::ApiError;
use crate::state::AppState;

/// Queue a fan-out for a message stored by another component.
pub async fn enqueue_send_message(
    State(state): State<AppState>,
    Json(req): Json<EnqueueSendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let event_id = state
        .services
        .enqueue_send_message(&req.uuid, req.channel_id)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "event_id": event_id }))))
}

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    match state.services.queue().depth().await {
        Ok(queue_depth) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "ok".into(),
                queue_depth,
            }),
        ),
        Err(e) => {
            warn!("Health check could not read the queue: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "degraded".into(),
                    queue_depth: -1,
                }),
            )
        }
    }
}
