use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use chatchan_types::api::{ListMessagesQuery, MessageResponse, PostMessageRequest};
use chatchan_types::{AccountId, ChannelId};

use crate::error::ApiError;
use crate::state::AppState;

pub async fn post_message(
    State(state): State<AppState>,
    Path(channel_id): Path<ChannelId>,
    Extension(caller): Extension<AccountId>,
    Json(req): Json<PostMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    // Without a client key the post is not idempotent across retries.
    let uuid = req.uuid.unwrap_or_else(|| Uuid::new_v4().to_string());

    let message = state
        .services
        .post_message(&channel_id, &caller, req.kind, &uuid, &req.body)
        .await?;

    Ok((StatusCode::CREATED, Json(MessageResponse::from(message))))
}

pub async fn list_messages(
    State(state): State<AppState>,
    Path(channel_id): Path<ChannelId>,
    Query(query): Query<ListMessagesQuery>,
    Extension(caller): Extension<AccountId>,
) -> Result<impl IntoResponse, ApiError> {
    let messages = state
        .services
        .list_messages(&channel_id, &caller, query.since, query.limit)
        .await?;

    let body: Vec<MessageResponse> = messages.into_iter().map(MessageResponse::from).collect();
    Ok(Json(body))
}
