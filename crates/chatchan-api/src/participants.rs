use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};

use chatchan_types::api::{
    LinkResponse, MarkReadRequest, MarkReadResponse, ParticipantQuery, ParticipantResponse,
};
use chatchan_types::{AccountId, ChannelId};

use crate::error::ApiError;
use crate::state::AppState;

/// The caller's inbox. With `since`, only rows updated after that instant.
pub async fn list_participants(
    State(state): State<AppState>,
    Query(query): Query<ParticipantQuery>,
    Extension(caller): Extension<AccountId>,
) -> Result<impl IntoResponse, ApiError> {
    let participants = state.services.participants();
    let rows = match query.since {
        Some(since) => participants.list_for_account_since(&caller, since).await?,
        None => participants.list_for_account(&caller).await?,
    };

    let body: Vec<ParticipantResponse> = rows.into_iter().map(ParticipantResponse::from).collect();
    Ok(Json(body))
}

pub async fn mark_read(
    State(state): State<AppState>,
    Path(channel_id): Path<ChannelId>,
    Extension(caller): Extension<AccountId>,
    Json(req): Json<MarkReadRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let advanced = state
        .services
        .mark_read(&channel_id, &caller, req.through)
        .await?;
    Ok(Json(MarkReadResponse { advanced }))
}

pub async fn link(
    State(state): State<AppState>,
    Path(channel_id): Path<ChannelId>,
    Extension(caller): Extension<AccountId>,
) -> Result<impl IntoResponse, ApiError> {
    let participant_id = state.services.link(&channel_id, &caller).await?;
    Ok(Json(LinkResponse { participant_id }))
}

pub async fn unlink(
    State(state): State<AppState>,
    Path(channel_id): Path<ChannelId>,
    Extension(caller): Extension<AccountId>,
) -> Result<impl IntoResponse, ApiError> {
    state.services.unlink(&channel_id, &caller).await?;
    Ok(StatusCode::NO_CONTENT)
}
