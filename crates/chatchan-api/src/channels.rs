use axum::{
    Extension, Json,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
};

use chatchan_types::AccountId;
use chatchan_types::api::{AccountResponse, ChannelResponse, CreateDirectChannelRequest};

use crate::error::ApiError;
use crate::state::AppState;

/// Place the caller on a partition. Repeating it returns the same placement.
pub async fn register_account(
    State(state): State<AppState>,
    Extension(caller): Extension<AccountId>,
) -> Result<impl IntoResponse, ApiError> {
    let partition = state.services.register_account(&caller).await?;
    Ok(Json(AccountResponse {
        account_id: caller,
        partition,
    }))
}

pub async fn create_direct_channel(
    State(state): State<AppState>,
    Extension(caller): Extension<AccountId>,
    Json(req): Json<CreateDirectChannelRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let channel_id = state
        .services
        .create_direct_channel(&caller, &req.peer)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(ChannelResponse {
            channel_id,
            members: vec![caller, req.peer],
        }),
    ))
}
