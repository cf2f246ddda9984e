pub mod channels;
pub mod error;
pub mod internal;
pub mod messages;
pub mod middleware;
pub mod participants;
pub mod state;

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};

use crate::middleware::{require_auth, require_internal};
use crate::state::AppState;

/// All routes. `/health` is open, `/internal` needs the shared internal token
/// and everything else a bearer token.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/health", get(internal::health))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route(
            "/channels/{channel_id}/messages",
            get(messages::list_messages).post(messages::post_message),
        )
        .route("/channels/{channel_id}/read", post(participants::mark_read))
        .route(
            "/channels/{channel_id}/participants",
            post(participants::link).delete(participants::unlink),
        )
        .route("/participants", get(participants::list_participants))
        .route("/accounts/me", post(channels::register_account))
        .route("/channels/dms", post(channels::create_direct_channel))
        .layer(axum_middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state.clone());

    let internal_routes = Router::new()
        .route(
            "/internal/events/send-message",
            post(internal::enqueue_send_message),
        )
        .layer(axum_middleware::from_fn_with_state(state.clone(), require_internal))
        .with_state(state);

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(internal_routes)
}
