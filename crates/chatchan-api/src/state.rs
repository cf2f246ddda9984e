use std::sync::Arc;

use chatchan_core::ChatServices;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub services: ChatServices,
    pub jwt_secret: String,
    /// Shared secret for the `/internal` routes, sent as `x-internal-token`.
    pub internal_secret: String,
}
