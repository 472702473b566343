//! API v1 routes.

mod proxies;

use axum::Router;

use crate::state::AppState;

/// Create API v1 routes.
pub fn routes() -> Router<AppState> {
    proxies::routes()
}
