pub mod callbacks;
pub mod health;
pub mod jobs;
pub mod ws;

use axum::routing::get;
use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// ```text
/// /jobs                    job submission, status, cancellation
/// /callbacks/provider      inbound provider completion callbacks
/// /ws                      WebSocket event subscriptions
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/jobs", jobs::router())
        .merge(callbacks::router())
        .route("/ws", get(ws::ws_handler))
}
