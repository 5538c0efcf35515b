use axum::extract::State;
use axum::{routing::get, Json, Router};
use serde::Serialize;

use crate::state::AppState;

/// Health check response payload.
#[derive(Serialize)]
pub struct HealthResponse {
    /// Overall service status.
    pub status: &'static str,
    /// Crate version from Cargo.toml.
    pub version: &'static str,
    /// Whether the job store is reachable.
    pub store_healthy: bool,
}

/// GET /health -- returns service and job store health.
///
/// The store probe is a lookup of a nil id: any backend answers it with a
/// plain "not found" when healthy.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let store_healthy = state.store.get(uuid::Uuid::nil()).await.is_ok();

    let status = if store_healthy { "ok" } else { "degraded" };

    Json(HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        store_healthy,
    })
}

/// Mount health check routes (intended for root-level, NOT under `/api/v1`).
pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
