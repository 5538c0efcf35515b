//! Inbound provider completion callbacks.
//!
//! Signature/origin validation happens at the gateway in front of this
//! service; by the time a callback lands here it is trusted. The handler is
//! a thin shim over the pipeline's own callback path, which shares its
//! finalize logic with the worker poll loop.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};

use atelier_worker::callback::{handle_provider_callback, CallbackDisposition, ProviderCallback};

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

/// Routes mounted at the API root (`/callbacks/...`).
pub fn router() -> Router<AppState> {
    Router::new().route("/callbacks/provider", post(provider_callback))
}

/// POST /api/v1/callbacks/provider
///
/// Apply a completion callback. A duplicate delivery for an already
/// finalized job is a 200 no-op, not an error; an unknown reference is 400
/// (the provider sent a reference we never issued).
async fn provider_callback(
    State(state): State<AppState>,
    Json(callback): Json<ProviderCallback>,
) -> AppResult<impl IntoResponse> {
    let disposition = handle_provider_callback(&state.deps, &state.pipeline, &callback)
        .await
        .map_err(AppError::Store)?;

    match disposition {
        CallbackDisposition::UnknownRef => Err(AppError::BadRequest(format!(
            "unknown provider reference: {}",
            callback.provider_ref
        ))),
        CallbackDisposition::Applied => Ok(Json(DataResponse {
            data: serde_json::json!({ "applied": true }),
        })),
        CallbackDisposition::Ignored => Ok(Json(DataResponse {
            data: serde_json::json!({ "applied": false }),
        })),
    }
}
