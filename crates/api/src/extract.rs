//! Caller identity extractor.
//!
//! Authentication itself happens upstream (gateway or sidecar); this service
//! trusts the `X-Caller-Id` header it forwards. The extractor only enforces
//! that the header is present so every handler has an owner to scope by.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use atelier_core::types::OwnerId;

use crate::error::AppError;
use crate::state::AppState;

/// Identity of the calling user, taken from the `X-Caller-Id` header.
///
/// Use as an extractor parameter in any handler that requires a caller:
///
/// ```ignore
/// async fn my_handler(caller: Caller) -> AppResult<Json<()>> {
///     tracing::info!(owner_id = %caller.owner_id, "handling request");
///     Ok(Json(()))
/// }
/// ```
#[derive(Debug, Clone)]
pub struct Caller {
    pub owner_id: OwnerId,
}

impl FromRequestParts<AppState> for Caller {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let owner_id = parts
            .headers
            .get("x-caller-id")
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| AppError::Unauthorized("Missing X-Caller-Id header".into()))?;

        Ok(Caller {
            owner_id: owner_id.to_string(),
        })
    }
}
