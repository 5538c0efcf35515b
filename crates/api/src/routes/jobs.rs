//! Handlers for the `/jobs` resource.
//!
//! All endpoints require a caller identity and are scoped to the caller's
//! own jobs. Submission enqueues the job and returns immediately; progress
//! arrives over the WebSocket or by re-reading the job.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use atelier_core::error::CoreError;
use atelier_core::types::JobId;
use atelier_db::models::job::{CreateJob, Job, JobProjection};
use atelier_events::JobEvent;

use crate::error::{AppError, AppResult};
use crate::extract::Caller;
use crate::response::DataResponse;
use crate::state::AppState;

/// Routes mounted at `/jobs`.
///
/// ```text
/// GET    /                -> list_jobs
/// POST   /                -> submit_job
/// GET    /{id}            -> get_job
/// POST   /{id}/cancel     -> cancel_job
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_jobs).post(submit_job))
        .route("/{id}", get(get_job))
        .route("/{id}/cancel", post(cancel_job))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Fetch a job by id and verify the caller owns it.
///
/// Returns `NotFound` if the job does not exist, `Forbidden` if the caller
/// is not the owner. `action` is used in the error message (e.g. "view",
/// "cancel").
async fn find_and_authorize(
    state: &AppState,
    job_id: JobId,
    caller: &Caller,
    action: &str,
) -> AppResult<Job> {
    let job = state
        .store
        .get(job_id)
        .await?
        .ok_or(AppError::Core(CoreError::NotFound {
            entity: "Job",
            id: job_id,
        }))?;

    if job.owner_id != caller.owner_id {
        return Err(AppError::Core(CoreError::Forbidden(format!(
            "Cannot {action} another caller's job"
        ))));
    }

    Ok(job)
}

// ---------------------------------------------------------------------------
// Submit
// ---------------------------------------------------------------------------

/// Request body for job submission. The payload is forwarded to the
/// generation provider verbatim.
#[derive(Debug, Deserialize)]
pub struct SubmitJobBody {
    pub request: serde_json::Value,
}

/// POST /api/v1/jobs
///
/// Submit a new generation job. Returns 201 with the job projection; the
/// job starts in `pending` and is picked up by the worker pool.
async fn submit_job(
    caller: Caller,
    State(state): State<AppState>,
    Json(body): Json<SubmitJobBody>,
) -> AppResult<impl IntoResponse> {
    if !body.request.is_object() {
        return Err(AppError::BadRequest("request must be a JSON object".into()));
    }

    let job = state
        .store
        .create(CreateJob {
            owner_id: caller.owner_id.clone(),
            request: body.request,
        })
        .await?;
    state.queue.enqueue(job.id, None).await?;

    tracing::info!(job_id = %job.id, owner_id = %caller.owner_id, "Job submitted");
    state
        .notifier
        .publish_job_event(JobEvent::queued(job.id, &job.owner_id))
        .await;

    Ok((
        StatusCode::CREATED,
        Json(DataResponse {
            data: JobProjection::from(&job),
        }),
    ))
}

// ---------------------------------------------------------------------------
// List / Get
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<i64>,
}

/// GET /api/v1/jobs
///
/// List the caller's jobs, newest first.
async fn list_jobs(
    caller: Caller,
    State(state): State<AppState>,
    Query(params): Query<ListQuery>,
) -> AppResult<impl IntoResponse> {
    let limit = params
        .limit
        .unwrap_or(state.config.list_limit)
        .clamp(1, state.config.list_limit);
    let jobs = state.store.list_by_owner(&caller.owner_id, limit).await?;
    let projections: Vec<JobProjection> = jobs.iter().map(JobProjection::from).collect();
    Ok(Json(DataResponse { data: projections }))
}

/// GET /api/v1/jobs/{id}
///
/// Get a single job. Callers can only view their own jobs.
async fn get_job(
    caller: Caller,
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<impl IntoResponse> {
    let job = find_and_authorize(&state, job_id, &caller, "view").await?;
    Ok(Json(DataResponse {
        data: JobProjection::from(&job),
    }))
}

// ---------------------------------------------------------------------------
// Cancel
// ---------------------------------------------------------------------------

/// POST /api/v1/jobs/{id}/cancel
///
/// Request cancellation. Always asynchronous: this sets a flag the worker
/// observes at its next poll tick, so the response is 202 rather than 200.
/// `accepted` is `false` when the job had already reached a terminal state.
async fn cancel_job(
    caller: Caller,
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<impl IntoResponse> {
    let job = find_and_authorize(&state, job_id, &caller, "cancel").await?;
    let accepted = state.store.request_cancel(job.id).await?;

    if accepted {
        tracing::info!(job_id = %job.id, owner_id = %caller.owner_id, "Cancellation requested");
    }

    Ok((
        StatusCode::ACCEPTED,
        Json(DataResponse {
            data: serde_json::json!({ "accepted": accepted }),
        }),
    ))
}
