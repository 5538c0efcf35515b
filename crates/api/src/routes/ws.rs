//! WebSocket subscriptions to job lifecycle events.
//!
//! A connection subscribes to exactly one Notifier channel: a single job
//! (`?job_id=...`, ownership-checked) or all of the caller's jobs
//! (`?owner=me`). Events are pushed as JSON. Disconnecting is the only
//! unsubscribe and has no side effects; the Notifier is best-effort, so a
//! client that missed events re-reads the job instead.

use axum::extract::ws::{Message, Utf8Bytes, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::broadcast;

use atelier_core::channels::{job_channel, owner_channel};
use atelier_core::error::CoreError;
use atelier_core::types::JobId;
use atelier_events::JobEvent;

use crate::error::{AppError, AppResult};
use crate::extract::Caller;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub job_id: Option<JobId>,
    pub owner: Option<String>,
}

/// GET /api/v1/ws?job_id=... | ?owner=me
///
/// Upgrade to a WebSocket and stream events for the requested channel.
/// Channel selection and the ownership check happen before the upgrade so
/// a rejected request gets a proper HTTP error instead of a dropped socket.
pub async fn ws_handler(
    caller: Caller,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> AppResult<impl IntoResponse> {
    let channel = match (query.job_id, query.owner.as_deref()) {
        (Some(job_id), None) => {
            let job = state
                .store
                .get(job_id)
                .await?
                .ok_or(AppError::Core(CoreError::NotFound {
                    entity: "Job",
                    id: job_id,
                }))?;
            if job.owner_id != caller.owner_id {
                return Err(AppError::Core(CoreError::Forbidden(
                    "Cannot subscribe to another caller's job".into(),
                )));
            }
            job_channel(job_id)
        }
        (None, Some("me")) => owner_channel(&caller.owner_id),
        _ => {
            return Err(AppError::BadRequest(
                "Provide exactly one of job_id=<uuid> or owner=me".into(),
            ));
        }
    };

    let rx = state.notifier.subscribe(&channel).await;
    tracing::info!(channel = %channel, owner_id = %caller.owner_id, "WebSocket subscription");

    Ok(ws.on_upgrade(move |socket| forward_events(socket, channel, rx)))
}

/// Pump events from the broadcast channel to the socket until either side
/// closes.
async fn forward_events(
    socket: WebSocket,
    channel: String,
    mut rx: broadcast::Receiver<JobEvent>,
) {
    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            event = rx.recv() => {
                match event {
                    Ok(event) => {
                        let Ok(payload) = serde_json::to_string(&event) else {
                            continue;
                        };
                        if sink.send(Message::Text(Utf8Bytes::from(payload))).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        // The client fell behind; it can recover missed
                        // state by re-reading the job.
                        tracing::debug!(channel = %channel, skipped, "WebSocket subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            inbound = stream.next() => {
                match inbound {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!(channel = %channel, error = %e, "WebSocket receive error");
                        break;
                    }
                }
            }
        }
    }

    tracing::info!(channel = %channel, "WebSocket disconnected");
}
