//! Integration tests for the jobs and callbacks endpoints.

mod common;

use axum::http::StatusCode;

use atelier_core::outcome::{FailureKind, JobOutcome};
use atelier_db::models::job::CreateJob;
use atelier_db::store::JobStore;

use common::{body_json, build_test_app, expect_json, get, get_as, post_json};

fn submit_body() -> serde_json::Value {
    serde_json::json!({ "request": { "prompt": "a lighthouse at dusk" } })
}

// ---------------------------------------------------------------------------
// Health and middleware
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_check_returns_ok_with_json() {
    let t = build_test_app();
    let response = get(t.app, "/health").await;

    let json = expect_json(response, StatusCode::OK).await;
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
    assert_eq!(json["store_healthy"], true);
}

#[tokio::test]
async fn response_contains_x_request_id_header() {
    let t = build_test_app();
    let response = get(t.app, "/health").await;

    assert_eq!(response.status(), StatusCode::OK);
    let request_id = response.headers().get("x-request-id");
    assert!(request_id.is_some());
    assert_eq!(request_id.unwrap().to_str().unwrap().len(), 36);
}

#[tokio::test]
async fn unknown_route_returns_404() {
    let t = build_test_app();
    let response = get(t.app, "/this-route-does-not-exist").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// ---------------------------------------------------------------------------
// Submission
// ---------------------------------------------------------------------------

#[tokio::test]
async fn submit_requires_caller_identity() {
    let t = build_test_app();
    let response = post_json(t.app, "/api/v1/jobs", None, submit_body()).await;

    let json = expect_json(response, StatusCode::UNAUTHORIZED).await;
    assert_eq!(json["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn submit_creates_a_pending_job_and_enqueues_it() {
    let t = build_test_app();
    let mut events = t
        .notifier
        .subscribe(&atelier_core::channels::owner_channel("u1"))
        .await;

    let response = post_json(t.app, "/api/v1/jobs", Some("u1"), submit_body()).await;

    let json = expect_json(response, StatusCode::CREATED).await;
    assert_eq!(json["data"]["status"], "pending");
    assert_eq!(json["data"]["attempts"], 0);
    let id: uuid::Uuid = json["data"]["id"].as_str().unwrap().parse().unwrap();

    let stored = t.store.get(id).await.unwrap().unwrap();
    assert_eq!(stored.owner_id, "u1");
    assert_eq!(t.queue.len().await, 1);

    let event = events.try_recv().unwrap();
    assert_eq!(event.event_type, atelier_core::job_events::EVENT_JOB_QUEUED);
    assert_eq!(event.job_id, id);
}

#[tokio::test]
async fn submit_rejects_non_object_request() {
    let t = build_test_app();
    let response = post_json(
        t.app,
        "/api/v1/jobs",
        Some("u1"),
        serde_json::json!({ "request": "just a string" }),
    )
    .await;

    let json = expect_json(response, StatusCode::BAD_REQUEST).await;
    assert_eq!(json["code"], "BAD_REQUEST");
}

// ---------------------------------------------------------------------------
// Read
// ---------------------------------------------------------------------------

#[tokio::test]
async fn get_job_is_scoped_to_the_owner() {
    let t = build_test_app();
    let job = t
        .store
        .create(CreateJob {
            owner_id: "u1".into(),
            request: serde_json::json!({}),
        })
        .await
        .unwrap();

    let response = get_as(t.app.clone(), &format!("/api/v1/jobs/{}", job.id), "u1").await;
    let json = expect_json(response, StatusCode::OK).await;
    assert_eq!(json["data"]["status"], "pending");

    let response = get_as(t.app.clone(), &format!("/api/v1/jobs/{}", job.id), "u2").await;
    let json = expect_json(response, StatusCode::FORBIDDEN).await;
    assert_eq!(json["code"], "FORBIDDEN");

    let missing = uuid::Uuid::now_v7();
    let response = get_as(t.app, &format!("/api/v1/jobs/{missing}"), "u1").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn list_returns_only_the_callers_jobs() {
    let t = build_test_app();
    for owner in ["u1", "u1", "u2"] {
        t.store
            .create(CreateJob {
                owner_id: owner.into(),
                request: serde_json::json!({}),
            })
            .await
            .unwrap();
    }

    let response = get_as(t.app, "/api/v1/jobs", "u1").await;
    let json = expect_json(response, StatusCode::OK).await;
    assert_eq!(json["data"].as_array().unwrap().len(), 2);
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cancel_is_accepted_asynchronously() {
    let t = build_test_app();
    let job = t
        .store
        .create(CreateJob {
            owner_id: "u1".into(),
            request: serde_json::json!({}),
        })
        .await
        .unwrap();

    let response = post_json(
        t.app.clone(),
        &format!("/api/v1/jobs/{}/cancel", job.id),
        Some("u1"),
        serde_json::json!({}),
    )
    .await;
    let json = expect_json(response, StatusCode::ACCEPTED).await;
    assert_eq!(json["data"]["accepted"], true);

    // The flag is set but the status has not changed yet.
    let stored = t.store.get(job.id).await.unwrap().unwrap();
    assert!(stored.cancel_requested);
    assert_eq!(stored.status().name(), "pending");
}

#[tokio::test]
async fn cancel_of_a_finalized_job_is_not_accepted() {
    let t = build_test_app();
    let job = t
        .store
        .create(CreateJob {
            owner_id: "u1".into(),
            request: serde_json::json!({}),
        })
        .await
        .unwrap();
    t.store
        .finalize(
            job.id,
            &JobOutcome::Succeeded {
                result: "mem://done".into(),
            },
        )
        .await
        .unwrap();

    let response = post_json(
        t.app,
        &format!("/api/v1/jobs/{}/cancel", job.id),
        Some("u1"),
        serde_json::json!({}),
    )
    .await;
    let json = expect_json(response, StatusCode::ACCEPTED).await;
    assert_eq!(json["data"]["accepted"], false);
}

#[tokio::test]
async fn cancel_of_another_callers_job_is_forbidden() {
    let t = build_test_app();
    let job = t
        .store
        .create(CreateJob {
            owner_id: "u1".into(),
            request: serde_json::json!({}),
        })
        .await
        .unwrap();

    let response = post_json(
        t.app,
        &format!("/api/v1/jobs/{}/cancel", job.id),
        Some("u2"),
        serde_json::json!({}),
    )
    .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

// ---------------------------------------------------------------------------
// Provider callbacks
// ---------------------------------------------------------------------------

#[tokio::test]
async fn callback_with_unknown_reference_is_a_bad_request() {
    let t = build_test_app();
    let response = post_json(
        t.app,
        "/api/v1/callbacks/provider",
        None,
        serde_json::json!({
            "provider_ref": "no-such-ref",
            "outcome": { "status": "failed", "message": "boom" }
        }),
    )
    .await;

    let json = expect_json(response, StatusCode::BAD_REQUEST).await;
    assert_eq!(json["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn late_callback_for_a_finalized_job_is_a_200_noop() {
    let t = build_test_app();
    let job = t
        .store
        .create(CreateJob {
            owner_id: "u1".into(),
            request: serde_json::json!({}),
        })
        .await
        .unwrap();
    t.store.set_provider_ref(job.id, "req-1").await.unwrap();
    t.store
        .finalize(
            job.id,
            &JobOutcome::Failed {
                message: "rejected".into(),
                kind: FailureKind::Permanent,
            },
        )
        .await
        .unwrap();

    let response = post_json(
        t.app,
        "/api/v1/callbacks/provider",
        None,
        serde_json::json!({
            "provider_ref": "req-1",
            "outcome": { "status": "failed", "message": "rejected" }
        }),
    )
    .await;

    let json = body_json(response).await;
    assert_eq!(json["data"]["applied"], false);
}

#[tokio::test]
async fn permanent_failure_callback_finalizes_the_job() {
    let t = build_test_app();
    let job = t
        .store
        .create(CreateJob {
            owner_id: "u1".into(),
            request: serde_json::json!({}),
        })
        .await
        .unwrap();
    t.store.set_provider_ref(job.id, "req-2").await.unwrap();

    let response = post_json(
        t.app,
        "/api/v1/callbacks/provider",
        None,
        serde_json::json!({
            "provider_ref": "req-2",
            "outcome": { "status": "failed", "message": "invalid prompt" }
        }),
    )
    .await;

    let json = expect_json(response, StatusCode::OK).await;
    assert_eq!(json["data"]["applied"], true);

    let stored = t.store.get(job.id).await.unwrap().unwrap();
    assert_eq!(stored.status().name(), "failed");
    assert_eq!(stored.error.as_deref(), Some("invalid prompt"));
}
