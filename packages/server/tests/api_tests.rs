//! HTTP surface tests: health/readiness, the ingress contract, and error
//! status mapping.

mod common;

use std::sync::atomic::Ordering;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use common::*;
use renderflow_core::kernel::PlanTier;
use renderflow_core::server::{build_app, AppState};
use tower::util::ServiceExt;
use uuid::Uuid;

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn app_state(harness: &TestHarness) -> AppState {
    AppState::new(harness.deps.clone(), harness.broker.clone())
}

#[tokio::test]
async fn health_reports_starting_until_ready() {
    let harness = TestHarness::new().await;
    let state = app_state(&harness);
    let app = build_app(state.clone());

    let response = app
        .clone()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    state.ready.store(true, Ordering::SeqCst);
    let response = app
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["active_jobs"], 0);
    assert!(body["timestamp"].is_string());
}

#[tokio::test]
async fn ready_reports_per_dependency_breakdown() {
    let harness = TestHarness::new().await;
    let app = build_app(app_state(&harness));

    let response = app
        .oneshot(Request::get("/ready").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ready");
    assert_eq!(body["checks"]["state_store"]["status"], "ok");
    assert_eq!(body["checks"]["tier_queues"]["status"], "ok");
    assert_eq!(body["checks"]["object_store"]["status"], "ok");
}

#[tokio::test]
async fn submit_creates_job_with_snapshot() {
    let harness = TestHarness::new().await;
    let owner = harness.seed_account(PlanTier::Pro, 100).await;
    let app = build_app(app_state(&harness));

    let request = submit_request("https://code.example.com/b.tsx", 1080);
    let response = app
        .oneshot(
            Request::post("/api/jobs")
                .header("x-owner-id", owner.to_string())
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(serde_json::to_vec(&serde_json::json!({
                    "project_id": request.project_id,
                    "code_url": request.code_url,
                    "settings": request.settings,
                })).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await;
    assert_eq!(body["status"], "queued");
    assert_eq!(body["tier"], "pro");
    assert_eq!(body["credits_charged"], 1);
}

#[tokio::test]
async fn submit_without_principal_is_unauthorized() {
    let harness = TestHarness::new().await;
    let app = build_app(app_state(&harness));

    let response = app
        .oneshot(
            Request::post("/api/jobs")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn resolution_gate_maps_to_forbidden() {
    let harness = TestHarness::new().await;
    let owner = harness.seed_account(PlanTier::Free, 10).await;
    let app = build_app(app_state(&harness));

    let request = submit_request("https://code.example.com/b.tsx", 1080);
    let response = app
        .oneshot(
            Request::post("/api/jobs")
                .header("x-owner-id", owner.to_string())
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(serde_json::to_vec(&serde_json::json!({
                    "project_id": request.project_id,
                    "code_url": request.code_url,
                    "settings": request.settings,
                })).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "QUOTA_RESOLUTION");
}

#[tokio::test]
async fn job_snapshot_is_owner_scoped() {
    let harness = TestHarness::new().await;
    let owner = harness.seed_account(PlanTier::Pro, 100).await;
    let other = harness.seed_account(PlanTier::Pro, 100).await;
    let job = harness
        .broker
        .submit(owner, submit_request("https://code.example.com/b.tsx", 1080))
        .await
        .unwrap();
    let app = build_app(app_state(&harness));

    let response = app
        .clone()
        .oneshot(
            Request::get(format!("/api/jobs/{}", job.id))
                .header("x-owner-id", owner.to_string())
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(
            Request::get(format!("/api/jobs/{}", job.id))
                .header("x-owner-id", other.to_string())
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn unknown_job_is_not_found() {
    let harness = TestHarness::new().await;
    let owner = harness.seed_account(PlanTier::Pro, 100).await;
    let app = build_app(app_state(&harness));

    let response = app
        .oneshot(
            Request::get(format!("/api/jobs/{}", Uuid::new_v4()))
                .header("x-owner-id", owner.to_string())
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn queue_counts_expose_all_tiers() {
    let harness = TestHarness::new().await;
    let owner = harness.seed_account(PlanTier::Pro, 100).await;
    harness
        .broker
        .submit(owner, submit_request("https://code.example.com/b.tsx", 1080))
        .await
        .unwrap();
    let app = build_app(app_state(&harness));

    let response = app
        .oneshot(Request::get("/api/queues").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["render:pro"]["waiting"], 1);
    assert_eq!(body["render:free"]["waiting"], 0);
    assert_eq!(body["render:enterprise"]["waiting"], 0);
}

#[tokio::test]
async fn cancel_of_terminal_job_is_a_conflict() {
    let harness = TestHarness::new().await;
    let owner = harness.seed_account(PlanTier::Pro, 100).await;
    let job = harness
        .broker
        .submit(owner, submit_request("https://code.example.com/b.tsx", 1080))
        .await
        .unwrap();
    harness.broker.cancel(owner, job.id).await.unwrap();
    let app = build_app(app_state(&harness));

    let response = app
        .oneshot(
            Request::post(format!("/api/jobs/{}/cancel", job.id))
                .header("x-owner-id", owner.to_string())
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "CONFLICT");
}
