//! Stale-job reaper scenarios.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use renderflow_core::kernel::jobs::{
    JobStatus, JobStore, QueueTier, ReaperConfig, RenderErrorKind, StaleJobReaper,
};
use renderflow_core::kernel::stream_hub::job_topic;
use renderflow_core::kernel::{CreditLedger, PlanTier};

#[tokio::test]
async fn reaper_times_out_stuck_processing_jobs() {
    let harness = TestHarness::new().await;
    let owner = harness.seed_account(PlanTier::Pro, 100).await;
    let base_url = serve_code_bundles().await;

    // Renderer that never finishes.
    let renderer = Arc::new(BlockingRenderer::new());
    let started = renderer.started.clone();

    let job = harness
        .broker
        .submit(owner, submit_request(&format!("{base_url}/bundle.tsx"), 1080))
        .await
        .unwrap();
    let mut rx = harness.deps.hub.subscribe(&job_topic(job.id)).await;
    harness.spawn_worker(harness.pipeline(renderer.clone()));
    started.notified().await;

    let reaper = StaleJobReaper::with_config(
        harness.broker.clone(),
        ReaperConfig {
            sweep_interval: Duration::from_millis(50),
            max_job_age: Duration::from_millis(100),
        },
    );
    tokio::spawn(reaper.run(harness.shutdown.clone()));

    let job = harness
        .wait_for_status(job.id, JobStatus::Failed, Duration::from_secs(5))
        .await;
    assert_eq!(job.error_kind, Some(RenderErrorKind::TimeoutError));

    // Timed-out jobs refund and publish their failure.
    assert_eq!(harness.ledger.balance(owner).await.unwrap(), 100);
    let events = drain_events(&mut rx);
    let failed = events_of_type(&events, "failed");
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0]["error_kind"], "TIMEOUT_ERROR");
}

#[tokio::test]
async fn reaper_reenqueues_orphaned_queued_jobs() {
    let harness = TestHarness::new().await;
    let owner = harness.seed_account(PlanTier::Pro, 100).await;

    let job = harness
        .broker
        .submit(owner, submit_request("https://code.example.com/b.tsx", 1080))
        .await
        .unwrap();

    // Simulate a crash between the row insert and the enqueue.
    assert!(harness.deps.queues.remove(job.id).await);
    assert!(!harness.deps.queues.contains(job.id).await);

    let reaper = StaleJobReaper::with_config(
        harness.broker.clone(),
        ReaperConfig {
            sweep_interval: Duration::from_millis(50),
            max_job_age: Duration::from_secs(3600),
        },
    );
    reaper.sweep().await;

    assert!(harness.deps.queues.contains(job.id).await);
    assert_eq!(harness.deps.queues.counts(QueueTier::Pro).await.waiting, 1);
    let job = harness.deps.store.get(job.id).await.unwrap();
    assert_eq!(job.status, JobStatus::Queued);
}

#[tokio::test]
async fn reaper_leaves_fresh_jobs_alone() {
    let harness = TestHarness::new().await;
    let owner = harness.seed_account(PlanTier::Pro, 100).await;
    let base_url = serve_code_bundles().await;

    let renderer = Arc::new(BlockingRenderer::new());
    let started = renderer.started.clone();
    let release = renderer.release.clone();

    let job = harness
        .broker
        .submit(owner, submit_request(&format!("{base_url}/bundle.tsx"), 1080))
        .await
        .unwrap();
    harness.spawn_worker(harness.pipeline(renderer.clone()));
    started.notified().await;

    // Generous deadline: the sweep must not touch a live render.
    let reaper = StaleJobReaper::with_config(
        harness.broker.clone(),
        ReaperConfig {
            sweep_interval: Duration::from_millis(50),
            max_job_age: Duration::from_secs(3600),
        },
    );
    reaper.sweep().await;
    assert_eq!(
        harness.deps.store.get(job.id).await.unwrap().status,
        JobStatus::Processing
    );

    release.notify_one();
    harness
        .wait_for_status(job.id, JobStatus::Completed, Duration::from_secs(5))
        .await;
}
