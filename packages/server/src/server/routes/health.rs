use std::sync::atomic::Ordering;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::kernel::jobs::store::JobStore;
use crate::kernel::storage::ObjectStorage;
use crate::server::app::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    status: String,
    uptime: u64,
    active_jobs: usize,
    memory_bytes: u64,
    timestamp: DateTime<Utc>,
}

#[derive(Serialize)]
pub struct ReadyResponse {
    status: String,
    checks: ReadyChecks,
}

#[derive(Serialize)]
pub struct ReadyChecks {
    state_store: DependencyHealth,
    tier_queues: DependencyHealth,
    object_store: DependencyHealth,
}

#[derive(Serialize)]
pub struct DependencyHealth {
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl DependencyHealth {
    fn ok() -> Self {
        Self {
            status: "ok".to_string(),
            error: None,
        }
    }

    fn error(error: impl ToString) -> Self {
        Self {
            status: "error".to_string(),
            error: Some(error.to_string()),
        }
    }

    fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

/// Liveness: 200 once the worker loops are running, 503 while starting.
pub async fn health_handler(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let ready = state.ready.load(Ordering::SeqCst);
    let active_jobs = state.deps.store.active_count().await.unwrap_or(0);

    let status_code = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status_code,
        Json(HealthResponse {
            status: if ready { "ok" } else { "starting" }.to_string(),
            uptime: state.started_at.elapsed().as_secs(),
            active_jobs,
            memory_bytes: resident_memory_bytes(),
            timestamp: Utc::now(),
        }),
    )
}

/// Readiness: 200 iff every dependency answers, else 503 with a
/// per-dependency breakdown.
pub async fn ready_handler(State(state): State<AppState>) -> (StatusCode, Json<ReadyResponse>) {
    let state_store = match state.deps.store.active_count().await {
        Ok(_) => DependencyHealth::ok(),
        Err(e) => DependencyHealth::error(e),
    };

    // Counting a queue exercises its lock without mutating anything.
    state
        .deps
        .queues
        .counts(crate::kernel::jobs::job::QueueTier::Free)
        .await;
    let tier_queues = DependencyHealth::ok();

    let object_store = match state.deps.storage.ping().await {
        Ok(()) => DependencyHealth::ok(),
        Err(e) => DependencyHealth::error(format!("{e:#}")),
    };

    let healthy = state_store.is_ok() && tier_queues.is_ok() && object_store.is_ok();
    let status_code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status_code,
        Json(ReadyResponse {
            status: if healthy { "ready" } else { "degraded" }.to_string(),
            checks: ReadyChecks {
                state_store,
                tier_queues,
                object_store,
            },
        }),
    )
}

/// Resident set size from procfs; 0 where unavailable.
fn resident_memory_bytes() -> u64 {
    std::fs::read_to_string("/proc/self/statm")
        .ok()
        .and_then(|statm| {
            statm
                .split_whitespace()
                .nth(1)
                .and_then(|pages| pages.parse::<u64>().ok())
        })
        .map(|pages| pages * 4096)
        .unwrap_or(0)
}
