//! Axum application state and router assembly.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Instant;

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::kernel::deps::BrokerDeps;
use crate::kernel::jobs::broker::SharedBroker;

use super::routes::{health, jobs, stream};

#[derive(Clone)]
pub struct AppState {
    pub deps: BrokerDeps,
    pub broker: SharedBroker,
    /// Flipped once the worker loops are running; gates `/health`.
    pub ready: Arc<AtomicBool>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(deps: BrokerDeps, broker: SharedBroker) -> Self {
        Self {
            deps,
            broker,
            ready: Arc::new(AtomicBool::new(false)),
            started_at: Instant::now(),
        }
    }
}

pub fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        .route("/ready", get(health::ready_handler))
        .route("/api/jobs", post(jobs::submit_job))
        .route("/api/jobs/:job_id", get(jobs::get_job))
        .route("/api/jobs/:job_id/cancel", post(jobs::cancel_job))
        .route("/api/jobs/:job_id/stream", get(stream::job_stream))
        .route("/api/credits/stream", get(stream::credits_stream))
        .route("/api/queues", get(jobs::queue_counts))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
