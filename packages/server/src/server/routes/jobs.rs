//! Thin ingress over the broker contract. Request framing and deep
//! validation live in the upstream API gateway; this surface exists so the
//! broker can be driven end-to-end and exposes the observability counts.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde_json::json;
use uuid::Uuid;

use crate::common::{DomainError, DomainResult};
use crate::kernel::jobs::broker::SubmitRequest;
use crate::kernel::jobs::job::{QueueTier, RenderJob};
use crate::kernel::jobs::store::JobStore;
use crate::server::app::AppState;

use super::OwnerId;

/// `POST /api/jobs`: admit a render job.
pub async fn submit_job(
    State(state): State<AppState>,
    OwnerId(owner_id): OwnerId,
    Json(request): Json<SubmitRequest>,
) -> DomainResult<(StatusCode, Json<RenderJob>)> {
    let job = state.broker.submit(owner_id, request).await?;
    Ok((StatusCode::CREATED, Json(job)))
}

/// `GET /api/jobs/{id}`: owner-scoped job snapshot; the authoritative
/// status read clients fall back to when the stream lags.
pub async fn get_job(
    State(state): State<AppState>,
    OwnerId(owner_id): OwnerId,
    Path(job_id): Path<Uuid>,
) -> DomainResult<Json<RenderJob>> {
    let job = state.deps.store.get(job_id).await?;
    if job.owner_id != owner_id {
        return Err(DomainError::Forbidden("job belongs to another account".into()));
    }
    Ok(Json(job))
}

/// `POST /api/jobs/{id}/cancel`
pub async fn cancel_job(
    State(state): State<AppState>,
    OwnerId(owner_id): OwnerId,
    Path(job_id): Path<Uuid>,
) -> DomainResult<Json<RenderJob>> {
    let job = state.broker.cancel(owner_id, job_id).await?;
    Ok(Json(job))
}

/// `GET /api/queues`: per-tier queue counts.
pub async fn queue_counts(State(state): State<AppState>) -> Json<serde_json::Value> {
    let mut counts = serde_json::Map::new();
    for tier in QueueTier::ALL {
        counts.insert(
            tier.queue_name().to_string(),
            json!(state.deps.queues.counts(tier).await),
        );
    }
    Json(serde_json::Value::Object(counts))
}
