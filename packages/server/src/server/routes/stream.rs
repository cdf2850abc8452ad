//! SSE endpoints streaming job and credit events to clients.
//!
//! Each connection subscribes to a stream hub room and forwards events as
//! SSE. Reconnecting clients simply hit the endpoint again; subscription is
//! idempotent and rooms are rebuilt on demand. Delivery is best-effort; a
//! receiver that falls behind gets a `lagged` event and should refresh from
//! the job snapshot endpoint.

use std::convert::Infallible;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use uuid::Uuid;

use crate::common::{DomainError, DomainResult};
use crate::kernel::jobs::store::JobStore;
use crate::kernel::stream_hub::{credits_topic, job_topic};
use crate::server::app::AppState;

use super::OwnerId;

/// `GET /api/jobs/{id}/stream`: subscribe to one job's event room.
pub async fn job_stream(
    State(state): State<AppState>,
    OwnerId(owner_id): OwnerId,
    Path(job_id): Path<Uuid>,
) -> DomainResult<impl IntoResponse> {
    let job = state.deps.store.get(job_id).await?;
    if job.owner_id != owner_id {
        return Err(DomainError::Forbidden("job belongs to another account".into()));
    }

    let rx = state.deps.hub.subscribe(&job_topic(job_id)).await;
    Ok(sse_from_room(rx))
}

/// `GET /api/credits/stream`: balance updates for the caller.
pub async fn credits_stream(
    State(state): State<AppState>,
    OwnerId(owner_id): OwnerId,
) -> impl IntoResponse {
    let rx = state.deps.hub.subscribe(&credits_topic(owner_id)).await;
    sse_from_room(rx)
}

fn sse_from_room(
    rx: tokio::sync::broadcast::Receiver<serde_json::Value>,
) -> Sse<impl futures::Stream<Item = Result<Event, Infallible>>> {
    let stream = BroadcastStream::new(rx).filter_map(|result| match result {
        Ok(value) => {
            let event_type = value
                .get("type")
                .and_then(|t| t.as_str())
                .unwrap_or("message");

            Some(Ok::<_, Infallible>(
                Event::default().event(event_type).data(value.to_string()),
            ))
        }
        Err(BroadcastStreamRecvError::Lagged(_)) => {
            Some(Ok(Event::default().event("lagged").data("{}")))
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}
