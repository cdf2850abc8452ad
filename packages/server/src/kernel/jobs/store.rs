//! Authoritative job state store.
//!
//! Every status change flows through this trait so the lifecycle rules hold
//! no matter who is writing: `lease` is the only path from `queued` to
//! `processing`, terminal states are frozen, and transitions out of them
//! surface as `Conflict`. Writes to a single job are totally ordered; the
//! `epoch` field is bumped on every write so readers can tell snapshots
//! apart.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::common::{DomainError, DomainResult};

use super::job::{JobStatus, RenderErrorKind, RenderJob};

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn insert(&self, job: RenderJob) -> DomainResult<RenderJob>;

    async fn get(&self, job_id: Uuid) -> DomainResult<RenderJob>;

    /// Attach the broker-local queue handle after enqueueing.
    async fn set_queue_ref(&self, job_id: Uuid, queue_ref: &str) -> DomainResult<()>;

    /// `queued → processing`; records `started_at`. Only the lease path may
    /// call this.
    async fn mark_processing(&self, job_id: Uuid) -> DomainResult<RenderJob>;

    /// `processing → encoding`, after the render phase and before upload.
    async fn mark_encoding(&self, job_id: Uuid) -> DomainResult<RenderJob>;

    async fn mark_completed(
        &self,
        job_id: Uuid,
        output_url: &str,
        output_size_bytes: u64,
    ) -> DomainResult<RenderJob>;

    /// Terminal failure; stamps the error kind, its retry policy, and the
    /// sanitized detail.
    async fn mark_failed(
        &self,
        job_id: Uuid,
        kind: RenderErrorKind,
        detail: &str,
    ) -> DomainResult<RenderJob>;

    async fn mark_cancelled(&self, job_id: Uuid) -> DomainResult<RenderJob>;

    /// `processing|encoding → queued` for a retry; resets progress for the
    /// fresh attempt.
    async fn requeue(&self, job_id: Uuid) -> DomainResult<RenderJob>;

    /// Flag cooperative cancellation; the worker observes it at the next
    /// stage boundary.
    async fn request_cancel(&self, job_id: Uuid) -> DomainResult<RenderJob>;

    async fn cancel_requested(&self, job_id: Uuid) -> DomainResult<bool>;

    /// Monotonic progress write; stale frames are ignored.
    async fn update_progress(&self, job_id: Uuid, frame: u32, total: u32) -> DomainResult<()>;

    async fn increment_retry(&self, job_id: Uuid) -> DomainResult<u32>;

    /// Jobs still in `processing`/`encoding` that started before `cutoff`.
    async fn stalled_since(&self, cutoff: DateTime<Utc>) -> DomainResult<Vec<RenderJob>>;

    async fn queued_jobs(&self) -> DomainResult<Vec<RenderJob>>;

    /// Jobs currently in `processing` or `encoding`.
    async fn active_count(&self) -> DomainResult<usize>;
}

/// In-memory store. One lock over the map gives per-job write ordering for
/// free; a persistent adapter would use a row lock or compare-and-set on
/// `epoch` instead.
#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: Mutex<HashMap<Uuid, RenderJob>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn transition(job: &mut RenderJob, next: JobStatus) -> DomainResult<()> {
        if !job.status.can_transition_to(next) {
            return Err(DomainError::Conflict(format!(
                "job {} cannot move from {:?} to {next:?}",
                job.id, job.status
            )));
        }
        job.status = next;
        job.epoch += 1;
        Ok(())
    }

    async fn with_job<T>(
        &self,
        job_id: Uuid,
        f: impl FnOnce(&mut RenderJob) -> DomainResult<T>,
    ) -> DomainResult<T> {
        let mut jobs = self.jobs.lock().await;
        let job = jobs
            .get_mut(&job_id)
            .ok_or(DomainError::NotFound("job"))?;
        f(job)
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn insert(&self, job: RenderJob) -> DomainResult<RenderJob> {
        let mut jobs = self.jobs.lock().await;
        if jobs.contains_key(&job.id) {
            return Err(DomainError::Conflict(format!("job {} already exists", job.id)));
        }
        jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn get(&self, job_id: Uuid) -> DomainResult<RenderJob> {
        let jobs = self.jobs.lock().await;
        jobs.get(&job_id)
            .cloned()
            .ok_or(DomainError::NotFound("job"))
    }

    async fn set_queue_ref(&self, job_id: Uuid, queue_ref: &str) -> DomainResult<()> {
        self.with_job(job_id, |job| {
            job.queue_ref = Some(queue_ref.to_string());
            job.epoch += 1;
            Ok(())
        })
        .await
    }

    async fn mark_processing(&self, job_id: Uuid) -> DomainResult<RenderJob> {
        self.with_job(job_id, |job| {
            Self::transition(job, JobStatus::Processing)?;
            job.started_at = Some(Utc::now());
            Ok(job.clone())
        })
        .await
    }

    async fn mark_encoding(&self, job_id: Uuid) -> DomainResult<RenderJob> {
        self.with_job(job_id, |job| {
            Self::transition(job, JobStatus::Encoding)?;
            Ok(job.clone())
        })
        .await
    }

    async fn mark_completed(
        &self,
        job_id: Uuid,
        output_url: &str,
        output_size_bytes: u64,
    ) -> DomainResult<RenderJob> {
        self.with_job(job_id, |job| {
            Self::transition(job, JobStatus::Completed)?;
            job.output_url = Some(output_url.to_string());
            job.output_size_bytes = Some(output_size_bytes);
            job.completed_at = Some(Utc::now());
            job.progress = 100;
            Ok(job.clone())
        })
        .await
    }

    async fn mark_failed(
        &self,
        job_id: Uuid,
        kind: RenderErrorKind,
        detail: &str,
    ) -> DomainResult<RenderJob> {
        self.with_job(job_id, |job| {
            Self::transition(job, JobStatus::Failed)?;
            job.error_kind = Some(kind);
            job.error_detail = Some(detail.to_string());
            job.max_retries = kind.max_retries();
            job.completed_at = Some(Utc::now());
            Ok(job.clone())
        })
        .await
    }

    async fn mark_cancelled(&self, job_id: Uuid) -> DomainResult<RenderJob> {
        self.with_job(job_id, |job| {
            Self::transition(job, JobStatus::Cancelled)?;
            job.completed_at = Some(Utc::now());
            Ok(job.clone())
        })
        .await
    }

    async fn requeue(&self, job_id: Uuid) -> DomainResult<RenderJob> {
        self.with_job(job_id, |job| {
            Self::transition(job, JobStatus::Queued)?;
            job.started_at = None;
            job.queue_ref = None;
            job.progress = 0;
            job.current_frame = 0;
            Ok(job.clone())
        })
        .await
    }

    async fn request_cancel(&self, job_id: Uuid) -> DomainResult<RenderJob> {
        self.with_job(job_id, |job| {
            if job.is_terminal() {
                return Err(DomainError::Conflict(format!(
                    "job {} already finished",
                    job.id
                )));
            }
            if job.cancel_requested_at.is_none() {
                job.cancel_requested_at = Some(Utc::now());
                job.epoch += 1;
            }
            Ok(job.clone())
        })
        .await
    }

    async fn cancel_requested(&self, job_id: Uuid) -> DomainResult<bool> {
        let jobs = self.jobs.lock().await;
        let job = jobs.get(&job_id).ok_or(DomainError::NotFound("job"))?;
        Ok(job.cancel_requested_at.is_some())
    }

    async fn update_progress(&self, job_id: Uuid, frame: u32, total: u32) -> DomainResult<()> {
        self.with_job(job_id, |job| {
            if job.is_terminal() {
                return Err(DomainError::Conflict(format!(
                    "job {} already finished",
                    job.id
                )));
            }
            if frame <= job.current_frame && job.current_frame != 0 {
                return Ok(());
            }
            job.total_frames = total.max(job.total_frames);
            job.current_frame = if job.total_frames > 0 {
                frame.min(job.total_frames)
            } else {
                frame
            };
            let pct = if total == 0 {
                0
            } else {
                ((frame as u64 * 100) / total as u64).min(100) as u8
            };
            job.progress = job.progress.max(pct);
            job.epoch += 1;
            Ok(())
        })
        .await
    }

    async fn increment_retry(&self, job_id: Uuid) -> DomainResult<u32> {
        self.with_job(job_id, |job| {
            job.retry_count += 1;
            job.epoch += 1;
            Ok(job.retry_count)
        })
        .await
    }

    async fn stalled_since(&self, cutoff: DateTime<Utc>) -> DomainResult<Vec<RenderJob>> {
        let jobs = self.jobs.lock().await;
        Ok(jobs
            .values()
            .filter(|job| {
                matches!(job.status, JobStatus::Processing | JobStatus::Encoding)
                    && job.started_at.is_some_and(|started| started < cutoff)
            })
            .cloned()
            .collect())
    }

    async fn queued_jobs(&self) -> DomainResult<Vec<RenderJob>> {
        let jobs = self.jobs.lock().await;
        Ok(jobs
            .values()
            .filter(|job| job.status == JobStatus::Queued)
            .cloned()
            .collect())
    }

    async fn active_count(&self) -> DomainResult<usize> {
        let jobs = self.jobs.lock().await;
        Ok(jobs
            .values()
            .filter(|job| matches!(job.status, JobStatus::Processing | JobStatus::Encoding))
            .count())
    }
}
