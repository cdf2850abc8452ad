//! The broker: admission, cancellation, and failure policy.
//!
//! Admission order matters: gates run first, the credit deduction is a
//! single compare-and-decrement, the job row is inserted before the queue
//! entry, and the reaper re-enqueues any row left stranded between the last
//! two steps by a crash.

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use serde::Deserialize;
use tracing::{info, warn};
use url::Url;
use uuid::Uuid;

use crate::common::sanitize::sanitize_error_detail;
use crate::common::settings::RenderSettings;
use crate::common::{DomainError, DomainResult};
use crate::kernel::accounts::AccountStore;
use crate::kernel::credits::{CreditLedger, PricingPolicy};
use crate::kernel::deps::BrokerDeps;
use crate::kernel::stream_hub::{credits_topic, job_topic};

use super::events::RenderEvent;
use super::job::{
    AssetRef, JobStatus, QueueTier, RenderErrorKind, RenderJob, RenderOutput, StageError,
};
use super::queue::Lease;
use super::store::JobStore;

/// The broker's submission contract; field validation beyond this shape is
/// the ingress adapter's job.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitRequest {
    pub project_id: Uuid,
    pub code_url: String,
    #[serde(default)]
    pub assets: Vec<AssetRef>,
    pub settings: RenderSettings,
    #[serde(default)]
    pub composition_props: serde_json::Map<String, serde_json::Value>,
}

impl SubmitRequest {
    fn validate(&self) -> DomainResult<()> {
        self.settings.validate()?;
        let parsed = Url::parse(&self.code_url)
            .map_err(|_| DomainError::Validation("code_url must be an absolute URL".into()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(DomainError::Validation(
                "code_url must be an http(s) URL".into(),
            ));
        }
        Ok(())
    }
}

pub struct Broker {
    deps: BrokerDeps,
}

impl Broker {
    pub fn new(deps: BrokerDeps) -> Self {
        Self { deps }
    }

    pub fn deps(&self) -> &BrokerDeps {
        &self.deps
    }

    fn deduct_reference(job_id: Uuid) -> String {
        format!("render:{job_id}")
    }

    fn refund_reference(job_id: Uuid) -> String {
        format!("refund:{job_id}")
    }

    /// Admit a render job: gates, pricing, atomic deduct, insert, enqueue.
    pub async fn submit(&self, owner_id: Uuid, request: SubmitRequest) -> DomainResult<RenderJob> {
        request.validate()?;

        let account = self.deps.accounts.get(owner_id).await?;
        let tier = account.plan.queue_tier();

        if tier == QueueTier::Free {
            if request.settings.height > self.deps.config.free_max_height {
                return Err(DomainError::QuotaResolution);
            }
            if self.deps.ledger.daily_count(owner_id).await?
                >= self.deps.config.free_daily_render_limit
            {
                return Err(DomainError::QuotaDaily);
            }
        }

        let cost = self.deps.pricing.cost(&request.settings);
        let balance = self.deps.ledger.balance(owner_id).await?;
        if balance < cost as i64 {
            return Err(DomainError::InsufficientCredits {
                required: cost,
                available: balance,
            });
        }

        let job = RenderJob::builder()
            .owner_id(owner_id)
            .project_id(request.project_id)
            .code_url(request.code_url)
            .asset_refs(request.assets)
            .settings(request.settings)
            .composition_props(request.composition_props)
            .tier(tier)
            .credits_charged(cost)
            .total_frames(request.settings.duration_frames)
            .build();

        // Single compare-and-decrement; a concurrent spender can still win
        // the race between the gate above and this call.
        let deduct_ref = Self::deduct_reference(job.id);
        let new_balance = self.deps.ledger.deduct(owner_id, cost, &deduct_ref).await?;

        let job = self.deps.store.insert(job).await?;
        self.deps.ledger.record_render(owner_id, &deduct_ref).await?;

        // A crash here leaves a queued row with no queue entry; the reaper
        // picks it up via `reenqueue_orphans`.
        let queue_ref = self
            .deps
            .queues
            .enqueue(
                job.id,
                owner_id,
                tier,
                tier.priority(),
                job.queued_at,
                std::time::Duration::ZERO,
            )
            .await;
        self.deps.store.set_queue_ref(job.id, &queue_ref).await?;

        self.deps
            .hub
            .publish(
                &credits_topic(owner_id),
                RenderEvent::CreditsUpdated {
                    balance: new_balance,
                }
                .as_json(),
            )
            .await;

        info!(
            job_id = %job.id,
            owner_id = %owner_id,
            queue = tier.queue_name(),
            credits = cost,
            "render job queued"
        );

        self.deps.store.get(job.id).await
    }

    /// Cancel a job. Queued jobs are removed and refunded immediately;
    /// running jobs get a cooperative cancellation flag the worker observes
    /// at the next stage boundary.
    pub async fn cancel(&self, owner_id: Uuid, job_id: Uuid) -> DomainResult<RenderJob> {
        let job = self.deps.store.get(job_id).await?;
        if job.owner_id != owner_id {
            return Err(DomainError::Forbidden(
                "job belongs to another account".into(),
            ));
        }

        match job.status {
            JobStatus::Queued => {
                self.deps.queues.remove(job_id).await;
                let job = self.deps.store.mark_cancelled(job_id).await?;
                self.refund(&job).await?;
                self.publish_job(job_id, RenderEvent::Cancelled { job_id }).await;
                info!(job_id = %job_id, "cancelled queued job");
                Ok(job)
            }
            JobStatus::Processing | JobStatus::Encoding => {
                let job = self.deps.store.request_cancel(job_id).await?;
                info!(job_id = %job_id, "cancellation requested; worker will abort at next stage boundary");
                Ok(job)
            }
            _ => Err(DomainError::Conflict(format!(
                "job {job_id} already finished"
            ))),
        }
    }

    /// Move a leased job into `processing` and announce it. Reclaimed leases
    /// count as a retry of the presumed-dead attempt.
    pub async fn start_job(&self, lease: &Lease) -> DomainResult<RenderJob> {
        if lease.reclaimed {
            let retry_count = self.deps.store.increment_retry(lease.job_id).await?;
            warn!(job_id = %lease.job_id, retry_count, "re-leasing job from expired lease");
        }
        let job = self.deps.store.mark_processing(lease.job_id).await?;
        if let Some(started_at) = job.started_at {
            self.publish_job(
                job.id,
                RenderEvent::Started {
                    job_id: job.id,
                    started_at,
                },
            )
            .await;
        }
        Ok(job)
    }

    /// Finalize a successful render.
    pub async fn complete_job(&self, job_id: Uuid, output: RenderOutput) -> DomainResult<RenderJob> {
        let job = self
            .deps
            .store
            .mark_completed(job_id, &output.output_url, output.size_bytes)
            .await?;
        self.deps.queues.complete(job_id).await;
        if let Some(completed_at) = job.completed_at {
            self.publish_job(
                job_id,
                RenderEvent::Completed {
                    job_id,
                    output_url: output.output_url,
                    file_size: output.size_bytes,
                    duration_ms: job.duration_ms(),
                    completed_at,
                },
            )
            .await;
        }
        info!(job_id = %job_id, size_bytes = output.size_bytes, "render job completed");
        Ok(job)
    }

    /// Apply the failure policy for a stage error: cooperative cancellation
    /// first, then the retry table, then terminal failure with refund.
    pub async fn handle_failure(&self, job_id: Uuid, error: StageError) -> DomainResult<RenderJob> {
        let job = self.deps.store.get(job_id).await?;

        if job.cancel_requested_at.is_some() && !job.is_terminal() {
            self.deps.queues.fail(job_id).await;
            let job = self.deps.store.mark_cancelled(job_id).await?;
            self.refund(&job).await?;
            self.publish_job(job_id, RenderEvent::Cancelled { job_id }).await;
            info!(job_id = %job_id, "worker acknowledged cancellation");
            return Ok(job);
        }

        let kind = error.kind;
        if kind.is_retryable() && job.retry_count < kind.max_retries() {
            let attempt = job.retry_count;
            let delay =
                RenderErrorKind::backoff_delay(self.deps.config.retry_backoff_base, attempt);

            self.deps.queues.fail(job_id).await;
            let retry_count = self.deps.store.increment_retry(job_id).await?;
            let job = self.deps.store.requeue(job_id).await?;
            let queue_ref = self
                .deps
                .queues
                .enqueue(
                    job.id,
                    job.owner_id,
                    job.tier,
                    job.tier.priority(),
                    job.queued_at,
                    delay,
                )
                .await;
            self.deps.store.set_queue_ref(job.id, &queue_ref).await?;

            warn!(
                job_id = %job_id,
                error_kind = ?kind,
                retry_count,
                delay_ms = delay.as_millis() as u64,
                "render stage failed; retrying with backoff"
            );
            return self.deps.store.get(job_id).await;
        }

        self.deps.queues.fail(job_id).await;
        let detail = sanitize_error_detail(&error.detail);
        let job = self.deps.store.mark_failed(job_id, kind, &detail).await?;
        self.refund(&job).await?;
        if let Some(completed_at) = job.completed_at {
            self.publish_job(
                job_id,
                RenderEvent::Failed {
                    job_id,
                    error_kind: kind,
                    error_detail: detail.clone(),
                    completed_at,
                },
            )
            .await;
        }
        warn!(job_id = %job_id, error_kind = ?kind, detail = %detail, "render job failed terminally");
        Ok(job)
    }

    /// Fail `processing`/`encoding` jobs that have exceeded the wall-clock
    /// budget. Returns how many were reaped.
    pub async fn reap_stale(&self, max_age: std::time::Duration) -> DomainResult<usize> {
        let cutoff = Utc::now()
            - ChronoDuration::from_std(max_age)
                .map_err(|e| DomainError::Internal(e.to_string()))?;
        let stalled = self.deps.store.stalled_since(cutoff).await?;
        let mut reaped = 0;
        for job in stalled {
            warn!(job_id = %job.id, started_at = ?job.started_at, "job exceeded render deadline; reaping");
            let error = StageError::timeout(
                super::job::Stage::Rendering,
                "job exceeded the render deadline",
            );
            if self.handle_failure(job.id, error).await.is_ok() {
                reaped += 1;
            }
        }
        Ok(reaped)
    }

    /// Put a job interrupted by worker shutdown back on its queue. The
    /// interrupted attempt does not count against the retry budget.
    pub async fn requeue_interrupted(&self, job_id: Uuid) -> DomainResult<RenderJob> {
        self.deps.queues.fail(job_id).await;
        let job = self.deps.store.requeue(job_id).await?;
        let queue_ref = self
            .deps
            .queues
            .enqueue(
                job.id,
                job.owner_id,
                job.tier,
                job.tier.priority(),
                job.queued_at,
                std::time::Duration::ZERO,
            )
            .await;
        self.deps.store.set_queue_ref(job.id, &queue_ref).await?;
        info!(job_id = %job_id, "requeued job interrupted by shutdown");
        self.deps.store.get(job_id).await
    }

    /// Re-enqueue queued rows with no live queue entry (crash window between
    /// row insert and enqueue).
    pub async fn reenqueue_orphans(&self) -> DomainResult<usize> {
        let queued = self.deps.store.queued_jobs().await?;
        let mut recovered = 0;
        for job in queued {
            if self.deps.queues.contains(job.id).await {
                continue;
            }
            let queue_ref = self
                .deps
                .queues
                .enqueue(
                    job.id,
                    job.owner_id,
                    job.tier,
                    job.tier.priority(),
                    job.queued_at,
                    std::time::Duration::ZERO,
                )
                .await;
            self.deps.store.set_queue_ref(job.id, &queue_ref).await?;
            warn!(job_id = %job.id, "re-enqueued orphaned queued job");
            recovered += 1;
        }
        Ok(recovered)
    }

    /// Refund the charge exactly once per job; the ledger collapses replays
    /// by reference.
    async fn refund(&self, job: &RenderJob) -> DomainResult<()> {
        self.deps
            .ledger
            .release_render(job.owner_id, &Self::deduct_reference(job.id))
            .await?;
        if job.credits_charged == 0 {
            return Ok(());
        }
        let balance = self
            .deps
            .ledger
            .refund(
                job.owner_id,
                job.credits_charged,
                &Self::refund_reference(job.id),
            )
            .await?;
        self.deps
            .hub
            .publish(
                &credits_topic(job.owner_id),
                RenderEvent::CreditsUpdated { balance }.as_json(),
            )
            .await;
        Ok(())
    }

    async fn publish_job(&self, job_id: Uuid, event: RenderEvent) {
        self.deps.hub.publish(&job_topic(job_id), event.as_json()).await;
    }
}

pub type SharedBroker = Arc<Broker>;
