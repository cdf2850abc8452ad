//! Render worker service.
//!
//! A worker is a long-running loop that leases one job at a time, drives the
//! pipeline through the [`RenderExecutor`] seam, and reports the outcome to
//! the broker. Cancellation is cooperative: the executor checks its context
//! at stage boundaries, so between boundaries the worker is non-preemptable.
//!
//! # Architecture
//!
//! ```text
//! RenderWorker
//!     │
//!     ├─► Lease (tier queues, enterprise → pro → free)
//!     ├─► Broker.start_job (queued → processing, `started` event)
//!     ├─► RenderExecutor.execute (six pipeline stages)
//!     └─► Broker.complete_job / Broker.handle_failure
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::common::DomainError;

use super::broker::Broker;
use super::store::JobStore;
use super::job::{QueueTier, RenderJob, RenderOutput, StageError};
use super::queue::Lease;

/// Configuration for a render worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// How long to wait when no jobs are available.
    pub poll_interval: Duration,
    /// Hard wall-clock budget per job; the executor declines to start a new
    /// stage past this deadline.
    pub job_timeout: Duration,
    /// How long to wait for running jobs during graceful shutdown before
    /// cancelling them.
    pub drain_timeout: Duration,
    /// Worker ID for this instance
    pub worker_id: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            job_timeout: Duration::from_secs(30 * 60),
            drain_timeout: Duration::from_secs(30),
            worker_id: format!("render-worker-{}", Uuid::new_v4()),
        }
    }
}

impl WorkerConfig {
    /// Create a new config with a specific worker ID.
    pub fn with_worker_id(worker_id: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            ..Default::default()
        }
    }
}

/// Per-job execution context handed to the executor.
pub struct ExecutionContext {
    /// Cancelled on shutdown; user cancellation travels through the job row.
    pub cancel: CancellationToken,
    /// Wall-clock deadline derived from the job timeout.
    pub deadline: Instant,
}

impl ExecutionContext {
    pub fn deadline_exceeded(&self) -> bool {
        Instant::now() >= self.deadline
    }
}

/// Seam between the worker loop and the render pipeline.
#[async_trait]
pub trait RenderExecutor: Send + Sync {
    async fn execute(
        &self,
        job: &RenderJob,
        ctx: &ExecutionContext,
    ) -> Result<RenderOutput, StageError>;
}

/// Long-running worker loop processing render jobs.
pub struct RenderWorker {
    broker: Arc<Broker>,
    executor: Arc<dyn RenderExecutor>,
    config: WorkerConfig,
    /// Track running jobs for shutdown draining
    running_jobs: Arc<RwLock<HashMap<Uuid, CancellationToken>>>,
}

impl RenderWorker {
    pub fn new(broker: Arc<Broker>, executor: Arc<dyn RenderExecutor>) -> Self {
        Self::with_config(broker, executor, WorkerConfig::default())
    }

    pub fn with_config(
        broker: Arc<Broker>,
        executor: Arc<dyn RenderExecutor>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            broker,
            executor,
            config,
            running_jobs: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Lease the next job, preferring higher tiers. Cross-tier fairness is
    /// policy, not a guarantee.
    async fn lease_next(&self) -> Option<Lease> {
        for tier in QueueTier::ALL {
            if let Some(lease) = self
                .broker
                .deps()
                .queues
                .lease(tier, &self.config.worker_id)
                .await
            {
                return Some(lease);
            }
        }
        None
    }

    /// Run the worker until shutdown is requested.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) -> Result<()> {
        info!(worker_id = %self.config.worker_id, "render worker starting");

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            match self.lease_next().await {
                Some(lease) => self.process(lease, &shutdown).await,
                None => {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                    }
                }
            }
        }

        self.drain().await;
        info!(worker_id = %self.config.worker_id, "render worker stopped");
        Ok(())
    }

    async fn process(&self, lease: Lease, shutdown: &CancellationToken) {
        let job_id = lease.job_id;

        let job = match self.broker.start_job(&lease).await {
            Ok(job) => job,
            Err(DomainError::Conflict(_)) => {
                // Cancelled (or otherwise finished) between enqueue and
                // lease; release the queue slot and move on.
                debug!(job_id = %job_id, "leased job is no longer runnable");
                self.broker.deps().queues.fail(job_id).await;
                return;
            }
            Err(e) => {
                error!(job_id = %job_id, error = %e, "failed to start leased job");
                self.broker.deps().queues.fail(job_id).await;
                return;
            }
        };

        let job_cancel = shutdown.child_token();
        self.running_jobs
            .write()
            .await
            .insert(job_id, job_cancel.clone());

        let ctx = ExecutionContext {
            cancel: job_cancel,
            deadline: Instant::now() + self.config.job_timeout,
        };

        debug!(job_id = %job_id, worker_id = %self.config.worker_id, "executing render job");
        let result = self.executor.execute(&job, &ctx).await;

        match result {
            Ok(output) => {
                if let Err(e) = self.broker.complete_job(job_id, output).await {
                    error!(job_id = %job_id, error = %e, "failed to finalize completed job");
                }
            }
            Err(stage_error) => {
                let user_cancelled = self
                    .broker
                    .deps()
                    .store
                    .cancel_requested(job_id)
                    .await
                    .unwrap_or(false);
                if shutdown.is_cancelled() && !user_cancelled {
                    // Shutdown abort, not a real failure: put the job back.
                    if let Err(e) = self.broker.requeue_interrupted(job_id).await {
                        error!(job_id = %job_id, error = %e, "failed to requeue interrupted job");
                    }
                } else {
                    warn!(
                        job_id = %job_id,
                        stage = ?stage_error.stage,
                        error_kind = ?stage_error.kind,
                        "render job attempt failed"
                    );
                    if let Err(e) = self.broker.handle_failure(job_id, stage_error).await {
                        error!(job_id = %job_id, error = %e, "failed to record job failure");
                    }
                }
            }
        }

        self.running_jobs.write().await.remove(&job_id);
    }

    /// Graceful shutdown: give running jobs a window to finish, then cancel
    /// the stragglers and wait for their stage boundary.
    async fn drain(&self) {
        let running_count = self.running_jobs.read().await.len();
        if running_count == 0 {
            return;
        }
        info!(count = running_count, "waiting for running jobs to finish");

        let deadline = Instant::now() + self.config.drain_timeout;
        while !self.running_jobs.read().await.is_empty() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        let stragglers = self.running_jobs.read().await;
        for (job_id, token) in stragglers.iter() {
            warn!(job_id = %job_id, "cancelling job that outlived the drain window");
            token.cancel();
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = WorkerConfig::default();
        assert_eq!(config.job_timeout, Duration::from_secs(1800));
        assert!(config.worker_id.starts_with("render-worker-"));
    }

    #[test]
    fn config_with_worker_id() {
        let config = WorkerConfig::with_worker_id("render-1");
        assert_eq!(config.worker_id, "render-1");
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_detection() {
        let ctx = ExecutionContext {
            cancel: CancellationToken::new(),
            deadline: Instant::now() + Duration::from_secs(10),
        };
        assert!(!ctx.deadline_exceeded());
        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(ctx.deadline_exceeded());
    }
}
