//! Stale-job reaper.
//!
//! A periodic sweep that fails jobs stuck in `processing`/`encoding` past
//! the wall-clock deadline, re-enqueues orphaned queued rows, and prunes
//! expired queue bookkeeping.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::broker::Broker;

#[derive(Debug, Clone)]
pub struct ReaperConfig {
    pub sweep_interval: Duration,
    /// Jobs processing for longer than this are presumed stuck. Slightly
    /// above the worker's own deadline so the worker gets first say.
    pub max_job_age: Duration,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(60),
            max_job_age: Duration::from_secs(35 * 60),
        }
    }
}

pub struct StaleJobReaper {
    broker: Arc<Broker>,
    config: ReaperConfig,
}

impl StaleJobReaper {
    pub fn new(broker: Arc<Broker>) -> Self {
        Self::with_config(broker, ReaperConfig::default())
    }

    pub fn with_config(broker: Arc<Broker>, config: ReaperConfig) -> Self {
        Self { broker, config }
    }

    /// One sweep; exposed for tests and manual runs.
    pub async fn sweep(&self) {
        match self.broker.reap_stale(self.config.max_job_age).await {
            Ok(reaped) if reaped > 0 => info!(reaped, "reaped stale render jobs"),
            Ok(_) => {}
            Err(e) => error!(error = %e, "stale-job sweep failed"),
        }
        match self.broker.reenqueue_orphans().await {
            Ok(recovered) if recovered > 0 => info!(recovered, "re-enqueued orphaned jobs"),
            Ok(_) => {}
            Err(e) => error!(error = %e, "orphan recovery failed"),
        }
        self.broker.deps().queues.prune().await;
        self.broker.deps().hub.cleanup().await;
    }

    /// Run sweeps until shutdown is requested.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        info!(
            sweep_interval_secs = self.config.sweep_interval.as_secs(),
            max_job_age_secs = self.config.max_job_age.as_secs(),
            "stale-job reaper starting"
        );
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.config.sweep_interval) => self.sweep().await,
            }
        }
        info!("stale-job reaper stopped");
        Ok(())
    }
}
