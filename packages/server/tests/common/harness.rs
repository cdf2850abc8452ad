//! Per-test broker environment: fresh in-memory dependencies, fast retry
//! backoff, and helpers for spawning workers and awaiting job states.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use renderflow_core::domains::render::{PipelineConfig, RenderPipeline, Renderer};
use renderflow_core::kernel::jobs::{
    Broker, InMemoryJobStore, JobStatus, JobStore, RenderExecutor, RenderJob, RenderWorker,
    TierQueueConfig, TierQueues, WorkerConfig,
};
use renderflow_core::kernel::{
    Account, BrokerConfig, BrokerDeps, FixedPricing, InMemoryAccountStore, InMemoryCreditLedger,
    PlanTier, StreamHub,
};

use super::fixtures::{NoopInstaller, RecordingStorage, StaticBundler};

pub struct TestHarness {
    pub deps: BrokerDeps,
    pub broker: Arc<Broker>,
    pub accounts: Arc<InMemoryAccountStore>,
    pub ledger: Arc<InMemoryCreditLedger>,
    pub storage: Arc<RecordingStorage>,
    pub shutdown: CancellationToken,
    workspace_root: tempfile::TempDir,
}

impl TestHarness {
    pub async fn new() -> Self {
        Self::with_storage(Arc::new(RecordingStorage::new())).await
    }

    pub async fn with_storage(storage: Arc<RecordingStorage>) -> Self {
        let accounts = Arc::new(InMemoryAccountStore::new());
        let ledger = Arc::new(InMemoryCreditLedger::new());
        let deps = BrokerDeps::new(
            Arc::new(InMemoryJobStore::new()),
            Arc::new(TierQueues::new(TierQueueConfig::default())),
            ledger.clone(),
            accounts.clone(),
            storage.clone(),
            Arc::new(FixedPricing(1)),
            StreamHub::new(),
            BrokerConfig {
                // Keep retry tests fast; the shape (base · 2^attempt) is
                // what matters.
                retry_backoff_base: Duration::from_millis(50),
                ..BrokerConfig::default()
            },
        );
        let broker = Arc::new(Broker::new(deps.clone()));
        Self {
            deps,
            broker,
            accounts,
            ledger,
            storage,
            shutdown: CancellationToken::new(),
            workspace_root: tempfile::tempdir().expect("workspace root"),
        }
    }

    pub async fn seed_account(&self, plan: PlanTier, balance: i64) -> Uuid {
        let owner_id = Uuid::new_v4();
        self.accounts.put(Account { id: owner_id, plan }).await;
        self.ledger.set_balance(owner_id, balance).await;
        owner_id
    }

    pub fn workspace_root(&self) -> std::path::PathBuf {
        self.workspace_root.path().to_path_buf()
    }

    pub fn pipeline(&self, renderer: Arc<dyn Renderer>) -> Arc<RenderPipeline> {
        Arc::new(RenderPipeline::new(
            &self.deps,
            Arc::new(NoopInstaller),
            Arc::new(StaticBundler),
            renderer,
            PipelineConfig {
                workspace_root: self.workspace_root(),
                install_timeout: Duration::from_secs(5),
                composition: "Main".to_string(),
            },
        ))
    }

    pub fn spawn_worker(&self, executor: Arc<dyn RenderExecutor>) {
        let worker = Arc::new(RenderWorker::with_config(
            self.broker.clone(),
            executor,
            WorkerConfig {
                poll_interval: Duration::from_millis(10),
                job_timeout: Duration::from_secs(5),
                drain_timeout: Duration::from_millis(500),
                worker_id: format!("test-worker-{}", Uuid::new_v4()),
            },
        ));
        tokio::spawn(worker.run(self.shutdown.clone()));
    }

    pub async fn wait_for_status(
        &self,
        job_id: Uuid,
        status: JobStatus,
        timeout: Duration,
    ) -> RenderJob {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let job = self.deps.store.get(job_id).await.expect("job exists");
            if job.status == status {
                return job;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out waiting for {status:?}; job is {:?}",
                job.status
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Scratch directories left behind for this job, by prefix.
    pub fn leftover_workspaces(&self, job_id: Uuid) -> Vec<std::path::PathBuf> {
        let prefix = format!("renderflow-{job_id}-");
        std::fs::read_dir(self.workspace_root.path())
            .map(|entries| {
                entries
                    .filter_map(|entry| entry.ok())
                    .map(|entry| entry.path())
                    .filter(|path| {
                        path.file_name()
                            .and_then(|name| name.to_str())
                            .is_some_and(|name| name.starts_with(&prefix))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl Drop for TestHarness {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Drain everything currently buffered on a broadcast receiver.
pub fn drain_events(
    rx: &mut tokio::sync::broadcast::Receiver<serde_json::Value>,
) -> Vec<serde_json::Value> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

pub fn events_of_type<'a>(
    events: &'a [serde_json::Value],
    event_type: &str,
) -> Vec<&'a serde_json::Value> {
    events
        .iter()
        .filter(|event| event["type"] == event_type)
        .collect()
}
