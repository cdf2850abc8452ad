// Main entry point for the render broker

use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::{Context, Result};
use renderflow_core::domains::render::{
    CliBundler, CliRenderer, PipelineConfig, ProcessInstaller, RenderPipeline,
};
use renderflow_core::kernel::jobs::{
    Broker, InMemoryJobStore, RenderWorker, StaleJobReaper, TierQueues, WorkerConfig,
};
use renderflow_core::kernel::{
    BrokerConfig, BrokerDeps, HttpObjectStore, InMemoryAccountStore, InMemoryCreditLedger,
    ObjectStorage, PlaceholderStore, ResolutionPricing, StreamHub,
};
use renderflow_core::server::{build_app, AppState};
use renderflow_core::Config;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging; LOG_LEVEL takes a standard filter directive.
    let filter = std::env::var("RUST_LOG")
        .or_else(|_| std::env::var("LOG_LEVEL"))
        .unwrap_or_else(|_| "info,renderflow_core=debug".to_string());
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(filter))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting RenderFlow broker");

    let config = Config::from_env().context("Failed to load configuration")?;
    tracing::info!(
        worker_concurrency = config.worker_concurrency,
        job_timeout_ms = config.job_timeout.as_millis() as u64,
        "Configuration loaded"
    );
    if let Some(redis_url) = &config.redis_url {
        tracing::debug!(redis_url = %redis_url, "queue bus DSN configured for external adapter");
    }

    let storage: Arc<dyn ObjectStorage> = match config.object_store.clone() {
        Some(object_store) => Arc::new(HttpObjectStore::new(object_store)),
        None => {
            tracing::warn!("object store credentials absent; uploads run in placeholder mode");
            Arc::new(PlaceholderStore::new())
        }
    };

    let deps = BrokerDeps::new(
        Arc::new(InMemoryJobStore::new()),
        Arc::new(TierQueues::default()),
        Arc::new(InMemoryCreditLedger::new()),
        Arc::new(InMemoryAccountStore::new()),
        storage,
        Arc::new(ResolutionPricing),
        StreamHub::new(),
        BrokerConfig::default(),
    );
    let broker = Arc::new(Broker::new(deps.clone()));

    let pipeline = Arc::new(RenderPipeline::new(
        &deps,
        Arc::new(ProcessInstaller::new()),
        Arc::new(CliBundler::new("renderflow-bundle")),
        Arc::new(CliRenderer::new("renderflow-render")),
        PipelineConfig::default(),
    ));

    let shutdown = CancellationToken::new();
    let mut service_handles = Vec::new();

    let reaper = StaleJobReaper::new(broker.clone());
    service_handles.push(tokio::spawn(reaper.run(shutdown.clone())));

    for index in 0..config.worker_concurrency {
        let worker_config = WorkerConfig {
            job_timeout: config.job_timeout,
            ..WorkerConfig::with_worker_id(format!("render-worker-{index}"))
        };
        let worker = Arc::new(RenderWorker::with_config(
            broker.clone(),
            pipeline.clone(),
            worker_config,
        ));
        service_handles.push(tokio::spawn(worker.run(shutdown.clone())));
    }

    let state = AppState::new(deps, broker);
    state.ready.store(true, Ordering::SeqCst);
    let app = build_app(state);

    let addr = format!("0.0.0.0:{}", config.health_port);
    tracing::info!("Listening on {}", addr);
    tracing::info!("Health check: http://localhost:{}/health", config.health_port);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    let serve_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("received shutdown signal");
            serve_shutdown.cancel();
        })
        .await
        .context("Server error")?;

    shutdown.cancel();
    for handle in service_handles {
        let _ = handle.await;
    }

    Ok(())
}
