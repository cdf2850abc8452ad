//! Fake collaborators for driving the pipeline without external tools.

use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use axum::routing::get;
use axum::Router;
use tokio::sync::Notify;

use renderflow_core::domains::render::{
    Bundler, DependencyInstaller, ProgressReporter, RenderRequest, Renderer,
};
use renderflow_core::kernel::jobs::{AssetRef, SubmitRequest};
use renderflow_core::kernel::ObjectStorage;
use renderflow_core::common::settings::{OutputFormat, RenderSettings};

/// Installer that succeeds without touching the network.
pub struct NoopInstaller;

#[async_trait]
impl DependencyInstaller for NoopInstaller {
    async fn install(&self, _workdir: &Path) -> Result<()> {
        Ok(())
    }
}

/// Bundler that hands back a fixed serve URL.
pub struct StaticBundler;

#[async_trait]
impl Bundler for StaticBundler {
    async fn bundle(&self, _entry_point: &Path) -> Result<String> {
        Ok("http://127.0.0.1:3333/bundle".to_string())
    }
}

async fn write_output(request: &RenderRequest) -> Result<()> {
    tokio::fs::write(&request.output_path, vec![0u8; 1024]).await?;
    Ok(())
}

/// Renderer that reports every frame and writes a small output file.
#[derive(Default)]
pub struct OkRenderer {
    pub invocations: AtomicU32,
}

#[async_trait]
impl Renderer for OkRenderer {
    async fn render(&self, request: &RenderRequest, progress: &ProgressReporter) -> Result<()> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        for frame in 0..request.settings.duration_frames {
            progress.frame(frame).await;
        }
        write_output(request).await
    }
}

/// Renderer that fails the first `n` invocations, then succeeds.
pub struct FlakyRenderer {
    pub failures_remaining: AtomicU32,
    pub invocations: AtomicU32,
}

impl FlakyRenderer {
    pub fn failing(times: u32) -> Self {
        Self {
            failures_remaining: AtomicU32::new(times),
            invocations: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl Renderer for FlakyRenderer {
    async fn render(&self, request: &RenderRequest, _progress: &ProgressReporter) -> Result<()> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_remaining.store(remaining - 1, Ordering::SeqCst);
            bail!("renderer crashed writing /tmp/render-scratch/output.mp4");
        }
        write_output(request).await
    }
}

/// Renderer that parks until released, so tests can interleave control
/// operations with a running job.
pub struct BlockingRenderer {
    pub started: Arc<Notify>,
    pub release: Arc<Notify>,
}

impl BlockingRenderer {
    pub fn new() -> Self {
        Self {
            started: Arc::new(Notify::new()),
            release: Arc::new(Notify::new()),
        }
    }
}

impl Default for BlockingRenderer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Renderer for BlockingRenderer {
    async fn render(&self, request: &RenderRequest, _progress: &ProgressReporter) -> Result<()> {
        self.started.notify_one();
        self.release.notified().await;
        write_output(request).await
    }
}

/// Storage that records uploads (and can be told to refuse the first few).
#[derive(Default)]
pub struct RecordingStorage {
    pub uploads: std::sync::Mutex<Vec<(String, String)>>,
    pub failures_remaining: AtomicU32,
}

impl RecordingStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(times: u32) -> Self {
        Self {
            uploads: std::sync::Mutex::new(Vec::new()),
            failures_remaining: AtomicU32::new(times),
        }
    }

    pub fn upload_keys(&self) -> Vec<String> {
        self.uploads
            .lock()
            .unwrap()
            .iter()
            .map(|(key, _)| key.clone())
            .collect()
    }
}

#[async_trait]
impl ObjectStorage for RecordingStorage {
    async fn upload(&self, _local_path: &Path, key: &str, content_type: &str) -> Result<String> {
        let remaining = self.failures_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_remaining.store(remaining - 1, Ordering::SeqCst);
            bail!("object store unavailable");
        }
        self.uploads
            .lock()
            .unwrap()
            .push((key.to_string(), content_type.to_string()));
        Ok(self.public_url(key))
    }

    async fn delete(&self, _key: &str) -> Result<()> {
        Ok(())
    }

    async fn presigned_put(&self, key: &str, _content_type: &str, _ttl: Duration) -> Result<String> {
        Ok(self.public_url(key))
    }

    fn public_url(&self, key: &str) -> String {
        format!("https://cdn.test/{key}")
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

/// Serve a tiny code-bundle site on an ephemeral port. `/bundle.tsx` has a
/// valid body, `/empty.tsx` an empty one, anything else 404s.
pub async fn serve_code_bundles() -> String {
    let app = Router::new()
        .route(
            "/bundle.tsx",
            get(|| async { "export const Main = () => null;" }),
        )
        .route("/empty.tsx", get(|| async { "" }));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{addr}")
}

pub fn render_settings(height: u32) -> RenderSettings {
    RenderSettings {
        width: 1920,
        height,
        fps: 30,
        duration_frames: 900,
        format: OutputFormat::Mp4,
    }
}

pub fn submit_request(code_url: &str, height: u32) -> SubmitRequest {
    SubmitRequest {
        project_id: uuid::Uuid::new_v4(),
        code_url: code_url.to_string(),
        assets: vec![AssetRef {
            name: "logo".to_string(),
            url: "https://assets.example.com/logo.png".to_string(),
        }],
        settings: render_settings(height),
        composition_props: serde_json::Map::new(),
    }
}
