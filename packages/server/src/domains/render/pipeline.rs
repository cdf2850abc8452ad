//! The six-stage render pipeline.
//!
//! fetch → prepare → bundle → render → upload → cleanup. Each stage
//! classifies its failures into a [`RenderErrorKind`]; cancellation and the
//! wall-clock deadline are observed between stages (the pipeline is
//! non-preemptable inside one). Cleanup never fails the job; its errors are
//! logged and swallowed.
//!
//! The bundler, renderer, and dependency installer are external tools
//! behind trait seams; the default implementations shell out to their CLIs.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::common::settings::RenderSettings;
use crate::kernel::deps::BrokerDeps;
use crate::kernel::jobs::job::{RenderErrorKind, RenderJob, RenderOutput, Stage, StageError};
use crate::kernel::jobs::queue::TierQueues;
use crate::kernel::jobs::store::JobStore;
use crate::kernel::jobs::worker::{ExecutionContext, RenderExecutor};
use crate::kernel::storage::ObjectStorage;
use crate::kernel::stream_hub::StreamHub;

use super::progress::ProgressReporter;

/// Renderer package version pinned into every job workspace.
const RENDERER_VERSION: &str = "4.0.332";
/// View-runtime versions pinned alongside it.
const REACT_VERSION: &str = "18.3.1";

// =============================================================================
// External tool seams
// =============================================================================

#[async_trait]
pub trait DependencyInstaller: Send + Sync {
    async fn install(&self, workdir: &Path) -> Result<()>;
}

#[async_trait]
pub trait Bundler: Send + Sync {
    /// Bundle the entry point and return a serveable bundle URL.
    async fn bundle(&self, entry_point: &Path) -> Result<String>;
}

/// Everything the renderer needs for one invocation.
#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub bundle_url: String,
    pub composition: String,
    pub settings: RenderSettings,
    pub composition_props: serde_json::Map<String, serde_json::Value>,
    pub output_path: PathBuf,
    pub codec: String,
    /// Render with GPU disabled (software GL).
    pub disable_gpu: bool,
}

#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(&self, request: &RenderRequest, progress: &ProgressReporter) -> Result<()>;
}

// =============================================================================
// Process-backed implementations
// =============================================================================

/// Installs workspace dependencies with a restricted child environment.
pub struct ProcessInstaller {
    command: String,
}

impl ProcessInstaller {
    pub fn new() -> Self {
        Self {
            command: "npm".to_string(),
        }
    }
}

impl Default for ProcessInstaller {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DependencyInstaller for ProcessInstaller {
    async fn install(&self, workdir: &Path) -> Result<()> {
        let path = std::env::var("PATH").unwrap_or_default();
        let output = Command::new(&self.command)
            .args(["install", "--no-audit", "--no-fund"])
            .current_dir(workdir)
            .env_clear()
            .env("HOME", workdir)
            .env("PATH", path)
            .env("NODE_ENV", "production")
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .context("spawning dependency install")?;
        if !output.status.success() {
            bail!(
                "dependency install failed: {}",
                String::from_utf8_lossy(&output.stderr)
            );
        }
        Ok(())
    }
}

/// Invokes the external bundler CLI; the last stdout line is the serve URL.
pub struct CliBundler {
    command: String,
}

impl CliBundler {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

#[async_trait]
impl Bundler for CliBundler {
    async fn bundle(&self, entry_point: &Path) -> Result<String> {
        let output = Command::new(&self.command)
            .arg(entry_point)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .context("spawning bundler")?;
        if !output.status.success() {
            bail!("bundler failed: {}", String::from_utf8_lossy(&output.stderr));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        stdout
            .lines()
            .rev()
            .find(|line| !line.trim().is_empty())
            .map(|line| line.trim().to_string())
            .ok_or_else(|| anyhow!("bundler produced no serve URL"))
    }
}

/// Invokes the external renderer CLI and forwards `frame=<n>` lines from its
/// stdout to the progress reporter.
pub struct CliRenderer {
    command: String,
}

impl CliRenderer {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

#[async_trait]
impl Renderer for CliRenderer {
    async fn render(&self, request: &RenderRequest, progress: &ProgressReporter) -> Result<()> {
        let props = serde_json::to_string(&request.composition_props)
            .context("serializing composition props")?;

        let mut command = Command::new(&self.command);
        command
            .arg(&request.bundle_url)
            .arg("--composition")
            .arg(&request.composition)
            .arg("--width")
            .arg(request.settings.width.to_string())
            .arg("--height")
            .arg(request.settings.height.to_string())
            .arg("--fps")
            .arg(request.settings.fps.to_string())
            .arg("--duration-in-frames")
            .arg(request.settings.duration_frames.to_string())
            .arg("--codec")
            .arg(&request.codec)
            .arg("--props")
            .arg(&props)
            .arg("--output")
            .arg(&request.output_path)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if request.disable_gpu {
            command.args(["--gl", "swangle"]);
        }

        let mut child = command.spawn().context("spawning renderer")?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("renderer stdout unavailable"))?;

        let mut lines = BufReader::new(stdout).lines();
        while let Some(line) = lines.next_line().await? {
            if let Some(frame) = line.trim().strip_prefix("frame=") {
                if let Ok(frame) = frame.parse::<u32>() {
                    progress.frame(frame).await;
                }
            }
        }

        let status = child.wait().await.context("waiting for renderer")?;
        if !status.success() {
            bail!("renderer exited with {status}");
        }
        Ok(())
    }
}

// =============================================================================
// Pipeline
// =============================================================================

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Parent directory for per-job scratch workspaces.
    pub workspace_root: PathBuf,
    pub install_timeout: Duration,
    /// Composition selected from the bundle.
    pub composition: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workspace_root: std::env::temp_dir(),
            install_timeout: Duration::from_secs(120),
            composition: "Main".to_string(),
        }
    }
}

pub struct RenderPipeline {
    http: reqwest::Client,
    installer: Arc<dyn DependencyInstaller>,
    bundler: Arc<dyn Bundler>,
    renderer: Arc<dyn Renderer>,
    storage: Arc<dyn ObjectStorage>,
    store: Arc<dyn JobStore>,
    queues: Arc<TierQueues>,
    hub: StreamHub,
    config: PipelineConfig,
}

impl RenderPipeline {
    pub fn new(
        deps: &BrokerDeps,
        installer: Arc<dyn DependencyInstaller>,
        bundler: Arc<dyn Bundler>,
        renderer: Arc<dyn Renderer>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            installer,
            bundler,
            renderer,
            storage: deps.storage.clone(),
            store: deps.store.clone(),
            queues: deps.queues.clone(),
            hub: deps.hub.clone(),
            config,
        }
    }

    /// Abort gate run before every stage: worker shutdown, cooperative
    /// cancellation, and the hard deadline all surface here.
    async fn checkpoint(
        &self,
        job: &RenderJob,
        stage: Stage,
        ctx: &ExecutionContext,
    ) -> Result<(), StageError> {
        if ctx.cancel.is_cancelled() {
            return Err(StageError::timeout(stage, "worker shutting down"));
        }
        match self.store.cancel_requested(job.id).await {
            Ok(true) => return Err(StageError::timeout(stage, "cancellation requested")),
            Ok(false) => {}
            Err(e) => {
                return Err(StageError::new(
                    stage,
                    RenderErrorKind::RenderError,
                    format!("state store unavailable: {e}"),
                ))
            }
        }
        if ctx.deadline_exceeded() {
            return Err(StageError::timeout(stage, "render deadline exceeded"));
        }
        Ok(())
    }

    async fn fetch(&self, job: &RenderJob) -> Result<Vec<u8>> {
        let response = self
            .http
            .get(&job.code_url)
            .send()
            .await
            .context("fetching code bundle")?
            .error_for_status()
            .context("code bundle request rejected")?;
        let body = response.bytes().await.context("reading code bundle")?;
        if body.is_empty() {
            bail!("code bundle at {} is empty", job.code_url);
        }
        Ok(body.to_vec())
    }

    /// Fresh isolated workspace: entry point, pinned manifest, dependency
    /// install under a restricted environment and a hard timeout.
    async fn prepare(&self, job: &RenderJob, source: &[u8]) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.config.workspace_root)
            .await
            .context("creating workspace root")?;
        let workdir = tempfile::Builder::new()
            .prefix(&format!("renderflow-{}-", job.id))
            .rand_bytes(8)
            .tempdir_in(&self.config.workspace_root)
            .context("creating render workspace")?
            .into_path();

        tokio::fs::write(workdir.join("index.tsx"), source)
            .await
            .context("writing entry point")?;

        let manifest = serde_json::json!({
            "name": "renderflow-job",
            "private": true,
            "dependencies": {
                "@renderflow/renderer": RENDERER_VERSION,
                "react": REACT_VERSION,
                "react-dom": REACT_VERSION,
            }
        });
        tokio::fs::write(
            workdir.join("package.json"),
            serde_json::to_vec_pretty(&manifest)?,
        )
        .await
        .context("writing dependency manifest")?;

        tokio::time::timeout(self.config.install_timeout, self.installer.install(&workdir))
            .await
            .map_err(|_| {
                anyhow!(
                    "dependency install timed out after {}s",
                    self.config.install_timeout.as_secs()
                )
            })??;

        Ok(workdir)
    }

    async fn cleanup(&self, workdir: &Path) {
        match tokio::fs::remove_dir_all(workdir).await {
            Ok(()) => debug!(workdir = %workdir.display(), "removed render workspace"),
            Err(e) => warn!(
                workdir = %workdir.display(),
                error = %e,
                "failed to remove render workspace"
            ),
        }
    }

    async fn run_stages(
        &self,
        job: &RenderJob,
        ctx: &ExecutionContext,
        reporter: &ProgressReporter,
        workdir_out: &mut Option<PathBuf>,
    ) -> Result<RenderOutput, StageError> {
        // FETCH
        self.checkpoint(job, Stage::Fetching, ctx).await?;
        reporter.enter_stage(Stage::Fetching).await;
        let source = self
            .fetch(job)
            .await
            .map_err(|e| StageError::code(Stage::Fetching, format!("{e:#}")))?;

        // PREPARE
        self.checkpoint(job, Stage::Preparing, ctx).await?;
        reporter.enter_stage(Stage::Preparing).await;
        let workdir = self
            .prepare(job, &source)
            .await
            .map_err(|e| StageError::code(Stage::Preparing, format!("{e:#}")))?;
        *workdir_out = Some(workdir.clone());

        // BUNDLE
        self.checkpoint(job, Stage::Bundling, ctx).await?;
        reporter.enter_stage(Stage::Bundling).await;
        let bundle_url = self
            .bundler
            .bundle(&workdir.join("index.tsx"))
            .await
            .map_err(|e| StageError::bundle(format!("{e:#}")))?;

        // RENDER
        self.checkpoint(job, Stage::Rendering, ctx).await?;
        reporter.enter_stage(Stage::Rendering).await;
        let output_path = workdir.join(format!("output.{}", job.settings.format.extension()));
        let request = RenderRequest {
            bundle_url,
            composition: self.config.composition.clone(),
            settings: job.settings,
            composition_props: job.composition_props.clone(),
            output_path: output_path.clone(),
            codec: job.settings.format.codec().to_string(),
            disable_gpu: true,
        };
        self.renderer
            .render(&request, reporter)
            .await
            .map_err(|e| StageError::render(format!("{e:#}")))?;

        // Encode phase sits between render and upload in the observable
        // lifecycle.
        self.checkpoint(job, Stage::Uploading, ctx).await?;
        self.store.mark_encoding(job.id).await.map_err(|e| {
            StageError::new(
                Stage::Rendering,
                RenderErrorKind::RenderError,
                format!("failed to enter encoding phase: {e}"),
            )
        })?;

        // UPLOAD
        reporter.enter_stage(Stage::Uploading).await;
        let key = job.output_key();
        let content_type = job.settings.format.content_type();
        let output_url = self
            .storage
            .upload(&output_path, &key, content_type)
            .await
            .map_err(|e| StageError::upload(format!("{e:#}")))?;
        let size_bytes = tokio::fs::metadata(&output_path)
            .await
            .map(|meta| meta.len())
            .unwrap_or(0);

        reporter.finish().await;
        Ok(RenderOutput {
            output_url,
            size_bytes,
        })
    }
}

#[async_trait]
impl RenderExecutor for RenderPipeline {
    async fn execute(
        &self,
        job: &RenderJob,
        ctx: &ExecutionContext,
    ) -> Result<RenderOutput, StageError> {
        let reporter = ProgressReporter::new(
            job.id,
            job.total_frames,
            self.hub.clone(),
            self.store.clone(),
            self.queues.clone(),
        );

        let mut workdir = None;
        let result = self.run_stages(job, ctx, &reporter, &mut workdir).await;

        // CLEANUP always runs; its errors never fail the job.
        if let Some(dir) = workdir {
            self.cleanup(&dir).await;
        }
        result
    }
}
