//! Render job model.
//!
//! The job row is the authoritative record of one render: identity, queue
//! routing, lifecycle status, retry bookkeeping, credit charge, progress,
//! and terminal output or error. Status changes only happen through the
//! state store so the lifecycle rules in [`JobStatus`] hold everywhere.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use typed_builder::TypedBuilder;
use uuid::Uuid;

use crate::common::settings::RenderSettings;

// ============================================================================
// Enums
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Queued,
    Processing,
    Encoding,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Terminal states are absorbing: no transition may leave them.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Whether a direct transition to `next` is legal.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Queued, Processing)
                | (Queued, Cancelled)
                | (Processing, Encoding)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Processing, Cancelled)
                | (Processing, Queued) // retry re-enqueue
                | (Encoding, Completed)
                | (Encoding, Failed)
                | (Encoding, Cancelled)
                | (Encoding, Queued) // retry re-enqueue
        )
    }
}

/// Queue routing tier, frozen onto the job at submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum QueueTier {
    #[default]
    Free,
    Pro,
    Enterprise,
}

impl QueueTier {
    pub const ALL: [QueueTier; 3] = [QueueTier::Enterprise, QueueTier::Pro, QueueTier::Free];

    pub fn queue_name(&self) -> &'static str {
        match self {
            QueueTier::Free => "render:free",
            QueueTier::Pro => "render:pro",
            QueueTier::Enterprise => "render:enterprise",
        }
    }

    /// Queue priority; lower runs sooner.
    pub fn priority(&self) -> u8 {
        match self {
            QueueTier::Enterprise => 1,
            QueueTier::Pro => 5,
            QueueTier::Free => 10,
        }
    }

    /// Concurrent leases allowed per owner within this tier.
    pub fn max_leases_per_owner(&self) -> usize {
        match self {
            QueueTier::Free => 1,
            QueueTier::Pro => 3,
            QueueTier::Enterprise => 10,
        }
    }
}

/// Pipeline stage labels as reported to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Fetching,
    Preparing,
    Bundling,
    Rendering,
    Uploading,
}

/// Classified render failure.
///
/// Each kind fixes whether the pipeline retries and how often; backoff is
/// exponential on a five-second base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RenderErrorKind {
    CodeError,
    BundleError,
    RenderError,
    UploadError,
    TimeoutError,
}

impl RenderErrorKind {
    pub fn is_retryable(&self) -> bool {
        matches!(self, RenderErrorKind::RenderError | RenderErrorKind::UploadError)
    }

    pub fn max_retries(&self) -> u32 {
        match self {
            RenderErrorKind::RenderError => 2,
            RenderErrorKind::UploadError => 3,
            RenderErrorKind::CodeError
            | RenderErrorKind::BundleError
            | RenderErrorKind::TimeoutError => 0,
        }
    }

    /// Retry delay for the given zero-based attempt: `5s · 2^attempt`.
    pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
        base * 2u32.saturating_pow(attempt)
    }
}

/// Error thrown by a pipeline stage, already classified.
#[derive(Debug, Clone, Error)]
#[error("{stage:?} stage failed: {detail}")]
pub struct StageError {
    pub stage: Stage,
    pub kind: RenderErrorKind,
    pub detail: String,
}

impl StageError {
    pub fn new(stage: Stage, kind: RenderErrorKind, detail: impl Into<String>) -> Self {
        Self {
            stage,
            kind,
            detail: detail.into(),
        }
    }

    pub fn code(stage: Stage, detail: impl Into<String>) -> Self {
        Self::new(stage, RenderErrorKind::CodeError, detail)
    }

    pub fn bundle(detail: impl Into<String>) -> Self {
        Self::new(Stage::Bundling, RenderErrorKind::BundleError, detail)
    }

    pub fn render(detail: impl Into<String>) -> Self {
        Self::new(Stage::Rendering, RenderErrorKind::RenderError, detail)
    }

    pub fn upload(detail: impl Into<String>) -> Self {
        Self::new(Stage::Uploading, RenderErrorKind::UploadError, detail)
    }

    pub fn timeout(stage: Stage, detail: impl Into<String>) -> Self {
        Self::new(stage, RenderErrorKind::TimeoutError, detail)
    }
}

// ============================================================================
// Job Model
// ============================================================================

/// Named external asset referenced by the composition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRef {
    pub name: String,
    pub url: String,
}

/// Result of a successful pipeline run.
#[derive(Debug, Clone)]
pub struct RenderOutput {
    pub output_url: String,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct RenderJob {
    #[builder(default = Uuid::new_v4())]
    pub id: Uuid,

    // Core identity
    pub owner_id: Uuid,
    pub project_id: Uuid,

    // Render inputs
    pub code_url: String,
    #[builder(default)]
    pub asset_refs: Vec<AssetRef>,
    pub settings: RenderSettings,
    #[builder(default)]
    pub composition_props: serde_json::Map<String, serde_json::Value>,

    // Queue routing
    pub tier: QueueTier,
    /// Broker-local queue handle mapping queue state back to this row.
    #[builder(default, setter(strip_option))]
    pub queue_ref: Option<String>,

    // State
    #[builder(default)]
    pub status: JobStatus,
    #[builder(default = 0)]
    pub retry_count: u32,
    /// From the error policy at time of failure.
    #[builder(default = 0)]
    pub max_retries: u32,

    // Credits
    #[builder(default = 0)]
    pub credits_charged: u32,

    // Progress
    #[builder(default = 0)]
    pub progress: u8,
    #[builder(default = 0)]
    pub current_frame: u32,
    pub total_frames: u32,

    // Output
    #[builder(default, setter(strip_option))]
    pub output_url: Option<String>,
    #[builder(default, setter(strip_option))]
    pub output_size_bytes: Option<u64>,

    // Error tracking
    #[builder(default, setter(strip_option))]
    pub error_kind: Option<RenderErrorKind>,
    #[builder(default, setter(strip_option))]
    pub error_detail: Option<String>,

    // Timestamps
    #[builder(default = Utc::now())]
    pub queued_at: DateTime<Utc>,
    #[builder(default, setter(strip_option))]
    pub started_at: Option<DateTime<Utc>>,
    #[builder(default, setter(strip_option))]
    pub completed_at: Option<DateTime<Utc>>,
    #[builder(default, setter(strip_option))]
    pub cancel_requested_at: Option<DateTime<Utc>>,

    /// Bumped on every store write; per-job writes are totally ordered.
    #[builder(default = 0)]
    pub epoch: u64,
}

impl RenderJob {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Object store key for this job's output.
    pub fn output_key(&self) -> String {
        crate::kernel::storage::output_key(
            self.owner_id,
            self.id,
            self.settings.format.extension(),
        )
    }

    /// Wall-clock spent processing, for the completion event.
    pub fn duration_ms(&self) -> u64 {
        match (self.started_at, self.completed_at) {
            (Some(started), Some(completed)) => {
                (completed - started).num_milliseconds().max(0) as u64
            }
            _ => 0,
        }
    }
}
