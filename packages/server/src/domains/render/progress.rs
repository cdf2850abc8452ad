//! Progress reporting for the render pipeline.
//!
//! Converts the renderer's per-frame callback into throttled progress
//! events: every fifth frame, at most one emission every two seconds, with
//! throttle-bypassing emissions at stage boundaries and on the final
//! report. No frame is ever reported twice; a stage transition that has not
//! advanced the frame relabels silently and the next emission carries the
//! new stage. Each emission also persists progress to the state store and
//! heartbeats the queue lease so a long render is never mistaken for a dead
//! worker.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use crate::kernel::jobs::events::RenderEvent;
use crate::kernel::jobs::job::Stage;
use crate::kernel::jobs::queue::TierQueues;
use crate::kernel::jobs::store::JobStore;
use crate::kernel::stream_hub::{job_topic, StreamHub};

/// Frame reports are emitted on every `FRAME_STRIDE`-th frame.
pub const FRAME_STRIDE: u32 = 5;
/// Minimum spacing between throttled emissions.
pub const MIN_EMIT_INTERVAL: Duration = Duration::from_secs(2);

struct ReporterState {
    stage: Stage,
    last_frame: Option<u32>,
    last_emit: Option<Instant>,
}

pub struct ProgressReporter {
    job_id: Uuid,
    total_frames: u32,
    hub: StreamHub,
    store: Arc<dyn JobStore>,
    queues: Arc<TierQueues>,
    state: Mutex<ReporterState>,
}

impl ProgressReporter {
    pub fn new(
        job_id: Uuid,
        total_frames: u32,
        hub: StreamHub,
        store: Arc<dyn JobStore>,
        queues: Arc<TierQueues>,
    ) -> Self {
        Self {
            job_id,
            total_frames,
            hub,
            store,
            queues,
            state: Mutex::new(ReporterState {
                stage: Stage::Fetching,
                last_frame: None,
                last_emit: None,
            }),
        }
    }

    fn percentage(&self, frame: u32) -> u8 {
        if self.total_frames == 0 {
            return 0;
        }
        ((frame as u64 * 100) / self.total_frames.max(1) as u64).min(100) as u8
    }

    /// Stage boundary: bypasses the throttle like `force_report`, and like
    /// it never repeats a frame. A transition that has not advanced the
    /// frame relabels the stage silently; the next emission carries it.
    pub async fn enter_stage(&self, stage: Stage) {
        let mut state = self.state.lock().await;
        state.stage = stage;
        let frame = state.last_frame.unwrap_or(0);
        if let Some(last) = state.last_frame {
            if frame <= last {
                return;
            }
        }
        self.emit(&mut state, frame).await;
    }

    /// Throttled per-frame report from the renderer. Emits on every fifth
    /// frame, at most once per two seconds, and never repeats a frame.
    pub async fn frame(&self, frame: u32) {
        let mut state = self.state.lock().await;
        if frame % FRAME_STRIDE != 0 {
            return;
        }
        if let Some(last) = state.last_frame {
            if frame <= last {
                return;
            }
        }
        if let Some(at) = state.last_emit {
            if at.elapsed() < MIN_EMIT_INTERVAL {
                return;
            }
        }
        self.emit(&mut state, frame).await;
    }

    /// Bypass the throttle; used at completion. Still refuses to move
    /// backwards.
    pub async fn force_report(&self, frame: u32) {
        let mut state = self.state.lock().await;
        if let Some(last) = state.last_frame {
            if frame <= last {
                return;
            }
        }
        self.emit(&mut state, frame).await;
    }

    /// Final report: all frames done.
    pub async fn finish(&self) {
        self.force_report(self.total_frames).await;
    }

    async fn emit(&self, state: &mut ReporterState, frame: u32) {
        let percentage = self.percentage(frame);

        if let Err(e) = self
            .store
            .update_progress(self.job_id, frame, self.total_frames)
            .await
        {
            debug!(job_id = %self.job_id, error = %e, "progress write skipped");
        }
        self.queues.touch(self.job_id).await;

        self.hub
            .publish(
                &job_topic(self.job_id),
                RenderEvent::Progress {
                    job_id: self.job_id,
                    current_frame: frame,
                    total_frames: self.total_frames,
                    percentage,
                    stage: state.stage,
                }
                .as_json(),
            )
            .await;

        state.last_frame = Some(frame);
        state.last_emit = Some(Instant::now());
    }
}
