//! Wire events published to subscribed clients.
//!
//! These are facts about the job lifecycle, not commands. Delivery through
//! the stream hub is best-effort; the job snapshot endpoint stays the source
//! of truth.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::job::{RenderErrorKind, Stage};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RenderEvent {
    /// A worker picked the job up.
    Started {
        job_id: Uuid,
        started_at: DateTime<Utc>,
    },

    /// Throttled render progress.
    Progress {
        job_id: Uuid,
        current_frame: u32,
        total_frames: u32,
        percentage: u8,
        stage: Stage,
    },

    /// The output is uploaded and the job is done.
    Completed {
        job_id: Uuid,
        output_url: String,
        file_size: u64,
        duration_ms: u64,
        completed_at: DateTime<Utc>,
    },

    /// The job failed terminally (retries exhausted or non-retryable).
    Failed {
        job_id: Uuid,
        error_kind: RenderErrorKind,
        error_detail: String,
        completed_at: DateTime<Utc>,
    },

    Cancelled {
        job_id: Uuid,
    },

    /// Balance change for the owner; published to the credits topic, not a
    /// job room.
    CreditsUpdated {
        balance: i64,
    },
}

impl RenderEvent {
    pub fn as_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn started_event_wire_shape() {
        let event = RenderEvent::Started {
            job_id: Uuid::nil(),
            started_at: Utc::now(),
        };
        let json = event.as_json();
        assert_eq!(json["type"], "started");
        assert!(json["started_at"].is_string());
    }

    #[test]
    fn progress_event_wire_shape() {
        let event = RenderEvent::Progress {
            job_id: Uuid::nil(),
            current_frame: 45,
            total_frames: 900,
            percentage: 5,
            stage: Stage::Rendering,
        };
        let json = event.as_json();
        assert_eq!(json["type"], "progress");
        assert_eq!(json["stage"], "rendering");
        assert_eq!(json["percentage"], 5);
    }

    #[test]
    fn failed_event_carries_screaming_kind() {
        let event = RenderEvent::Failed {
            job_id: Uuid::nil(),
            error_kind: RenderErrorKind::RenderError,
            error_detail: "renderer exited with status 1".to_string(),
            completed_at: Utc::now(),
        };
        let json = event.as_json();
        assert_eq!(json["error_kind"], "RENDER_ERROR");
    }

    #[test]
    fn events_roundtrip() {
        let events = vec![
            RenderEvent::Started {
                job_id: Uuid::new_v4(),
                started_at: Utc::now(),
            },
            RenderEvent::Completed {
                job_id: Uuid::new_v4(),
                output_url: "https://cdn.example.com/out.mp4".to_string(),
                file_size: 1024,
                duration_ms: 15_000,
                completed_at: Utc::now(),
            },
            RenderEvent::Cancelled {
                job_id: Uuid::new_v4(),
            },
            RenderEvent::CreditsUpdated { balance: 42 },
        ];
        for event in events {
            let json = serde_json::to_string(&event).unwrap();
            let back: RenderEvent = serde_json::from_str(&json).unwrap();
            assert_eq!(back, event);
        }
    }
}
