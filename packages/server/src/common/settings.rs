//! Render settings shared between the kernel and domain layers.
//!
//! These types sit in `common` so the job model (kernel) and the render
//! pipeline (domains) can share them without a circular dependency.

use serde::{Deserialize, Serialize};

use super::error::{DomainError, DomainResult};

pub const MAX_WIDTH: u32 = 3840;
pub const MAX_HEIGHT: u32 = 2160;
pub const MAX_FPS: u32 = 120;
pub const MAX_DURATION_FRAMES: u32 = 108_000;

/// Output container format requested by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Mp4,
    Webm,
    Gif,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Mp4 => "mp4",
            OutputFormat::Webm => "webm",
            OutputFormat::Gif => "gif",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            OutputFormat::Mp4 => "video/mp4",
            OutputFormat::Webm => "video/webm",
            OutputFormat::Gif => "image/gif",
        }
    }

    /// Codec handed to the renderer for this container.
    pub fn codec(&self) -> &'static str {
        match self {
            OutputFormat::Mp4 => "h264",
            OutputFormat::Webm => "vp9",
            OutputFormat::Gif => "gif",
        }
    }
}

/// Validated dimensions and timing for a render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderSettings {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub duration_frames: u32,
    #[serde(default)]
    pub format: OutputFormat,
}

impl RenderSettings {
    /// Boundary validation; rejects out-of-range values.
    pub fn validate(&self) -> DomainResult<()> {
        if self.width == 0 || self.width > MAX_WIDTH {
            return Err(DomainError::Validation(format!(
                "width must be between 1 and {MAX_WIDTH}"
            )));
        }
        if self.height == 0 || self.height > MAX_HEIGHT {
            return Err(DomainError::Validation(format!(
                "height must be between 1 and {MAX_HEIGHT}"
            )));
        }
        if self.fps == 0 || self.fps > MAX_FPS {
            return Err(DomainError::Validation(format!(
                "fps must be between 1 and {MAX_FPS}"
            )));
        }
        if self.duration_frames == 0 || self.duration_frames > MAX_DURATION_FRAMES {
            return Err(DomainError::Validation(format!(
                "duration_frames must be between 1 and {MAX_DURATION_FRAMES}"
            )));
        }
        Ok(())
    }

    /// Duration in whole seconds, rounded up.
    pub fn duration_secs(&self) -> u32 {
        self.duration_frames.div_ceil(self.fps.max(1))
    }
}
