//! Video job model.
//!
//! A video job is a single remote job: one request, one id, one result.
//! Its status moves through frame generation, interpolation and encoding
//! before reaching `done` or `faulted`.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoRequest {
    /// Keyframe prompts, one per segment.
    pub prompts: Vec<String>,
    pub steps: u32,
    pub width: u32,
    pub height: u32,
    /// Requested length in seconds.
    pub desired_duration: u32,
    pub fps: u32,
    pub cfg: f64,
}

impl Default for VideoRequest {
    fn default() -> Self {
        Self {
            prompts: vec!["Castle".to_string()],
            steps: 30,
            width: 512,
            height: 512,
            desired_duration: 5,
            fps: 10,
            cfg: 7.0,
        }
    }
}

/// Inclusive bounds for video parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoLimits {
    pub fps: (u32, u32),
    pub duration: (u32, u32),
    pub dimension: (u32, u32),
    pub cfg: (f64, f64),
    pub steps: (u32, u32),
}

pub const VIDEO_LIMITS: VideoLimits = VideoLimits {
    fps: (1, 30),
    duration: (1, 5),
    dimension: (64, 1024),
    cfg: (1.0, 50.0),
    steps: (1, 30),
};

fn check<T>(name: &str, value: T, (min, max): (T, T)) -> Result<(), CoreError>
where
    T: PartialOrd + std::fmt::Display,
{
    if value < min || value > max {
        return Err(CoreError::Validation(format!(
            "{name} must be between {min} and {max} (got {value})"
        )));
    }
    Ok(())
}

impl VideoRequest {
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.prompts.iter().all(|p| p.trim().is_empty()) {
            return Err(CoreError::Validation("at least one prompt is required".into()));
        }
        let limits = VIDEO_LIMITS;
        check("fps", self.fps, limits.fps)?;
        check("desired_duration", self.desired_duration, limits.duration)?;
        check("width", self.width, limits.dimension)?;
        check("height", self.height, limits.dimension)?;
        check("cfg", self.cfg, limits.cfg)?;
        check("steps", self.steps, limits.steps)?;
        Ok(())
    }

    /// Frames the service renders before interpolation.
    pub fn frame_count(&self) -> u32 {
        self.fps * self.desired_duration
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Video job status, tagged by `state` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum VideoStatus {
    Queued {
        #[serde(default)]
        queue_position: u32,
    },
    RawFrames {
        frames_done: u32,
        frames_total: u32,
    },
    Interpolating {
        frames_done: u32,
        frames_total: u32,
    },
    Encoding {
        /// Fraction in `0.0..=1.0`.
        #[serde(default)]
        progress: f64,
    },
    Done {
        video_url: String,
    },
    Faulted {
        #[serde(default)]
        message: String,
    },
}

impl VideoStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Faulted { .. })
    }

    /// Overall progress in percent. Frame generation covers the first
    /// 60%, interpolation the next 30%, encoding the rest.
    pub fn progress_percent(&self) -> f64 {
        fn ratio(done: u32, total: u32) -> f64 {
            if total == 0 {
                0.0
            } else {
                (done as f64 / total as f64).min(1.0)
            }
        }
        match self {
            Self::Queued { .. } => 0.0,
            Self::RawFrames {
                frames_done,
                frames_total,
            } => 60.0 * ratio(*frames_done, *frames_total),
            Self::Interpolating {
                frames_done,
                frames_total,
            } => 60.0 + 30.0 * ratio(*frames_done, *frames_total),
            Self::Encoding { progress } => 90.0 + 10.0 * progress.clamp(0.0, 1.0),
            Self::Done { .. } => 100.0,
            Self::Faulted { .. } => 0.0,
        }
    }
}
