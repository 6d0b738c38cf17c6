use std::time::Duration;

use horde_core::error::CoreError;

use crate::engine::EngineSettings;

/// Upstream model reference document.
pub const DEFAULT_MODELS_DB_URL: &str =
    "https://raw.githubusercontent.com/Haidra-Org/AI-Horde-image-model-reference/main/stable_diffusion.json";

/// Client configuration loaded from environment variables.
///
/// All fields have defaults that talk to the public Horde anonymously.
#[derive(Debug, Clone, PartialEq)]
pub struct HordeConfig {
    /// Image service root (default: `https://stablehorde.net`).
    pub base_url: String,
    /// Account key; the anonymous key when unset.
    pub api_key: String,
    /// Video service root (default: `http://localhost:7860`).
    pub video_base_url: String,
    /// Model metadata document.
    pub models_db_url: String,
    /// Delay after each polled entry.
    pub poll_interval: Duration,
    /// Images allowed in flight at once.
    pub max_parallel_images: usize,
    /// Requests allowed in flight at once.
    pub max_parallel_requests: usize,
    /// Deadline for every HTTP request.
    pub request_timeout: Duration,
}

impl Default for HordeConfig {
    fn default() -> Self {
        Self {
            base_url: "https://stablehorde.net".into(),
            api_key: horde_api::api::ANONYMOUS_API_KEY.into(),
            video_base_url: "http://localhost:7860".into(),
            models_db_url: DEFAULT_MODELS_DB_URL.into(),
            poll_interval: Duration::from_millis(500),
            max_parallel_images: 100,
            max_parallel_requests: 10,
            request_timeout: Duration::from_secs(60),
        }
    }
}

impl HordeConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                       | Default                   |
    /// |-------------------------------|---------------------------|
    /// | `HORDE_BASE_URL`              | `https://stablehorde.net` |
    /// | `HORDE_API_KEY`               | `0000000000`              |
    /// | `HORDE_VIDEO_BASE_URL`        | `http://localhost:7860`   |
    /// | `HORDE_MODELS_DB_URL`         | model reference on GitHub |
    /// | `HORDE_POLL_INTERVAL_MS`      | `500`                     |
    /// | `HORDE_MAX_PARALLEL_IMAGES`   | `100`                     |
    /// | `HORDE_MAX_PARALLEL_REQUESTS` | `10`                      |
    /// | `HORDE_REQUEST_TIMEOUT_SECS`  | `60`                      |
    pub fn from_env() -> Result<Self, CoreError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`HordeConfig::from_env`] with a custom variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, CoreError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let string = |key: &str, default: String| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or(default)
        };

        let poll_interval_ms = parse_number(&lookup, "HORDE_POLL_INTERVAL_MS", 500)?;
        let max_parallel_images =
            parse_number(&lookup, "HORDE_MAX_PARALLEL_IMAGES", defaults.max_parallel_images as u64)?;
        let max_parallel_requests = parse_number(
            &lookup,
            "HORDE_MAX_PARALLEL_REQUESTS",
            defaults.max_parallel_requests as u64,
        )?;
        let request_timeout_secs = parse_number(&lookup, "HORDE_REQUEST_TIMEOUT_SECS", 60)?;

        if max_parallel_images == 0 || max_parallel_requests == 0 {
            return Err(CoreError::Config(
                "parallel image and request limits must be at least 1".into(),
            ));
        }

        Ok(Self {
            base_url: string("HORDE_BASE_URL", defaults.base_url),
            api_key: string("HORDE_API_KEY", defaults.api_key),
            video_base_url: string("HORDE_VIDEO_BASE_URL", defaults.video_base_url),
            models_db_url: string("HORDE_MODELS_DB_URL", defaults.models_db_url),
            poll_interval: Duration::from_millis(poll_interval_ms),
            max_parallel_images: max_parallel_images as usize,
            max_parallel_requests: max_parallel_requests as usize,
            request_timeout: Duration::from_secs(request_timeout_secs),
        })
    }

    /// Loop settings for [`crate::engine::BatchEngine`].
    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            poll_delay: self.poll_interval,
            max_parallel_images: self.max_parallel_images,
            max_parallel_requests: self.max_parallel_requests,
            anonymous: self.api_key == horde_api::api::ANONYMOUS_API_KEY,
            ..Default::default()
        }
    }
}

fn parse_number<F>(lookup: &F, key: &str, default: u64) -> Result<u64, CoreError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|_| CoreError::Validation(format!("{key} must be a non-negative integer, got {raw:?}"))),
        _ => Ok(default),
    }
}
