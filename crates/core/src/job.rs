//! Immutable unit of submission.
//!
//! A [`JobSpec`] freezes every parameter of one remote job at planning
//! time. [`JobSpec::payload`] renders the body of `POST /generate/async`.

use serde::{Deserialize, Serialize};

use crate::request::{ControlType, PostProcessor, SourceProcessing};

/// Parameters frozen into a single job. `n` is always 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobParams {
    pub sampler_name: String,
    pub width: u32,
    pub height: u32,
    pub steps: u32,
    pub cfg_scale: f64,
    pub clip_skip: u32,
    pub denoising_strength: f64,
    pub seed: String,
    pub seed_variation: u32,
    pub karras: bool,
    pub tiling: bool,
    pub hires_fix: bool,
    pub post_processing: Vec<PostProcessor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub control_type: Option<ControlType>,
    pub n: u32,
}

impl JobParams {
    /// Output dimensions after post-processing upscalers are applied.
    pub fn output_dimensions(&self) -> (u32, u32) {
        let factor = self
            .post_processing
            .iter()
            .map(|p| p.upscale_factor())
            .max()
            .unwrap_or(1);
        (self.width * factor, self.height * factor)
    }
}

/// Source image attached to a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSource {
    pub image: String,
    pub mask: Option<String>,
    pub processing: SourceProcessing,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    pub prompt: String,
    pub model: String,
    pub params: JobParams,
    pub nsfw: bool,
    pub censor_nsfw: bool,
    pub trusted_workers: bool,
    pub shared: bool,
    pub workers: Vec<String>,
    pub source: Option<JobSource>,
}

/// Wire shape of an async generation request.
#[derive(Debug, Serialize)]
pub struct GenerationPayload<'a> {
    pub prompt: &'a str,
    pub params: &'a JobParams,
    pub nsfw: bool,
    pub censor_nsfw: bool,
    pub trusted_workers: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_image: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_mask: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_processing: Option<SourceProcessing>,
    #[serde(skip_serializing_if = "no_workers")]
    pub workers: &'a [String],
    pub models: [&'a str; 1],
    pub r2: bool,
    pub shared: bool,
}

fn no_workers(workers: &&[String]) -> bool {
    workers.is_empty()
}

impl JobSpec {
    /// Number of images this job asks the service for.
    pub fn image_count(&self) -> usize {
        self.params.n.max(1) as usize
    }

    pub fn payload(&self) -> GenerationPayload<'_> {
        GenerationPayload {
            prompt: &self.prompt,
            params: &self.params,
            nsfw: self.nsfw,
            censor_nsfw: self.censor_nsfw,
            trusted_workers: self.trusted_workers,
            source_image: self.source.as_ref().map(|s| s.image.as_str()),
            source_mask: self.source.as_ref().and_then(|s| s.mask.as_deref()),
            source_processing: self.source.as_ref().map(|s| s.processing),
            workers: &self.workers,
            models: [self.model.as_str()],
            r2: true,
            shared: self.shared,
        }
    }
}
