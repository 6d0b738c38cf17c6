//! Finished image records handed to the output store.

use serde::{Deserialize, Serialize};

use crate::job::JobSpec;
use crate::request::PostProcessor;
use crate::status::Generation;

/// Everything kept about one finished image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    /// Remote job that produced the image.
    pub job_id: String,
    /// Service-side image id.
    pub horde_image_id: String,
    /// Image URL or base64 payload as returned by the service.
    pub image: String,
    pub prompt: String,
    pub model_name: String,
    pub worker_id: String,
    pub worker_name: String,
    pub seed: String,
    pub steps: u32,
    pub sampler_name: String,
    /// Output width, including any upscaler.
    pub width: u32,
    /// Output height, including any upscaler.
    pub height: u32,
    pub cfg_scale: f64,
    pub clip_skip: u32,
    pub karras: bool,
    pub hires_fix: bool,
    pub tiling: bool,
    pub post_processing: Vec<PostProcessor>,
    pub censored: bool,
    pub shared_externally: bool,
}

impl ImageRecord {
    pub fn from_generation(job: &JobSpec, job_id: &str, generation: &Generation) -> Self {
        let (width, height) = job.params.output_dimensions();
        let model_name = if generation.model.is_empty() {
            job.model.clone()
        } else {
            generation.model.clone()
        };
        Self {
            job_id: job_id.to_string(),
            horde_image_id: generation.id.clone(),
            image: generation.img.clone(),
            prompt: job.prompt.clone(),
            model_name,
            worker_id: generation.worker_id.clone(),
            worker_name: generation.worker_name.clone(),
            seed: generation.seed.clone(),
            steps: job.params.steps,
            sampler_name: job.params.sampler_name.clone(),
            width,
            height,
            cfg_scale: job.params.cfg_scale,
            clip_skip: job.params.clip_skip,
            karras: job.params.karras,
            hires_fix: job.params.hires_fix,
            tiling: job.params.tiling,
            post_processing: job.params.post_processing.clone(),
            censored: generation.censored,
            shared_externally: job.shared,
        }
    }
}
