//! Kudos cost estimation and affordability gating.
//!
//! Pure functions over a [`GenerationRequest`] snapshot so the estimate can
//! be recomputed on every parameter change without touching the network.

use crate::request::{GenerationRequest, GeneratorType};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Per-step base cost.
const STEP_COST: f64 = 0.1232;
/// Extra cost multiplier applied at the reference resolution.
const PIXEL_STEP_MULTIPLIER: f64 = 8.75;
/// Exponent of the resolution cost curve.
const PIXEL_EXPONENT: f64 = 1.75;
/// Smallest billable area (64×64).
const MIN_PIXELS: f64 = 64.0 * 64.0;
/// Reference area (1024×1024) at which the resolution factor equals 1.
const REFERENCE_PIXELS: f64 = 1024.0 * 1024.0;

/// Surcharge per selected post-processor.
const POST_PROCESSOR_SURCHARGE: f64 = 1.2;
/// Surcharge for ControlNet generation.
const CONTROLNET_SURCHARGE: f64 = 3.0;

/// Sampler whose step count is fixed by the service.
const ADAPTIVE_SAMPLER: &str = "k_dpm_adaptive";
/// Steps billed for the adaptive sampler.
const ADAPTIVE_SAMPLER_STEPS: f64 = 50.0;
/// Second-order samplers that evaluate the model twice per step.
const DOUBLE_STEP_SAMPLERS: &[&str] = &["k_heun", "k_dpm_2", "k_dpm_2_a", "k_dpmpp_2s_a"];
/// Denoising strength assumed when none is set.
const DEFAULT_DENOISE: f64 = 0.8;

/// Largest area generated without spending kudos.
const FREE_MAX_PIXELS: u64 = 1024 * 1024;
/// Largest effective step count generated without spending kudos.
const FREE_MAX_STEPS: u32 = 50;

// ---------------------------------------------------------------------------
// Estimation
// ---------------------------------------------------------------------------

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Steps the service will bill for.
///
/// The adaptive sampler is fixed at 50; second-order samplers count double;
/// img2img with a source image is scaled by the denoising strength.
pub fn effective_steps(request: &GenerationRequest) -> f64 {
    let params = &request.params;
    if params.sampler_name == ADAPTIVE_SAMPLER {
        return ADAPTIVE_SAMPLER_STEPS;
    }
    let mut steps = params.steps as f64;
    if DOUBLE_STEP_SAMPLERS.contains(&params.sampler_name.as_str()) {
        steps *= 2.0;
    }
    if request.is_img2img_with_source() {
        let denoise = if params.denoising_strength > 0.0 {
            params.denoising_strength
        } else {
            DEFAULT_DENOISE
        };
        steps *= denoise;
    }
    steps
}

/// Resolution cost factor: 0 at 64×64, 1 at 1024×1024.
pub fn pixel_factor(width: u32, height: u32) -> f64 {
    let area = (width as f64 * height as f64 - MIN_PIXELS).max(0.0);
    area.powf(PIXEL_EXPONENT) / (REFERENCE_PIXELS - MIN_PIXELS).powf(PIXEL_EXPONENT)
}

/// Cost of one job with the request's parameters.
pub fn job_cost(request: &GenerationRequest) -> f64 {
    let steps = effective_steps(request);
    let factor = pixel_factor(request.params.width, request.params.height);
    let mut kudos = round2(STEP_COST * steps + factor * (STEP_COST * steps * PIXEL_STEP_MULTIPLIER));
    for _ in &request.params.post_processing {
        kudos = round2(kudos * POST_PROCESSOR_SURCHARGE);
    }
    if request.generator_type == GeneratorType::ControlNet {
        kudos = round2(kudos * CONTROLNET_SURCHARGE);
    }
    kudos
}

/// Cost of the whole batch. A zero job count is billed as one job.
pub fn estimate_kudos(request: &GenerationRequest, total_jobs: usize) -> f64 {
    job_cost(request) * total_jobs.max(1) as f64
}

/// Whether the request may be submitted.
///
/// Requests that stay within the free limits can always be submitted;
/// larger ones require a balance above the estimated cost.
pub fn can_generate(request: &GenerationRequest, balance: f64, cost: f64) -> bool {
    let affordable = balance > cost;
    let params = &request.params;
    let larger_dimensions = params.width as u64 * params.height as u64 > FREE_MAX_PIXELS;
    let doubled = params.sampler_name.contains("dpm_2") || params.sampler_name.contains("k_heun");
    let larger_steps = params.steps * if doubled { 2 } else { 1 } > FREE_MAX_STEPS;
    affordable || (!larger_dimensions && !larger_steps)
}
