//! Batch planning: one [`GenerationRequest`] in, an ordered list of
//! immutable [`JobSpec`]s out.
//!
//! The batch is spread round-robin over the expanded prompts, the selected
//! models and the selected control types (`list[i % len]`), then each
//! combination is repeated `n` times with a seed from a per-batch seed
//! list. The same `n` seeds are reused by every combination so that
//! seed-aligned images can be compared across prompts and models.

use rand::Rng;

use crate::job::{JobParams, JobSource, JobSpec};
use crate::models::{ModelGroup, ALL_MODELS, RANDOM_MODEL};
use crate::prompt_matrix::expand;
use crate::request::{
    strip_data_url, ControlType, GenerationRequest, GeneratorType, NsfwMode,
    FIXED_SEED_VARIATION, RANDOM_SEED_VARIATION,
};
use crate::seed::SeedGenerator;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Model-name fragment identifying the alternate backend.
const ALT_BACKEND_MODEL_MARKER: &str = "stable_diffusion_2.0";
/// Sampler the alternate backend requires.
const ALT_BACKEND_SAMPLER: &str = "dpmsolver";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// User input problems detected before anything is submitted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlanError {
    #[error("Failed to generate: No prompt submitted.")]
    EmptyPrompt,

    #[error("Failed to generate: No model selected.")]
    NoModelSelected,

    #[error("Failed to generate: No control type selected.")]
    NoControlTypeSelected,

    #[error("Failed to generate: No models are currently available.")]
    NoModelsAvailable,
}

// ---------------------------------------------------------------------------
// Plan
// ---------------------------------------------------------------------------

/// Result of planning a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchPlan {
    /// Expanded prompts, in expansion order.
    pub prompts: Vec<String>,
    /// Candidate models the batch cycles through.
    pub models: Vec<String>,
    /// The `n` seeds shared by every prompt/model/control combination.
    pub seeds: Vec<u64>,
    pub jobs: Vec<JobSpec>,
}

impl BatchPlan {
    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }
}

/// Every served model across `real_groups`, in group order.
pub fn all_real_models(real_groups: &[ModelGroup]) -> Vec<String> {
    real_groups
        .iter()
        .flat_map(|g| g.options.iter().map(|o| o.value.clone()))
        .collect()
}

/// How many model variants the batch spreads over.
fn model_factor(request: &GenerationRequest, real_groups: &[ModelGroup]) -> usize {
    if request.multi_model {
        request.selected_models.len()
    } else if request.selected_model == ALL_MODELS {
        all_real_models(real_groups).len()
    } else {
        1
    }
}

/// Whether the batch cycles through several control types.
///
/// The list multiplies the job count for every generator type; only
/// ControlNet jobs carry the control type on the wire.
fn uses_control_list(request: &GenerationRequest) -> bool {
    request.multi_control_type
}

fn control_factor(request: &GenerationRequest) -> usize {
    if uses_control_list(request) {
        request.selected_control_types.len()
    } else {
        1
    }
}

/// Total number of jobs the request expands to:
/// `prompts × models × control types × n`.
pub fn total_job_count(request: &GenerationRequest, real_groups: &[ModelGroup]) -> usize {
    expand(&request.full_prompt()).len()
        * model_factor(request, real_groups)
        * control_factor(request)
        * request.params.images_per_request()
}

/// Reject requests that cannot produce a batch.
pub fn validate_request(request: &GenerationRequest) -> Result<(), PlanError> {
    if request.prompt.trim().is_empty() {
        return Err(PlanError::EmptyPrompt);
    }
    if request.multi_model && request.selected_models.is_empty() {
        return Err(PlanError::NoModelSelected);
    }
    if uses_control_list(request) && request.selected_control_types.is_empty() {
        return Err(PlanError::NoControlTypeSelected);
    }
    Ok(())
}

/// Resolve the candidate model list, sampling `Random!` once.
fn candidate_models<R: Rng + ?Sized>(
    request: &GenerationRequest,
    real_groups: &[ModelGroup],
    rng: &mut R,
) -> Result<Vec<String>, PlanError> {
    if request.multi_model {
        return Ok(request.selected_models.clone());
    }
    match request.selected_model.as_str() {
        RANDOM_MODEL => {
            let groups: Vec<&ModelGroup> =
                real_groups.iter().filter(|g| !g.options.is_empty()).collect();
            if groups.is_empty() {
                return Err(PlanError::NoModelsAvailable);
            }
            let group = groups[rng.random_range(0..groups.len())];
            let option = &group.options[rng.random_range(0..group.options.len())];
            Ok(vec![option.value.clone()])
        }
        ALL_MODELS => {
            let models = all_real_models(real_groups);
            if models.is_empty() {
                return Err(PlanError::NoModelsAvailable);
            }
            Ok(models)
        }
        "" => Err(PlanError::NoModelSelected),
        selected => Ok(vec![selected.to_string()]),
    }
}

/// Draw the per-batch seed list.
///
/// Slot 0 takes the user seed when it is numeric and non-zero; every
/// other slot is drawn from `seeds`.
pub fn plan_seeds(request: &GenerationRequest, seeds: &mut SeedGenerator) -> Vec<u64> {
    let explicit = request.params.explicit_seed();
    (0..request.params.images_per_request())
        .map(|index| match (index, explicit) {
            (0, Some(seed)) => seed,
            _ => u64::from(seeds.next_u32()),
        })
        .collect()
}

/// Expand `request` into an ordered list of jobs.
///
/// `real_groups` are the selectable model groups without the meta group;
/// they resolve `Random!` and `All Models!`. The caller re-seeds `seeds`
/// before each batch.
pub fn plan_batch<R: Rng + ?Sized>(
    request: &GenerationRequest,
    real_groups: &[ModelGroup],
    seeds: &mut SeedGenerator,
    rng: &mut R,
) -> Result<BatchPlan, PlanError> {
    validate_request(request)?;

    let prompts = expand(&request.full_prompt());
    let models = candidate_models(request, real_groups, rng)?;
    let controlnet = request.generator_type == GeneratorType::ControlNet;
    let control_types: Vec<Option<ControlType>> = if uses_control_list(request) {
        request
            .selected_control_types
            .iter()
            .map(|&control_type| controlnet.then_some(control_type))
            .collect()
    } else if controlnet {
        vec![Some(request.params.control_type)]
    } else {
        vec![None]
    };

    let n = request.params.images_per_request();
    let request_count = prompts.len() * models.len() * control_factor(request);
    let planned_seeds = plan_seeds(request, seeds);
    let seed_variation = if request.params.explicit_seed().is_some() {
        FIXED_SEED_VARIATION
    } else {
        RANDOM_SEED_VARIATION
    };

    let source = match (request.source.as_ref(), request.generator_type.source_processing()) {
        (Some(source), Some(processing)) => Some(JobSource {
            image: strip_data_url(&source.image).to_string(),
            mask: source.mask.clone(),
            processing,
        }),
        _ => None,
    };

    let mut jobs = Vec::with_capacity(request_count * n);
    for i in 0..request_count {
        let model = &models[i % models.len()];
        let control_type = control_types[i % control_types.len()];
        let prompt = &prompts[i % prompts.len()];
        let sampler_name = if model.contains(ALT_BACKEND_MODEL_MARKER) {
            ALT_BACKEND_SAMPLER.to_string()
        } else {
            request.params.sampler_name.clone()
        };

        for seed in &planned_seeds {
            let params = &request.params;
            jobs.push(JobSpec {
                prompt: prompt.clone(),
                model: model.clone(),
                params: JobParams {
                    sampler_name: sampler_name.clone(),
                    width: params.width,
                    height: params.height,
                    steps: params.steps,
                    cfg_scale: params.cfg_scale,
                    clip_skip: params.clip_skip,
                    denoising_strength: params.denoising_strength,
                    seed: seed.to_string(),
                    seed_variation,
                    karras: params.karras,
                    tiling: params.tiling,
                    hires_fix: params.hires_fix,
                    post_processing: params.post_processing.clone(),
                    control_type,
                    n: 1,
                },
                nsfw: request.nsfw == NsfwMode::Enabled,
                censor_nsfw: request.nsfw == NsfwMode::Censored,
                trusted_workers: request.trusted_only,
                shared: request.share,
                workers: request.workers.clone(),
                source: source.clone(),
            });
        }
    }

    Ok(BatchPlan {
        prompts,
        models,
        seeds: planned_seeds,
        jobs,
    })
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;
    use crate::models::fixtures::catalog;
    use crate::request::{GenerationParams, SourceImage};

    fn request(prompt: &str, n: u32) -> GenerationRequest {
        GenerationRequest {
            prompt: prompt.to_string(),
            params: GenerationParams {
                n,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn plan(request: &GenerationRequest) -> Result<BatchPlan, PlanError> {
        let groups = catalog().real_groups(request.generator_type);
        let mut seeds = SeedGenerator::with_seed(99);
        let mut rng = StdRng::seed_from_u64(7);
        plan_batch(request, &groups, &mut seeds, &mut rng)
    }

    // -- Job counts --

    #[test]
    fn two_prompts_three_images_reuse_seed_group() {
        let plan = plan(&request("a {cat|dog}", 3)).unwrap();
        assert_eq!(plan.job_count(), 6);

        let seeds: Vec<&str> = plan.jobs.iter().map(|j| j.params.seed.as_str()).collect();
        assert_eq!(seeds[0..3], seeds[3..6]);
        assert!(plan.jobs[0..3].iter().all(|j| j.prompt == "a cat"));
        assert!(plan.jobs[3..6].iter().all(|j| j.prompt == "a dog"));
    }

    #[test]
    fn job_count_matches_total_job_count() {
        let mut req = request("{a|b|c}", 2);
        req.multi_model = true;
        req.selected_models = vec!["m1".into(), "m2".into()];
        let groups = catalog().real_groups(req.generator_type);
        assert_eq!(total_job_count(&req, &groups), 12);
        assert_eq!(plan(&req).unwrap().job_count(), 12);
    }

    #[test]
    fn every_job_has_single_image() {
        let plan = plan(&request("x", 4)).unwrap();
        assert!(plan.jobs.iter().all(|j| j.params.n == 1));
    }

    // -- Round-robin distribution --

    #[test]
    fn round_robin_over_prompts_and_models() {
        let mut req = request("{a|b}", 1);
        req.multi_model = true;
        req.selected_models = vec!["m1".into(), "m2".into(), "m3".into()];
        let plan = plan(&req).unwrap();
        assert_eq!(plan.job_count(), 6);
        let pairs: Vec<(&str, &str)> = plan
            .jobs
            .iter()
            .map(|j| (j.prompt.as_str(), j.model.as_str()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("a", "m1"),
                ("b", "m2"),
                ("a", "m3"),
                ("b", "m1"),
                ("a", "m2"),
                ("b", "m3"),
            ]
        );
    }

    #[test]
    fn control_types_cycle_for_controlnet() {
        let mut req = request("x", 1);
        req.generator_type = GeneratorType::ControlNet;
        req.multi_control_type = true;
        req.selected_control_types = vec![ControlType::Canny, ControlType::Depth];
        let plan = plan(&req).unwrap();
        let types: Vec<Option<ControlType>> =
            plan.jobs.iter().map(|j| j.params.control_type).collect();
        assert_eq!(types, vec![Some(ControlType::Canny), Some(ControlType::Depth)]);
    }

    #[test]
    fn control_list_multiplies_image_conditioned_batches() {
        let mut req = request("x", 1);
        req.generator_type = GeneratorType::Img2Img;
        req.multi_control_type = true;
        req.selected_control_types = vec![ControlType::Canny, ControlType::Depth];
        let groups = catalog().real_groups(req.generator_type);
        assert_eq!(total_job_count(&req, &groups), 2);

        let plan = plan(&req).unwrap();
        assert_eq!(plan.job_count(), 2);
        assert!(plan.jobs.iter().all(|j| j.params.control_type.is_none()));
    }

    #[test]
    fn control_list_counts_for_text2img() {
        let mut req = request("{a|b}", 2);
        req.multi_control_type = true;
        req.selected_control_types = vec![ControlType::Canny, ControlType::Depth, ControlType::Hed];
        let groups = catalog().real_groups(req.generator_type);
        assert_eq!(total_job_count(&req, &groups), 12);
        assert_eq!(plan(&req).unwrap().job_count(), 12);
    }

    // -- Seeds --

    #[test]
    fn explicit_seed_used_for_first_slot_only() {
        let mut req = request("x", 3);
        req.params.seed = "1234".into();
        let plan = plan(&req).unwrap();
        assert_eq!(plan.seeds[0], 1234);
        assert_eq!(plan.jobs[0].params.seed, "1234");
        assert_eq!(plan.jobs[0].params.seed_variation, FIXED_SEED_VARIATION);
        assert_eq!(plan.seeds.len(), 3);
    }

    #[test]
    fn explicit_seed_beyond_u32_kept() {
        let mut req = request("x", 2);
        req.params.seed = "5000000000".into();
        let mut seeds = SeedGenerator::with_seed(1);
        assert_eq!(plan_seeds(&req, &mut seeds)[0], 5_000_000_000);

        let plan = plan(&req).unwrap();
        assert_eq!(plan.jobs[0].params.seed, "5000000000");
        assert_ne!(plan.jobs[1].params.seed, "5000000000");
    }

    #[test]
    fn random_seeds_use_wide_variation() {
        let plan = plan(&request("x", 2)).unwrap();
        assert!(plan
            .jobs
            .iter()
            .all(|j| j.params.seed_variation == RANDOM_SEED_VARIATION));
    }

    #[test]
    fn reseeding_reproduces_seeds() {
        let req = request("x", 4);
        let mut seeds = SeedGenerator::with_seed(5);
        let first = plan_seeds(&req, &mut seeds);
        seeds.seed(Some(5));
        assert_eq!(plan_seeds(&req, &mut seeds), first);
    }

    // -- Meta models --

    #[test]
    fn all_models_yields_one_group_per_model() {
        let mut req = request("x", 2);
        req.selected_model = ALL_MODELS.into();
        let plan = plan(&req).unwrap();
        assert_eq!(plan.models, vec!["anything", "stable_diffusion"]);
        assert_eq!(plan.job_count(), 4);
        assert!(!plan.jobs.iter().any(|j| j.model == ALL_MODELS));
    }

    #[test]
    fn random_model_sampled_once_per_batch() {
        let mut req = request("{a|b|c}", 2);
        req.selected_model = RANDOM_MODEL.into();
        let plan = plan(&req).unwrap();
        assert_eq!(plan.models.len(), 1);
        let model = &plan.models[0];
        assert!(plan.jobs.iter().all(|j| &j.model == model));
        assert_ne!(model, RANDOM_MODEL);
    }

    #[test]
    fn meta_models_need_real_models() {
        let mut req = request("x", 1);
        req.selected_model = RANDOM_MODEL.into();
        let mut seeds = SeedGenerator::with_seed(1);
        let mut rng = StdRng::seed_from_u64(1);
        assert_matches!(
            plan_batch(&req, &[], &mut seeds, &mut rng),
            Err(PlanError::NoModelsAvailable)
        );
    }

    #[test]
    fn alternate_backend_forces_sampler() {
        let mut req = request("x", 1);
        req.selected_model = "stable_diffusion_2.0".into();
        let plan = plan(&req).unwrap();
        assert_eq!(plan.jobs[0].params.sampler_name, ALT_BACKEND_SAMPLER);
    }

    // -- Snapshots --

    #[test]
    fn jobs_are_independent_of_later_request_edits() {
        let mut req = request("x", 1);
        let plan = plan(&req).unwrap();
        req.params.steps = 99;
        req.prompt = "changed".into();
        assert_eq!(plan.jobs[0].params.steps, 30);
        assert_eq!(plan.jobs[0].prompt, "x");
    }

    #[test]
    fn source_attached_for_image_generation() {
        let mut req = request("x", 1);
        req.generator_type = GeneratorType::Img2Img;
        req.source = Some(SourceImage {
            image: "data:image/webp;base64,AAAA".into(),
            mask: None,
        });
        let plan = plan(&req).unwrap();
        let source = plan.jobs[0].source.as_ref().unwrap();
        assert_eq!(source.image, "AAAA");
    }

    #[test]
    fn source_dropped_for_text2img() {
        let mut req = request("x", 1);
        req.source = Some(SourceImage {
            image: "AAAA".into(),
            mask: None,
        });
        assert!(plan(&req).unwrap().jobs[0].source.is_none());
    }

    #[test]
    fn nsfw_flags_follow_mode() {
        let mut req = request("x", 1);
        req.nsfw = NsfwMode::Censored;
        let job = &plan(&req).unwrap().jobs[0];
        assert!(!job.nsfw);
        assert!(job.censor_nsfw);
    }

    // -- Errors --

    #[test]
    fn empty_prompt_rejected() {
        assert_matches!(plan(&request("  ", 1)), Err(PlanError::EmptyPrompt));
    }

    #[test]
    fn empty_model_selection_rejected() {
        let mut req = request("x", 1);
        req.multi_model = true;
        req.selected_models.clear();
        assert_matches!(plan(&req), Err(PlanError::NoModelSelected));
    }

    #[test]
    fn empty_control_selection_rejected_for_img2img() {
        let mut req = request("x", 1);
        req.generator_type = GeneratorType::Img2Img;
        req.multi_control_type = true;
        req.selected_control_types.clear();
        assert_matches!(plan(&req), Err(PlanError::NoControlTypeSelected));
    }

    #[test]
    fn empty_control_selection_rejected() {
        let mut req = request("x", 1);
        req.generator_type = GeneratorType::ControlNet;
        req.multi_control_type = true;
        req.selected_control_types.clear();
        assert_matches!(plan(&req), Err(PlanError::NoControlTypeSelected));
    }

    #[test]
    fn plan_errors_have_distinct_messages() {
        let messages = [
            PlanError::EmptyPrompt.to_string(),
            PlanError::NoModelSelected.to_string(),
            PlanError::NoControlTypeSelected.to_string(),
            PlanError::NoModelsAvailable.to_string(),
        ];
        for (i, a) in messages.iter().enumerate() {
            for b in &messages[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }
}
