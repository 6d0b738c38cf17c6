//! Generation request model, parameter defaults, and parameter limits.
//!
//! [`GenerationRequest`] is the mutable user intent. It is turned into
//! immutable [`JobSpec`](crate::job::JobSpec)s by the
//! [`planner`](crate::planner) and is never referenced by a job afterwards.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::prompt_matrix::full_prompt;

// ---------------------------------------------------------------------------
// Enumerations
// ---------------------------------------------------------------------------

/// Which kind of generation the request performs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum GeneratorType {
    #[default]
    Text2Img,
    Img2Img,
    Inpainting,
    ControlNet,
}

impl GeneratorType {
    /// Source processing mode sent along with a source image.
    pub fn source_processing(self) -> Option<SourceProcessing> {
        match self {
            Self::Text2Img => None,
            Self::Img2Img | Self::ControlNet => Some(SourceProcessing::Img2Img),
            Self::Inpainting => Some(SourceProcessing::Inpainting),
        }
    }
}

/// How the service should treat NSFW content.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum NsfwMode {
    #[default]
    Enabled,
    Disabled,
    Censored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceProcessing {
    Img2Img,
    Inpainting,
    Outpainting,
}

/// Post-processors the service can apply to finished images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PostProcessor {
    #[serde(rename = "GFPGAN")]
    Gfpgan,
    #[serde(rename = "RealESRGAN_x4plus")]
    RealEsrganX4Plus,
    #[serde(rename = "CodeFormers")]
    CodeFormers,
}

impl PostProcessor {
    pub const ALL: [PostProcessor; 3] = [Self::Gfpgan, Self::RealEsrganX4Plus, Self::CodeFormers];

    /// Factor by which this post-processor scales the output dimensions.
    pub fn upscale_factor(self) -> u32 {
        match self {
            Self::RealEsrganX4Plus => 4,
            Self::Gfpgan | Self::CodeFormers => 1,
        }
    }

    pub fn parse(value: &str) -> Result<Self, CoreError> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(value))
            .ok_or_else(|| CoreError::Validation(format!("Unknown post-processor '{value}'")))
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gfpgan => "GFPGAN",
            Self::RealEsrganX4Plus => "RealESRGAN_x4plus",
            Self::CodeFormers => "CodeFormers",
        }
    }
}

/// ControlNet conditioning types.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlType {
    Canny,
    Hed,
    Depth,
    #[default]
    Normal,
    Openpose,
    Seg,
    Scribble,
    Fakescribbles,
    Hough,
}

impl ControlType {
    pub const ALL: [ControlType; 9] = [
        Self::Canny,
        Self::Hed,
        Self::Depth,
        Self::Normal,
        Self::Openpose,
        Self::Seg,
        Self::Scribble,
        Self::Fakescribbles,
        Self::Hough,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Canny => "canny",
            Self::Hed => "hed",
            Self::Depth => "depth",
            Self::Normal => "normal",
            Self::Openpose => "openpose",
            Self::Seg => "seg",
            Self::Scribble => "scribble",
            Self::Fakescribbles => "fakescribbles",
            Self::Hough => "hough",
        }
    }

    pub fn parse(value: &str) -> Result<Self, CoreError> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == value.to_ascii_lowercase())
            .ok_or_else(|| CoreError::Validation(format!("Unknown control type '{value}'")))
    }
}

// ---------------------------------------------------------------------------
// Parameters
// ---------------------------------------------------------------------------

/// Seed variation sent when the seed was drawn by the client.
pub const RANDOM_SEED_VARIATION: u32 = 1000;
/// Seed variation sent when the user pinned a seed.
pub const FIXED_SEED_VARIATION: u32 = 1;

/// Per-job generation parameters as edited by the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub sampler_name: String,
    pub width: u32,
    pub height: u32,
    pub steps: u32,
    pub cfg_scale: f64,
    pub clip_skip: u32,
    pub denoising_strength: f64,
    /// User seed as typed. Empty means "draw one per job".
    pub seed: String,
    pub karras: bool,
    pub tiling: bool,
    pub hires_fix: bool,
    pub post_processing: Vec<PostProcessor>,
    pub control_type: ControlType,
    /// Number of images requested per expanded prompt/model/control combination.
    pub n: u32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            sampler_name: "k_euler".to_string(),
            width: 512,
            height: 512,
            steps: 30,
            cfg_scale: 7.0,
            clip_skip: 1,
            denoising_strength: 0.75,
            seed: String::new(),
            karras: true,
            tiling: false,
            hires_fix: false,
            post_processing: Vec::new(),
            control_type: ControlType::Normal,
            n: 1,
        }
    }
}

impl GenerationParams {
    /// The user seed, when it is set, numeric and non-zero.
    pub fn explicit_seed(&self) -> Option<u64> {
        match self.seed.trim().parse::<u64>() {
            Ok(0) | Err(_) => None,
            Ok(value) => Some(value),
        }
    }

    /// `n`, treating zero as one.
    pub fn images_per_request(&self) -> usize {
        self.n.max(1) as usize
    }
}

// ---------------------------------------------------------------------------
// Source image
// ---------------------------------------------------------------------------

/// Source image and optional mask for image-conditioned generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceImage {
    /// Base64 image payload, optionally still wrapped in a data URL.
    pub image: String,
    pub mask: Option<String>,
}

/// Strip a `data:...;base64,` prefix, leaving only the payload.
pub fn strip_data_url(value: &str) -> &str {
    match value.split_once(',') {
        Some((prefix, payload)) if prefix.starts_with("data:") => payload,
        _ => value,
    }
}

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// Everything the user configured for one generation batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub generator_type: GeneratorType,
    pub prompt: String,
    pub negative_prompt: String,
    pub params: GenerationParams,
    /// Model used when multi-model selection is disabled. May be one of
    /// the meta entries `Random!` or `All Models!`.
    pub selected_model: String,
    pub multi_model: bool,
    pub selected_models: Vec<String>,
    pub multi_control_type: bool,
    pub selected_control_types: Vec<ControlType>,
    pub nsfw: NsfwMode,
    pub trusted_only: bool,
    pub share: bool,
    /// Restrict the batch to these worker ids. Empty means any worker.
    pub workers: Vec<String>,
    pub source: Option<SourceImage>,
}

impl Default for GenerationRequest {
    fn default() -> Self {
        Self {
            generator_type: GeneratorType::Text2Img,
            prompt: String::new(),
            negative_prompt: String::new(),
            params: GenerationParams::default(),
            selected_model: "stable_diffusion".to_string(),
            multi_model: false,
            selected_models: vec!["stable_diffusion".to_string()],
            multi_control_type: false,
            selected_control_types: vec![ControlType::Depth],
            nsfw: NsfwMode::Enabled,
            trusted_only: false,
            share: false,
            workers: Vec::new(),
            source: None,
        }
    }
}

impl GenerationRequest {
    /// Positive and negative prompt joined with the ` ### ` separator.
    pub fn full_prompt(&self) -> String {
        full_prompt(&self.prompt, &self.negative_prompt)
    }

    /// Whether a source image is attached and will be used for img2img.
    pub fn is_img2img_with_source(&self) -> bool {
        self.source.is_some()
            && self.generator_type.source_processing() == Some(SourceProcessing::Img2Img)
    }
}

// ---------------------------------------------------------------------------
// Parameter limits
// ---------------------------------------------------------------------------

/// Numeric bounds the form enforces, optionally relaxed by the
/// "larger values" option.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamLimits {
    pub min_dimension: u32,
    pub max_dimension: u32,
    pub min_images: u32,
    pub max_images: u32,
    pub min_steps: u32,
    pub max_steps: u32,
    pub min_cfg_scale: f64,
    pub max_cfg_scale: f64,
    pub min_denoise: f64,
    pub max_denoise: f64,
    pub min_clip_skip: u32,
    pub max_clip_skip: u32,
}

impl ParamLimits {
    pub fn new(allow_larger: bool) -> Self {
        Self {
            min_dimension: 64,
            max_dimension: if allow_larger { 3072 } else { 1024 },
            min_images: 1,
            max_images: 20,
            min_steps: 1,
            max_steps: if allow_larger { 500 } else { 50 },
            min_cfg_scale: if allow_larger { -40.0 } else { 1.0 },
            max_cfg_scale: 30.0,
            min_denoise: 0.1,
            max_denoise: 1.0,
            min_clip_skip: 1,
            max_clip_skip: 12,
        }
    }

    /// Check every parameter against its bounds.
    pub fn validate(&self, params: &GenerationParams) -> Result<(), CoreError> {
        check_range("width", params.width, self.min_dimension, self.max_dimension)?;
        check_range("height", params.height, self.min_dimension, self.max_dimension)?;
        check_range("n", params.n, self.min_images, self.max_images)?;
        check_range("steps", params.steps, self.min_steps, self.max_steps)?;
        check_range("clip_skip", params.clip_skip, self.min_clip_skip, self.max_clip_skip)?;
        if !(self.min_cfg_scale..=self.max_cfg_scale).contains(&params.cfg_scale) {
            return Err(CoreError::Validation(format!(
                "cfg_scale must be between {} and {} (got {})",
                self.min_cfg_scale, self.max_cfg_scale, params.cfg_scale
            )));
        }
        if !(self.min_denoise..=self.max_denoise).contains(&params.denoising_strength) {
            return Err(CoreError::Validation(format!(
                "denoising_strength must be between {} and {} (got {})",
                self.min_denoise, self.max_denoise, params.denoising_strength
            )));
        }
        Ok(())
    }
}

impl Default for ParamLimits {
    fn default() -> Self {
        Self::new(false)
    }
}

fn check_range(name: &str, value: u32, min: u32, max: u32) -> Result<(), CoreError> {
    if value < min || value > max {
        return Err(CoreError::Validation(format!(
            "{name} must be between {min} and {max} (got {value})"
        )));
    }
    Ok(())
}

/// Return `value` if it does not exceed `max`, otherwise `default`.
///
/// Used when restoring parameters from an image generated with larger
/// limits than are currently allowed.
pub fn clamp_to_default(value: u32, max: u32, default: u32) -> u32 {
    if value <= max {
        value
    } else {
        default
    }
}
