use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use base64::Engine as _;
use clap::{Args, Parser, Subcommand};
use horde_api::{HordeApi, VideoApi};
use horde_core::models::ModelCatalog;
use horde_core::request::{
    ControlType, GenerationParams, GenerationRequest, GeneratorType, NsfwMode, ParamLimits,
    PostProcessor, SourceImage,
};
use horde_core::video::VideoRequest;
use horde_engine::{
    BatchEngine, CollectingSink, EngineEvent, EventBus, GeneratorSession, HordeConfig,
    VideoOutcome, VideoRunner,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "horde")]
#[command(about = "Batch image and video generation on the AI Horde")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a batch of images and print the resulting records
    Generate {
        #[command(flatten)]
        request: RequestArgs,

        /// Write records to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print the job count and kudos estimate of a request
    Estimate {
        #[command(flatten)]
        request: RequestArgs,
    },

    /// List the currently served models, grouped by style
    Models {
        /// NSFW mode (enabled, disabled, censored)
        #[arg(long, default_value = "enabled")]
        nsfw: String,
    },

    /// Generate a video
    Video {
        /// Keyframe prompts
        #[arg(required = true)]
        prompts: Vec<String>,

        #[arg(long, default_value = "30")]
        steps: u32,

        #[arg(long, default_value = "512")]
        width: u32,

        #[arg(long, default_value = "512")]
        height: u32,

        /// Length in seconds
        #[arg(long, default_value = "5")]
        duration: u32,

        #[arg(long, default_value = "10")]
        fps: u32,

        #[arg(long, default_value = "7")]
        cfg: f64,
    },
}

#[derive(Args)]
struct RequestArgs {
    /// Prompt; `{a|b}` groups expand into one job per option
    prompt: String,

    /// Negative prompt
    #[arg(long)]
    negative: Option<String>,

    /// Images per prompt/model combination
    #[arg(short, long, default_value = "1")]
    n: u32,

    /// Model name, `Random!` or `All Models!`
    #[arg(short, long, default_value = "stable_diffusion")]
    model: String,

    /// Spread the batch over several models (repeatable)
    #[arg(long = "models")]
    models: Vec<String>,

    #[arg(long, default_value = "k_euler")]
    sampler: String,

    #[arg(long, default_value = "30")]
    steps: u32,

    #[arg(long, default_value = "512")]
    width: u32,

    #[arg(long, default_value = "512")]
    height: u32,

    #[arg(long, default_value = "7")]
    cfg_scale: f64,

    #[arg(long, default_value = "1")]
    clip_skip: u32,

    /// Numeric seed; random per job when omitted
    #[arg(long)]
    seed: Option<String>,

    /// Post-processors to apply (GFPGAN, RealESRGAN_x4plus, CodeFormers)
    #[arg(long = "post-processing")]
    post_processing: Vec<String>,

    #[arg(long)]
    hires_fix: bool,

    #[arg(long)]
    tiling: bool,

    /// NSFW mode (enabled, disabled, censored)
    #[arg(long, default_value = "enabled")]
    nsfw: String,

    /// Only use trusted workers
    #[arg(long)]
    trusted_only: bool,

    /// Share images with LAION
    #[arg(long)]
    share: bool,

    /// Allow dimensions and steps above the regular limits
    #[arg(long)]
    allow_larger: bool,

    /// Generator type (text2img, img2img, inpainting, controlnet)
    #[arg(long = "type", default_value = "text2img")]
    generator_type: String,

    /// Source image file for image-conditioned generation
    #[arg(long)]
    source: Option<PathBuf>,

    /// Inpainting mask file
    #[arg(long, requires = "source")]
    mask: Option<PathBuf>,

    #[arg(long, default_value = "0.75")]
    denoise: f64,

    /// ControlNet control type
    #[arg(long, default_value = "normal")]
    control_type: String,

    /// Spread the batch over several control types (repeatable)
    #[arg(long = "control-types")]
    control_types: Vec<String>,
}

impl RequestArgs {
    fn into_request(self) -> Result<GenerationRequest> {
        let post_processing = self
            .post_processing
            .iter()
            .map(|p| PostProcessor::parse(p))
            .collect::<Result<Vec<_>, _>>()?;
        let selected_control_types = self
            .control_types
            .iter()
            .map(|c| ControlType::parse(c))
            .collect::<Result<Vec<_>, _>>()?;
        let generator_type = parse_generator_type(&self.generator_type)?;
        if generator_type != GeneratorType::Text2Img && self.source.is_none() {
            bail!("--source is required for {}", self.generator_type);
        }
        let source = match &self.source {
            Some(path) => Some(SourceImage {
                image: read_base64(path)?,
                mask: self.mask.as_deref().map(read_base64).transpose()?,
            }),
            None => None,
        };
        let params = GenerationParams {
            sampler_name: self.sampler,
            width: self.width,
            height: self.height,
            steps: self.steps,
            cfg_scale: self.cfg_scale,
            clip_skip: self.clip_skip,
            seed: self.seed.unwrap_or_default(),
            denoising_strength: self.denoise,
            control_type: ControlType::parse(&self.control_type)?,
            tiling: self.tiling,
            hires_fix: self.hires_fix,
            post_processing,
            n: self.n,
            ..Default::default()
        };
        ParamLimits::new(self.allow_larger).validate(&params)?;

        Ok(GenerationRequest {
            prompt: self.prompt,
            negative_prompt: self.negative.unwrap_or_default(),
            params,
            selected_model: self.model,
            multi_model: !self.models.is_empty(),
            selected_models: self.models,
            nsfw: parse_nsfw(&self.nsfw)?,
            trusted_only: self.trusted_only,
            share: self.share,
            generator_type,
            source,
            multi_control_type: !selected_control_types.is_empty(),
            selected_control_types,
            ..Default::default()
        })
    }
}

fn parse_nsfw(value: &str) -> Result<NsfwMode> {
    match value.to_ascii_lowercase().as_str() {
        "enabled" => Ok(NsfwMode::Enabled),
        "disabled" => Ok(NsfwMode::Disabled),
        "censored" => Ok(NsfwMode::Censored),
        other => bail!("unknown NSFW mode {other:?}"),
    }
}

fn parse_generator_type(value: &str) -> Result<GeneratorType> {
    match value.to_ascii_lowercase().as_str() {
        "text2img" => Ok(GeneratorType::Text2Img),
        "img2img" => Ok(GeneratorType::Img2Img),
        "inpainting" => Ok(GeneratorType::Inpainting),
        "controlnet" => Ok(GeneratorType::ControlNet),
        other => bail!("unknown generator type {other:?}"),
    }
}

/// Read an image file as a base64 payload.
fn read_base64(path: &Path) -> Result<String> {
    let bytes =
        std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    Ok(base64::engine::general_purpose::STANDARD.encode(bytes))
}

/// Join the live roster with the metadata document.
async fn load_catalog(api: &HordeApi, config: &HordeConfig, nsfw: NsfwMode) -> Result<ModelCatalog> {
    let active = api
        .active_models()
        .await
        .context("failed to fetch the model roster")?;
    let metadata = api
        .model_metadata(&config.models_db_url)
        .await
        .context("failed to fetch model metadata")?;
    tracing::debug!(active = active.len(), known = metadata.len(), "Model catalog loaded");
    Ok(ModelCatalog::build(&active, &metadata, nsfw))
}

/// Cancel `token` on Ctrl-C.
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling");
            token.cancel();
        }
    });
}

/// Log engine events until the bus closes.
fn log_events(events: &EventBus) {
    let mut rx = events.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(EngineEvent::Progress { status, elapsed_secs, .. }) => tracing::info!(
                    finished = status.finished,
                    processing = status.processing,
                    waiting = status.waiting,
                    queue_position = status.queue_position,
                    wait_time = status.wait_time,
                    elapsed_secs = elapsed_secs as u64,
                    "Progress",
                ),
                Ok(EngineEvent::VideoProgress { status, .. }) => tracing::info!(
                    progress = status.progress_percent(),
                    "Video progress",
                ),
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Progress listener lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "horde=debug,horde_engine=debug,horde_api=debug"
    } else {
        "horde=info,horde_engine=info,horde_api=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = HordeConfig::from_env()?;
    let api = HordeApi::new(&config.base_url, &config.api_key, config.request_timeout)?;

    match cli.command {
        Commands::Generate { request, output } => {
            let request = request.into_request()?;
            let catalog = match load_catalog(&api, &config, request.nsfw).await {
                Ok(catalog) => catalog,
                Err(e) => {
                    tracing::warn!(error = %e, "Continuing without a model catalog");
                    ModelCatalog::default()
                }
            };

            let sink = Arc::new(CollectingSink::new());
            let engine = BatchEngine::new(Arc::new(api), sink.clone(), config.engine_settings());
            log_events(engine.events());
            let mut session = GeneratorSession::new(request, catalog, engine);
            tracing::info!(
                jobs = session.total_job_count(),
                kudos = session.kudos_cost(),
                "Submitting batch",
            );

            let cancel = CancellationToken::new();
            cancel_on_ctrl_c(cancel.clone());
            let report = session.generate(&cancel).await?;
            tracing::info!(outcome = ?report.outcome, images = report.images, "Batch complete");

            let json = serde_json::to_string_pretty(&sink.take().await)?;
            match output {
                Some(path) => std::fs::write(&path, json)
                    .with_context(|| format!("failed to write {}", path.display()))?,
                None => println!("{json}"),
            }
        }

        Commands::Estimate { request } => {
            let request = request.into_request()?;
            let catalog = load_catalog(&api, &config, request.nsfw).await?;
            let groups = catalog.real_groups(request.generator_type);
            let jobs = horde_core::planner::total_job_count(&request, &groups);
            let kudos = horde_core::kudos::estimate_kudos(&request, jobs);
            let estimate = serde_json::json!({ "jobs": jobs, "kudos": kudos });
            println!("{}", serde_json::to_string_pretty(&estimate)?);
        }

        Commands::Models { nsfw } => {
            let catalog = load_catalog(&api, &config, parse_nsfw(&nsfw)?).await?;
            println!("{}", serde_json::to_string_pretty(catalog.groups())?);
        }

        Commands::Video {
            prompts,
            steps,
            width,
            height,
            duration,
            fps,
            cfg,
        } => {
            let request = VideoRequest {
                prompts,
                steps,
                width,
                height,
                desired_duration: duration,
                fps,
                cfg,
            };
            let video_api = VideoApi::new(&config.video_base_url, config.request_timeout)?;
            let runner = VideoRunner::new(Arc::new(video_api), config.poll_interval);
            log_events(runner.events());

            let cancel = CancellationToken::new();
            cancel_on_ctrl_c(cancel.clone());
            match runner.run(&request, &cancel).await? {
                VideoOutcome::Finished { video_url, .. } => println!("{video_url}"),
                VideoOutcome::Cancelled { video_id } => {
                    tracing::warn!(video_id = %video_id, "Video cancelled");
                }
            }
        }
    }

    Ok(())
}
