//! One user's generator state: the editable request, the model catalog,
//! prompt history and the running batch.

use horde_core::history::PromptHistory;
use horde_core::kudos;
use horde_core::models::{add_trigger, ModelCatalog};
use horde_core::planner::{plan_batch, total_job_count};
use horde_core::request::GenerationRequest;
use horde_core::seed::SeedGenerator;
use horde_core::status::AggregateStatus;
use tokio_util::sync::CancellationToken;

use crate::engine::{BatchEngine, BatchReport};
use crate::error::EngineError;
use crate::queue::{queue_from_jobs, queue_status, QueueEntry};

pub struct GeneratorSession {
    pub request: GenerationRequest,
    catalog: ModelCatalog,
    seeds: SeedGenerator,
    history: PromptHistory,
    queue: Vec<QueueEntry>,
    generating: bool,
    engine: BatchEngine,
}

impl GeneratorSession {
    pub fn new(request: GenerationRequest, catalog: ModelCatalog, engine: BatchEngine) -> Self {
        Self {
            request,
            catalog,
            seeds: SeedGenerator::new(),
            history: PromptHistory::default(),
            queue: Vec::new(),
            generating: false,
            engine,
        }
    }

    pub fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }

    pub fn set_catalog(&mut self, catalog: ModelCatalog) {
        self.catalog = catalog;
    }

    pub fn history(&self) -> &PromptHistory {
        &self.history
    }

    pub fn history_mut(&mut self) -> &mut PromptHistory {
        &mut self.history
    }

    pub fn engine(&self) -> &BatchEngine {
        &self.engine
    }

    pub fn is_generating(&self) -> bool {
        self.generating
    }

    /// Combined status of the current queue.
    pub fn queue_status(&self) -> AggregateStatus {
        queue_status(&self.queue)
    }

    /// Jobs the current request would produce.
    pub fn total_job_count(&self) -> usize {
        let groups = self.catalog.real_groups(self.request.generator_type);
        total_job_count(&self.request, &groups)
    }

    /// Estimated kudos cost of the current request.
    pub fn kudos_cost(&self) -> f64 {
        kudos::estimate_kudos(&self.request, self.total_job_count())
    }

    /// Prepend the selected model's first trigger word unless the prompt
    /// already contains it. Returns whether the prompt changed.
    pub fn add_dreambooth_trigger(&mut self, trigger: Option<&str>) -> bool {
        let Some(model) = self.catalog.find(&self.request.selected_model) else {
            return false;
        };
        let Some(trigger) = trigger.or_else(|| model.trigger.first().map(String::as_str)) else {
            return false;
        };
        let updated = add_trigger(&self.request.prompt, trigger);
        let changed = updated != self.request.prompt;
        self.request.prompt = updated;
        changed
    }

    /// Plan and run one batch.
    ///
    /// The seed generator is re-seeded from entropy first. Planning errors
    /// are returned before anything is submitted. The session is back to
    /// idle with an empty queue whatever the outcome.
    pub async fn generate(&mut self, cancel: &CancellationToken) -> Result<BatchReport, EngineError> {
        self.seeds.seed(None);
        let groups = self.catalog.real_groups(self.request.generator_type);
        let plan = plan_batch(&self.request, &groups, &mut self.seeds, &mut rand::rng())?;
        tracing::info!(
            jobs = plan.job_count(),
            prompts = plan.prompts.len(),
            models = plan.models.len(),
            "Batch planned",
        );

        self.history.push(&self.request.prompt);
        self.queue = queue_from_jobs(plan.jobs);
        self.generating = true;

        let result = self.engine.run(&mut self.queue, cancel).await;

        self.generating = false;
        self.queue.clear();
        result
    }
}
