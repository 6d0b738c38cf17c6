use horde_api::HordeApiError;
use horde_core::error::CoreError;
use horde_core::planner::PlanError;

/// Errors that end a batch or video job.
///
/// Every variant raised while a batch is running has already been routed
/// through the failure path: outstanding jobs were cancelled and the queue
/// cleared.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error(transparent)]
    Validation(#[from] CoreError),

    #[error("Failed to submit job {index}: {source}")]
    SubmitFailed {
        index: usize,
        #[source]
        source: HordeApiError,
    },

    #[error("Failed to check status of job {job_id}: {source}")]
    PollFailed {
        job_id: String,
        #[source]
        source: HordeApiError,
    },

    #[error("Failed to generate: Generation faulted.")]
    Faulted { job_id: String },

    #[error("Failed to generate: Generation not possible.")]
    NotPossible { job_id: String },

    #[error("Failed to fetch images of job {job_id}: {source}")]
    FetchFailed {
        job_id: String,
        #[source]
        source: HordeApiError,
    },

    #[error("Failed to cancel job {job_id}: {source}")]
    CancelFailed {
        job_id: String,
        #[source]
        source: HordeApiError,
    },

    #[error("Failed to generate video: {message}")]
    VideoFaulted { message: String },
}
