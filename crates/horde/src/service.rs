//! Service seam between the batch engine and the image service.

use async_trait::async_trait;
use horde_core::job::JobSpec;
use horde_core::status::{Generation, RequestStatus};
use horde_core::types::RemoteJobId;

use crate::api::{HordeApi, HordeApiError};

/// Operations the batch engine needs from an image generation backend.
#[async_trait]
pub trait GenerationService: Send + Sync {
    /// Submit one job and return its remote id.
    async fn submit(&self, job: &JobSpec) -> Result<RemoteJobId, HordeApiError>;

    /// Poll a submitted job.
    async fn check(&self, id: &str) -> Result<RequestStatus, HordeApiError>;

    /// Fetch the images of a finished job.
    async fn fetch(&self, id: &str) -> Result<Vec<Generation>, HordeApiError>;

    /// Cancel a job, returning any images it already produced.
    async fn cancel(&self, id: &str) -> Result<Vec<Generation>, HordeApiError>;
}

#[async_trait]
impl GenerationService for HordeApi {
    async fn submit(&self, job: &JobSpec) -> Result<RemoteJobId, HordeApiError> {
        Ok(HordeApi::submit(self, job).await?.id)
    }

    async fn check(&self, id: &str) -> Result<RequestStatus, HordeApiError> {
        HordeApi::check(self, id).await
    }

    async fn fetch(&self, id: &str) -> Result<Vec<Generation>, HordeApiError> {
        self.status(id).await
    }

    async fn cancel(&self, id: &str) -> Result<Vec<Generation>, HordeApiError> {
        HordeApi::cancel(self, id).await
    }
}
