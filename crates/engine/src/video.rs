//! Single-job runner for the video service.

use std::sync::Arc;
use std::time::Duration;

use horde_api::VideoService;
use horde_core::video::{VideoRequest, VideoStatus};
use tokio_util::sync::CancellationToken;

use crate::error::EngineError;
use crate::events::{EngineEvent, EventBus};

#[derive(Debug, Clone, PartialEq)]
pub enum VideoOutcome {
    Finished { video_id: String, video_url: String },
    Cancelled { video_id: String },
}

pub struct VideoRunner {
    service: Arc<dyn VideoService>,
    poll_delay: Duration,
    events: EventBus,
}

impl VideoRunner {
    pub fn new(service: Arc<dyn VideoService>, poll_delay: Duration) -> Self {
        Self {
            service,
            poll_delay,
            events: EventBus::default(),
        }
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Submit `request` and poll it until it is done, faulted or cancelled.
    ///
    /// A cancelled job is cancelled on the service as well. So is a job
    /// that faulted or could not be polled.
    pub async fn run(
        &self,
        request: &VideoRequest,
        cancel: &CancellationToken,
    ) -> Result<VideoOutcome, EngineError> {
        request.validate()?;

        let video_id = self
            .service
            .submit(request)
            .await
            .map_err(|source| EngineError::SubmitFailed { index: 0, source })?;
        tracing::info!(video_id = %video_id, frames = request.frame_count(), "Video job submitted");

        loop {
            if cancel.is_cancelled() {
                return self.cancel(video_id).await;
            }

            let status = match self.service.status(&video_id).await {
                Ok(status) => status,
                Err(source) => {
                    let err = EngineError::PollFailed {
                        job_id: video_id.clone(),
                        source,
                    };
                    return Err(self.fail(&video_id, err).await);
                }
            };
            tracing::debug!(
                video_id = %video_id,
                progress = status.progress_percent(),
                "Video job checked",
            );
            self.events.publish(EngineEvent::VideoProgress {
                video_id: video_id.clone(),
                status: status.clone(),
            });

            match status {
                VideoStatus::Done { video_url } => {
                    tracing::info!(video_id = %video_id, video_url = %video_url, "Video job finished");
                    return Ok(VideoOutcome::Finished {
                        video_id,
                        video_url,
                    });
                }
                VideoStatus::Faulted { message } => {
                    return Err(self.fail(&video_id, EngineError::VideoFaulted { message }).await);
                }
                _ => {}
            }

            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(self.poll_delay) => {}
            }
        }
    }

    /// Best-effort remote cancel after a fatal error. Cancel errors are
    /// logged; `error` is returned for the caller to propagate.
    async fn fail(&self, video_id: &str, error: EngineError) -> EngineError {
        tracing::error!(video_id = %video_id, error = %error, "Video job failed");
        if let Err(source) = self.service.cancel(video_id).await {
            let err = EngineError::CancelFailed {
                job_id: video_id.to_string(),
                source,
            };
            tracing::warn!(video_id = %video_id, error = %err, "Cleanup cancel failed");
        }
        self.events.publish(EngineEvent::VideoFailed {
            video_id: video_id.to_string(),
            message: error.to_string(),
        });
        error
    }

    async fn cancel(&self, video_id: String) -> Result<VideoOutcome, EngineError> {
        tracing::info!(video_id = %video_id, "Cancelling video job");
        self.service
            .cancel(&video_id)
            .await
            .map_err(|source| EngineError::CancelFailed {
                job_id: video_id.clone(),
                source,
            })?;
        Ok(VideoOutcome::Cancelled { video_id })
    }
}
