//! REST client for the video generation service.
//!
//! The video service lives on its own root and runs one job per request:
//! `POST /generate`, `GET /status/{id}`, `DELETE /status/{id}`.

use std::time::Duration;

use async_trait::async_trait;
use horde_core::types::RemoteJobId;
use horde_core::video::{VideoRequest, VideoStatus};
use serde::Deserialize;

use crate::api::HordeApiError;

#[derive(Debug, Deserialize)]
struct VideoSubmitResponse {
    id: String,
}

/// Operations the video runner needs from a video backend.
#[async_trait]
pub trait VideoService: Send + Sync {
    async fn submit(&self, request: &VideoRequest) -> Result<RemoteJobId, HordeApiError>;

    async fn status(&self, id: &str) -> Result<VideoStatus, HordeApiError>;

    async fn cancel(&self, id: &str) -> Result<(), HordeApiError>;
}

/// HTTP client for a video service instance.
#[derive(Debug, Clone)]
pub struct VideoApi {
    client: reqwest::Client,
    base_url: String,
}

impl VideoApi {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, HordeApiError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, HordeApiError> {
        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(HordeApiError::ApiError {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl VideoService for VideoApi {
    async fn submit(&self, request: &VideoRequest) -> Result<RemoteJobId, HordeApiError> {
        let response = self
            .client
            .post(format!("{}/generate", self.base_url))
            .json(request)
            .send()
            .await?;

        let body: VideoSubmitResponse = Self::ensure_success(response).await?.json().await?;
        tracing::debug!(video_id = %body.id, frames = request.frame_count(), "Video job accepted");
        Ok(body.id)
    }

    async fn status(&self, id: &str) -> Result<VideoStatus, HordeApiError> {
        let response = self
            .client
            .get(format!("{}/status/{id}", self.base_url))
            .send()
            .await?;

        Ok(Self::ensure_success(response).await?.json().await?)
    }

    async fn cancel(&self, id: &str) -> Result<(), HordeApiError> {
        let response = self
            .client
            .delete(format!("{}/status/{id}", self.base_url))
            .send()
            .await?;

        Self::ensure_success(response).await?;
        Ok(())
    }
}
