//! REST API client for the Horde image service.
//!
//! Wraps the `/api/v2` endpoints used by the batch engine (async
//! submission, status checks, result retrieval, cancellation) and the
//! model roster, using [`reqwest`].

use std::collections::BTreeMap;
use std::time::Duration;

use horde_core::job::JobSpec;
use horde_core::models::{ActiveModel, ModelMetadata};
use horde_core::status::{Generation, RequestStatus};
use serde::Deserialize;

/// Key used when no account key is configured.
pub const ANONYMOUS_API_KEY: &str = "0000000000";

/// Sent as `Client-Agent` on every request.
pub const CLIENT_AGENT: &str = concat!("horde-batch:", env!("CARGO_PKG_VERSION"), ":unknown");

/// Attempts made by [`HordeApi::check`] while the service answers HTTP 500.
pub const CHECK_ATTEMPTS: u32 = 5;

/// HTTP client for a single Horde deployment.
#[derive(Debug, Clone)]
pub struct HordeApi {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
}

/// Response of `POST /generate/async`.
#[derive(Debug, Deserialize)]
pub struct SubmitResponse {
    /// Server-assigned job identifier.
    pub id: String,
    #[serde(default)]
    pub kudos: f64,
}

/// Response of `GET|DELETE /generate/status/{id}`.
#[derive(Debug, Deserialize)]
pub struct StatusResponse {
    #[serde(default)]
    pub generations: Vec<Generation>,
}

/// Error body returned by the service on failures.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(alias = "msg")]
    message: String,
}

/// Errors from the Horde REST API layer.
#[derive(Debug, thiserror::Error)]
pub enum HordeApiError {
    /// The HTTP request itself failed (network, DNS, TLS, timeout, bad JSON).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The service returned an unexpected status code.
    #[error("Horde API error ({status}): {message}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// `message` from the error body, or the raw body.
        message: String,
    },

    /// The status check kept answering HTTP 500.
    #[error("Status check for {id} failed after {attempts} attempts")]
    RetriesExhausted { id: String, attempts: u32 },
}

impl HordeApiError {
    /// HTTP status of an [`HordeApiError::ApiError`].
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::ApiError { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl HordeApi {
    /// Create a client for a Horde deployment.
    ///
    /// * `base_url` - Deployment root, e.g. `https://stablehorde.net`.
    /// * `timeout` - Deadline for every individual request.
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self, HordeApiError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, base_url, api_key))
    }

    /// Create a client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, base_url: &str, api_key: &str) -> Self {
        let api_key = if api_key.is_empty() {
            ANONYMOUS_API_KEY
        } else {
            api_key
        };
        Self {
            client,
            api_url: format!("{}/api/v2", base_url.trim_end_matches('/')),
            api_key: api_key.to_string(),
        }
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Whether requests are made without an account.
    pub fn is_anonymous(&self) -> bool {
        self.api_key == ANONYMOUS_API_KEY
    }

    /// Submit one job. The service answers `202 Accepted` with the job id.
    pub async fn submit(&self, job: &JobSpec) -> Result<SubmitResponse, HordeApiError> {
        let response = self
            .request(reqwest::Method::POST, "/generate/async")
            .json(&job.payload())
            .send()
            .await?;

        if response.status() != reqwest::StatusCode::ACCEPTED {
            return Err(Self::api_error(response).await);
        }
        let submitted: SubmitResponse = response.json().await?;
        tracing::debug!(job_id = %submitted.id, model = %job.model, "Job accepted");
        Ok(submitted)
    }

    /// Poll a job's progress.
    ///
    /// HTTP 500 is retried immediately, up to [`CHECK_ATTEMPTS`] attempts in
    /// total.
    pub async fn check(&self, id: &str) -> Result<RequestStatus, HordeApiError> {
        for attempt in 1..=CHECK_ATTEMPTS {
            let response = self
                .request(reqwest::Method::GET, &format!("/generate/check/{id}"))
                .send()
                .await?;

            if response.status() == reqwest::StatusCode::INTERNAL_SERVER_ERROR {
                tracing::warn!(job_id = %id, attempt, "Status check returned 500, retrying");
                continue;
            }
            return Self::parse_response(response).await;
        }
        Err(HordeApiError::RetriesExhausted {
            id: id.to_string(),
            attempts: CHECK_ATTEMPTS,
        })
    }

    /// Fetch the finished images of a job.
    pub async fn status(&self, id: &str) -> Result<Vec<Generation>, HordeApiError> {
        let response = self
            .request(reqwest::Method::GET, &format!("/generate/status/{id}"))
            .send()
            .await?;

        let body: StatusResponse = Self::parse_response(response).await?;
        Ok(body.generations)
    }

    /// Cancel a job, returning whatever images it already produced.
    pub async fn cancel(&self, id: &str) -> Result<Vec<Generation>, HordeApiError> {
        let response = self
            .request(reqwest::Method::DELETE, &format!("/generate/status/{id}"))
            .send()
            .await?;

        let body: StatusResponse = Self::parse_response(response).await?;
        tracing::debug!(job_id = %id, images = body.generations.len(), "Job cancelled");
        Ok(body.generations)
    }

    /// Currently served image models.
    pub async fn active_models(&self) -> Result<Vec<ActiveModel>, HordeApiError> {
        let response = self
            .request(reqwest::Method::GET, "/status/models")
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Download the model metadata document (keyed by model name).
    pub async fn model_metadata(
        &self,
        url: &str,
    ) -> Result<BTreeMap<String, ModelMetadata>, HordeApiError> {
        let response = self.client.get(url).send().await?;
        Self::parse_response(response).await
    }

    // ---- private helpers ----

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.api_url, path))
            .header("apikey", &self.api_key)
            .header("Client-Agent", CLIENT_AGENT)
    }

    /// Turn a failed response into [`HordeApiError::ApiError`], preferring
    /// the `message` field of the body.
    async fn api_error(response: reqwest::Response) -> HordeApiError {
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable body>".to_string());
        let message = serde_json::from_str::<ErrorBody>(&body)
            .map(|e| e.message)
            .unwrap_or(body);
        HordeApiError::ApiError { status, message }
    }

    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, HordeApiError> {
        if !response.status().is_success() {
            return Err(Self::api_error(response).await);
        }
        Ok(response)
    }

    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, HordeApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }
}
