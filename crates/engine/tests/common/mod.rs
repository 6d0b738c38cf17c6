#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use horde_api::{GenerationService, HordeApiError};
use horde_core::job::{JobParams, JobSpec};
use horde_core::status::{Generation, RequestStatus};
use horde_core::types::RemoteJobId;
use horde_core::record::ImageRecord;
use horde_engine::{BatchEngine, CollectingSink, EngineSettings, ResultSink, SinkError};
use tokio_util::sync::CancellationToken;

/// Settings with millisecond delays.
pub fn fast_settings(max_parallel_requests: usize) -> EngineSettings {
    EngineSettings {
        poll_delay: Duration::from_millis(1),
        settle_delay: Duration::from_millis(1),
        max_parallel_images: 100,
        max_parallel_requests,
        anonymous: false,
    }
}

pub fn job(prompt: &str) -> JobSpec {
    JobSpec {
        prompt: prompt.to_string(),
        model: "stable_diffusion".into(),
        params: JobParams {
            sampler_name: "k_euler".into(),
            width: 512,
            height: 512,
            steps: 30,
            cfg_scale: 7.0,
            clip_skip: 1,
            denoising_strength: 0.75,
            seed: "1".into(),
            seed_variation: 1000,
            karras: true,
            tiling: false,
            hires_fix: false,
            post_processing: Vec::new(),
            control_type: None,
            n: 1,
        },
        nsfw: false,
        censor_nsfw: false,
        trusted_workers: false,
        shared: false,
        workers: Vec::new(),
        source: None,
    }
}

pub fn jobs(count: usize) -> Vec<JobSpec> {
    (0..count).map(|i| job(&format!("prompt {i}"))).collect()
}

/// Call log and counters of a [`FakeService`].
#[derive(Debug, Default)]
pub struct Calls {
    pub submitted: Vec<RemoteJobId>,
    pub checks: HashMap<String, usize>,
    pub fetched: Vec<String>,
    pub cancelled: Vec<String>,
    /// Highest number of jobs submitted but not yet fetched.
    pub max_in_flight: usize,
}

impl Calls {
    pub fn total_checks(&self) -> usize {
        self.checks.values().sum()
    }
}

/// In-memory image service.
///
/// Jobs are named `job-{n}` in submission order and report done after
/// `checks_until_done` checks.
pub struct FakeService {
    pub calls: Mutex<Calls>,
    pub checks_until_done: usize,
    pub faulted_job: Option<String>,
    pub impossible_job: Option<String>,
    pub fail_submit_at: Option<usize>,
    /// Cancel this token once this many checks happened in total.
    pub cancel_after_checks: Option<(usize, CancellationToken)>,
}

impl FakeService {
    pub fn new(checks_until_done: usize) -> Self {
        Self {
            calls: Mutex::new(Calls::default()),
            checks_until_done,
            faulted_job: None,
            impossible_job: None,
            fail_submit_at: None,
            cancel_after_checks: None,
        }
    }

    fn generation(job_id: &str) -> Generation {
        Generation {
            img: format!("https://r2/{job_id}.webp"),
            seed: "1".into(),
            model: "stable_diffusion".into(),
            worker_id: "worker-1".into(),
            worker_name: "fake".into(),
            id: format!("{job_id}-img"),
            censored: false,
        }
    }
}

#[async_trait]
impl GenerationService for FakeService {
    async fn submit(&self, _job: &JobSpec) -> Result<RemoteJobId, HordeApiError> {
        let mut calls = self.calls.lock().unwrap();
        let index = calls.submitted.len();
        if self.fail_submit_at == Some(index) {
            return Err(HordeApiError::ApiError {
                status: 429,
                message: "Too many requests".into(),
            });
        }
        let job_id = format!("job-{index}");
        calls.submitted.push(job_id.clone());
        let in_flight = calls.submitted.len() - calls.fetched.len();
        calls.max_in_flight = calls.max_in_flight.max(in_flight);
        Ok(job_id)
    }

    async fn check(&self, id: &str) -> Result<RequestStatus, HordeApiError> {
        let mut calls = self.calls.lock().unwrap();
        let count = {
            let count = calls.checks.entry(id.to_string()).or_default();
            *count += 1;
            *count
        };
        if let Some((after, token)) = &self.cancel_after_checks {
            if calls.total_checks() >= *after {
                token.cancel();
            }
        }
        Ok(RequestStatus {
            done: count >= self.checks_until_done,
            faulted: self.faulted_job.as_deref() == Some(id),
            is_possible: self.impossible_job.as_deref() != Some(id),
            queue_position: 1.0,
            wait_time: 5.0,
            waiting: 1,
            ..Default::default()
        })
    }

    async fn fetch(&self, id: &str) -> Result<Vec<Generation>, HordeApiError> {
        self.calls.lock().unwrap().fetched.push(id.to_string());
        Ok(vec![Self::generation(id)])
    }

    async fn cancel(&self, id: &str) -> Result<Vec<Generation>, HordeApiError> {
        self.calls.lock().unwrap().cancelled.push(id.to_string());
        Ok(vec![Self::generation(id)])
    }
}

pub fn engine(service: Arc<FakeService>, sink: Arc<CollectingSink>, max_parallel_requests: usize) -> BatchEngine {
    BatchEngine::new(service, sink, fast_settings(max_parallel_requests))
}

/// Sink that cancels `cancel` as soon as it is handed images, then takes
/// `delay` to store them.
pub struct SlowSink {
    pub inner: CollectingSink,
    pub cancel: CancellationToken,
    pub delay: Duration,
}

#[async_trait]
impl ResultSink for SlowSink {
    async fn process(&self, records: Vec<ImageRecord>) -> Result<(), SinkError> {
        self.cancel.cancel();
        tokio::time::sleep(self.delay).await;
        self.inner.process(records).await
    }
}
