//! Integration tests for `GeneratorSession` and `VideoRunner`.

mod common;

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use assert_matches::assert_matches;
use async_trait::async_trait;
use horde_api::{HordeApiError, VideoService};
use horde_core::models::{ActiveModel, ModelCatalog, ModelMetadata};
use horde_core::planner::PlanError;
use horde_core::request::{GenerationParams, GenerationRequest, NsfwMode};
use horde_core::types::RemoteJobId;
use horde_core::video::{VideoRequest, VideoStatus};
use horde_engine::{
    BatchOutcome, CollectingSink, EngineError, EngineEvent, GeneratorSession, VideoOutcome,
    VideoRunner,
};
use tokio_util::sync::CancellationToken;

use common::{engine, FakeService};

fn catalog() -> ModelCatalog {
    let active = vec![ActiveModel {
        name: "stable_diffusion".into(),
        count: 3,
        ..Default::default()
    }];
    let mut metadata = BTreeMap::new();
    metadata.insert(
        "stable_diffusion".to_string(),
        ModelMetadata {
            style: Some("generalist".into()),
            trigger: vec!["sdstyle".into()],
            ..Default::default()
        },
    );
    ModelCatalog::build(&active, &metadata, NsfwMode::Enabled)
}

fn session(service: Arc<FakeService>, sink: Arc<CollectingSink>, prompt: &str, n: u32) -> GeneratorSession {
    let request = GenerationRequest {
        prompt: prompt.to_string(),
        params: GenerationParams {
            n,
            ..Default::default()
        },
        ..Default::default()
    };
    GeneratorSession::new(request, catalog(), engine(service, sink, 10))
}

// ---------------------------------------------------------------------------
// Test: generate plans the matrix and runs every job
// ---------------------------------------------------------------------------

#[tokio::test]
async fn generate_runs_planned_batch() {
    let service = Arc::new(FakeService::new(1));
    let sink = Arc::new(CollectingSink::new());
    let mut session = session(service.clone(), sink.clone(), "a {cat|dog}", 2);
    assert_eq!(session.total_job_count(), 4);

    let report = session.generate(&CancellationToken::new()).await.unwrap();

    assert_eq!(report.outcome, BatchOutcome::Finished);
    assert_eq!(report.images, 4);
    assert!(!session.is_generating());
    assert_eq!(session.queue_status().entries, 0);
    assert_eq!(session.history().entries()[0].prompt, "a {cat|dog}");

    let prompts: Vec<String> = sink.records().await.into_iter().map(|r| r.prompt).collect();
    assert_eq!(prompts.iter().filter(|p| *p == "a cat").count(), 2);
    assert_eq!(prompts.iter().filter(|p| *p == "a dog").count(), 2);
}

// ---------------------------------------------------------------------------
// Test: planning errors never reach the service
// ---------------------------------------------------------------------------

#[tokio::test]
async fn empty_prompt_is_rejected_before_submission() {
    let service = Arc::new(FakeService::new(1));
    let sink = Arc::new(CollectingSink::new());
    let mut session = session(service.clone(), sink, "", 1);

    let err = session.generate(&CancellationToken::new()).await.unwrap_err();

    assert_matches!(err, EngineError::Plan(PlanError::EmptyPrompt));
    assert!(service.calls.lock().unwrap().submitted.is_empty());
    assert!(session.history().entries().is_empty());
}

// ---------------------------------------------------------------------------
// Test: a failed batch leaves the session idle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn failed_batch_resets_session() {
    let mut fake = FakeService::new(100);
    fake.faulted_job = Some("job-0".into());
    let service = Arc::new(fake);
    let sink = Arc::new(CollectingSink::new());
    let mut session = session(service, sink, "castle", 1);

    assert!(session.generate(&CancellationToken::new()).await.is_err());
    assert!(!session.is_generating());
    assert!(!session.queue_status().done);
}

// ---------------------------------------------------------------------------
// Test: dreambooth trigger is prepended once
// ---------------------------------------------------------------------------

#[tokio::test]
async fn trigger_prepended_once() {
    let service = Arc::new(FakeService::new(1));
    let sink = Arc::new(CollectingSink::new());
    let mut session = session(service, sink, "a castle", 1);

    assert!(session.add_dreambooth_trigger(None));
    assert_eq!(session.request.prompt, "sdstyle, a castle");
    assert!(!session.add_dreambooth_trigger(None));
}

// ---------------------------------------------------------------------------
// Video runner
// ---------------------------------------------------------------------------

struct FakeVideo {
    statuses: Mutex<Vec<VideoStatus>>,
    cancelled: Mutex<Vec<String>>,
    /// Answer every status request with this HTTP error.
    status_error: Option<u16>,
}

impl FakeVideo {
    fn new(mut statuses: Vec<VideoStatus>) -> Self {
        statuses.reverse();
        Self {
            statuses: Mutex::new(statuses),
            cancelled: Mutex::new(Vec::new()),
            status_error: None,
        }
    }

    fn failing_status(status: u16) -> Self {
        Self {
            status_error: Some(status),
            ..Self::new(Vec::new())
        }
    }
}

#[async_trait]
impl VideoService for FakeVideo {
    async fn submit(&self, _request: &VideoRequest) -> Result<RemoteJobId, HordeApiError> {
        Ok("video-1".into())
    }

    async fn status(&self, _id: &str) -> Result<VideoStatus, HordeApiError> {
        if let Some(status) = self.status_error {
            return Err(HordeApiError::ApiError {
                status,
                message: "bad gateway".into(),
            });
        }
        let mut statuses = self.statuses.lock().unwrap();
        Ok(statuses.pop().unwrap_or(VideoStatus::Queued { queue_position: 1 }))
    }

    async fn cancel(&self, id: &str) -> Result<(), HordeApiError> {
        self.cancelled.lock().unwrap().push(id.to_string());
        Ok(())
    }
}

#[tokio::test]
async fn video_runs_through_phases() {
    let service = Arc::new(FakeVideo::new(vec![
        VideoStatus::RawFrames {
            frames_done: 10,
            frames_total: 50,
        },
        VideoStatus::Encoding { progress: 0.5 },
        VideoStatus::Done {
            video_url: "http://v/1.mp4".into(),
        },
    ]));
    let runner = VideoRunner::new(service, Duration::from_millis(1));

    let outcome = runner
        .run(&VideoRequest::default(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        outcome,
        VideoOutcome::Finished {
            video_id: "video-1".into(),
            video_url: "http://v/1.mp4".into(),
        }
    );
}

#[tokio::test]
async fn faulted_video_is_an_error() {
    let service = Arc::new(FakeVideo::new(vec![VideoStatus::Faulted {
        message: "out of memory".into(),
    }]));
    let runner = VideoRunner::new(service.clone(), Duration::from_millis(1));
    let mut events = runner.events().subscribe();

    let err = runner
        .run(&VideoRequest::default(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert_matches!(err, EngineError::VideoFaulted { ref message } if message == "out of memory");
    assert_eq!(*service.cancelled.lock().unwrap(), vec!["video-1".to_string()]);

    let mut failed = None;
    while let Ok(event) = events.try_recv() {
        if let EngineEvent::VideoFailed { message, .. } = event {
            failed = Some(message);
        }
    }
    assert_eq!(failed.as_deref(), Some("Failed to generate video: out of memory"));
}

#[tokio::test]
async fn failed_video_poll_cancels_remote_job() {
    let service = Arc::new(FakeVideo::failing_status(502));
    let runner = VideoRunner::new(service.clone(), Duration::from_millis(1));

    let err = runner
        .run(&VideoRequest::default(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert_matches!(err, EngineError::PollFailed { ref job_id, .. } if job_id == "video-1");
    assert_eq!(*service.cancelled.lock().unwrap(), vec!["video-1".to_string()]);
}

#[tokio::test]
async fn cancelled_video_is_cancelled_remotely() {
    let service = Arc::new(FakeVideo::new(Vec::new()));
    let runner = VideoRunner::new(service.clone(), Duration::from_millis(1));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let outcome = runner.run(&VideoRequest::default(), &cancel).await.unwrap();

    assert_matches!(outcome, VideoOutcome::Cancelled { .. });
    assert_eq!(*service.cancelled.lock().unwrap(), vec!["video-1".to_string()]);
}

#[tokio::test]
async fn invalid_video_request_rejected() {
    let service = Arc::new(FakeVideo::new(Vec::new()));
    let runner = VideoRunner::new(service, Duration::from_millis(1));
    let request = VideoRequest {
        fps: 0,
        ..Default::default()
    };

    let err = runner.run(&request, &CancellationToken::new()).await.unwrap_err();
    assert_matches!(err, EngineError::Validation(_));
}
