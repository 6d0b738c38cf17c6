//! Engine progress events, fanned out over a `tokio::sync::broadcast`
//! channel.

use horde_core::status::AggregateStatus;
use horde_core::video::VideoStatus;
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// EngineEvent
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    BatchStarted {
        batch_id: Uuid,
        jobs: usize,
    },
    JobSubmitted {
        batch_id: Uuid,
        index: usize,
        job_id: String,
    },
    JobCompleted {
        batch_id: Uuid,
        index: usize,
        job_id: String,
        images: usize,
    },
    /// Emitted after every polled entry.
    Progress {
        batch_id: Uuid,
        status: AggregateStatus,
        elapsed_secs: f64,
    },
    BatchFinished {
        batch_id: Uuid,
        images: usize,
    },
    BatchCancelled {
        batch_id: Uuid,
        images: usize,
    },
    BatchFailed {
        batch_id: Uuid,
        message: String,
    },
    VideoProgress {
        video_id: String,
        status: VideoStatus,
    },
    VideoFailed {
        video_id: String,
        message: String,
    },
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 256;

/// Fan-out of [`EngineEvent`]s to any number of subscribers.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    /// When the buffer is full, slow receivers observe
    /// `RecvError::Lagged` and skip the oldest events.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event. Dropped silently when nobody listens.
    pub fn publish(&self, event: EngineEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
