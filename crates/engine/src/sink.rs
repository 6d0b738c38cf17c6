//! Destination for finished images.

use async_trait::async_trait;
use horde_core::record::ImageRecord;
use tokio::sync::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("Failed to store images: {0}")]
    Store(String),
}

/// Receives the images of each finished job.
///
/// Called from spawned tasks, so implementations must be shareable.
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn process(&self, records: Vec<ImageRecord>) -> Result<(), SinkError>;
}

/// Keeps every record in memory.
#[derive(Debug, Default)]
pub struct CollectingSink {
    records: Mutex<Vec<ImageRecord>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn records(&self) -> Vec<ImageRecord> {
        self.records.lock().await.clone()
    }

    /// Take the collected records, leaving the sink empty.
    pub async fn take(&self) -> Vec<ImageRecord> {
        std::mem::take(&mut *self.records.lock().await)
    }
}

#[async_trait]
impl ResultSink for CollectingSink {
    async fn process(&self, records: Vec<ImageRecord>) -> Result<(), SinkError> {
        self.records.lock().await.extend(records);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use horde_core::status::Generation;

    use super::*;
    use crate::queue::fixtures::job;

    #[tokio::test]
    async fn collecting_sink_keeps_records() {
        let sink = CollectingSink::new();
        let record = ImageRecord::from_generation(&job("a"), "j1", &Generation::default());
        sink.process(vec![record.clone()]).await.unwrap();
        sink.process(vec![record]).await.unwrap();
        assert_eq!(sink.records().await.len(), 2);
        assert_eq!(sink.take().await.len(), 2);
        assert!(sink.records().await.is_empty());
    }
}
