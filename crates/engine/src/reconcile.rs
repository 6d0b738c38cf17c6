//! Failure and cancellation paths of a batch.

use crate::engine::{Batch, BatchEngine};
use crate::error::EngineError;
use crate::events::EngineEvent;
use crate::queue::{EntryState, QueueEntry};

impl BatchEngine {
    /// Abort a batch after a fatal error.
    ///
    /// Every entry with a remote id is cancelled (errors are logged and
    /// skipped), the queue is cleared and a failure event published. No
    /// images are processed. Returns `error` for the caller to propagate.
    pub(crate) async fn fail(
        &self,
        queue: &mut Vec<QueueEntry>,
        batch: &mut Batch,
        error: EngineError,
    ) -> EngineError {
        tracing::error!(batch_id = %batch.id, error = %error, "Batch failed");

        for entry in queue.iter_mut() {
            let Some(job_id) = entry.job_id.as_deref() else {
                continue;
            };
            if let Err(source) = self.service.cancel(job_id).await {
                let err = EngineError::CancelFailed {
                    job_id: job_id.to_string(),
                    source,
                };
                tracing::warn!(batch_id = %batch.id, error = %err, "Cleanup cancel failed");
            }
            if entry.state != EntryState::Faulted {
                entry.state = EntryState::Cancelled;
            }
        }
        queue.clear();

        self.events.publish(EngineEvent::BatchFailed {
            batch_id: batch.id,
            message: error.to_string(),
        });
        error
    }

    /// Drain a batch after the user cancelled it.
    ///
    /// Each non-gathered entry with a remote id gets exactly one cancel
    /// call. Images returned by the cancel go through the sink, except for
    /// entries whose fetched images are already being processed. Entries
    /// never submitted are only marked cancelled.
    pub(crate) async fn drain_cancelled(&self, queue: &mut [QueueEntry], batch: &mut Batch) {
        batch.drain(queue);
        tracing::info!(batch_id = %batch.id, "Batch cancelled, collecting partial results");

        for index in 0..queue.len() {
            let entry = &mut queue[index];
            if entry.gathered {
                continue;
            }
            let sink_pending = entry.state == EntryState::Done;
            if !sink_pending {
                entry.state = EntryState::Cancelled;
            }
            let Some(job_id) = entry.job_id.clone() else {
                continue;
            };

            let generations = match self.service.cancel(&job_id).await {
                Ok(generations) => generations,
                Err(source) => {
                    let err = EngineError::CancelFailed { job_id, source };
                    tracing::warn!(batch_id = %batch.id, index, error = %err, "Cancel failed");
                    continue;
                }
            };
            if sink_pending || generations.is_empty() {
                continue;
            }

            let records = self.records(&entry.job, &job_id, &generations);
            let count = records.len();
            match self.sink.process(records).await {
                Ok(()) => batch.images += count,
                Err(e) => tracing::error!(batch_id = %batch.id, index, error = %e, "Result sink failed"),
            }
            entry.mark_gathered();
        }

        batch.finish_outstanding(queue).await;
    }
}
