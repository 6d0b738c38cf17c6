//! Bounded-concurrency submission and polling loop.
//!
//! [`BatchEngine::run`] walks the queue in passes. Each pass takes the
//! non-gathered entries, limits them to the polling window (see
//! [`max_requests`]) and, in queue order, submits entries without a remote
//! id, polls them, and fetches finished ones. Fetched images go to the
//! [`ResultSink`] on spawned tasks which report back over an mpsc channel;
//! that report is the only thing that marks an entry gathered.
//!
//! Cancellation is checked at the top of every pass and around every
//! network call. Fatal errors go through the failure path in
//! [`crate::reconcile`] before they are returned.

use std::sync::Arc;
use std::time::{Duration, Instant};

use horde_api::GenerationService;
use horde_core::job::JobSpec;
use horde_core::record::ImageRecord;
use horde_core::status::Generation;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::EngineError;
use crate::events::{EngineEvent, EventBus};
use crate::queue::{max_requests, queue_status, EntryState, QueueEntry};
use crate::sink::ResultSink;

// ---------------------------------------------------------------------------
// Settings and report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    /// Sleep after every polled entry.
    pub poll_delay: Duration,
    /// Sleep while waiting for finished jobs to be gathered.
    pub settle_delay: Duration,
    pub max_parallel_images: usize,
    pub max_parallel_requests: usize,
    /// Images made without an account are always shared.
    pub anonymous: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            poll_delay: Duration::from_millis(500),
            settle_delay: Duration::from_millis(200),
            max_parallel_images: 100,
            max_parallel_requests: 10,
            anonymous: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchOutcome {
    Finished,
    Cancelled,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub batch_id: Uuid,
    pub outcome: BatchOutcome,
    pub jobs: usize,
    /// Images handed to the sink successfully.
    pub images: usize,
    pub elapsed_secs: f64,
}

// ---------------------------------------------------------------------------
// Per-run bookkeeping
// ---------------------------------------------------------------------------

/// Sent by a sink task once a job's images were processed.
#[derive(Debug)]
struct Gathered {
    index: usize,
    images: usize,
}

/// State of one [`BatchEngine::run`] call.
pub(crate) struct Batch {
    pub(crate) id: Uuid,
    started: Instant,
    gathered_tx: mpsc::UnboundedSender<Gathered>,
    gathered_rx: mpsc::UnboundedReceiver<Gathered>,
    /// Sink tasks that have not reported yet.
    outstanding: usize,
    pub(crate) images: usize,
}

impl Batch {
    fn new() -> Self {
        let (gathered_tx, gathered_rx) = mpsc::unbounded_channel();
        Self {
            id: Uuid::new_v4(),
            started: Instant::now(),
            gathered_tx,
            gathered_rx,
            outstanding: 0,
            images: 0,
        }
    }

    fn elapsed_secs(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    fn spawn_sink(&mut self, sink: Arc<dyn ResultSink>, index: usize, records: Vec<ImageRecord>) {
        let tx = self.gathered_tx.clone();
        let batch_id = self.id;
        self.outstanding += 1;
        tokio::spawn(async move {
            let count = records.len();
            let images = match sink.process(records).await {
                Ok(()) => count,
                Err(e) => {
                    tracing::error!(%batch_id, index, error = %e, "Result sink failed");
                    0
                }
            };
            let _ = tx.send(Gathered { index, images });
        });
    }

    fn apply(&mut self, queue: &mut [QueueEntry], gathered: Gathered) {
        self.outstanding = self.outstanding.saturating_sub(1);
        self.images += gathered.images;
        if let Some(entry) = queue.get_mut(gathered.index) {
            entry.mark_gathered();
        }
    }

    /// Apply every report already waiting in the channel.
    pub(crate) fn drain(&mut self, queue: &mut [QueueEntry]) {
        while let Ok(gathered) = self.gathered_rx.try_recv() {
            self.apply(queue, gathered);
        }
    }

    /// Wait up to `delay` for one sink report.
    async fn wait_for_gather(
        &mut self,
        queue: &mut [QueueEntry],
        delay: Duration,
        cancel: &CancellationToken,
    ) {
        let gathered = tokio::select! {
            _ = cancel.cancelled() => None,
            _ = tokio::time::sleep(delay) => None,
            gathered = self.gathered_rx.recv() => gathered,
        };
        if let Some(gathered) = gathered {
            self.apply(queue, gathered);
        }
    }

    /// Wait for every spawned sink task to report.
    pub(crate) async fn finish_outstanding(&mut self, queue: &mut [QueueEntry]) {
        while self.outstanding > 0 {
            match self.gathered_rx.recv().await {
                Some(gathered) => self.apply(queue, gathered),
                None => break,
            }
        }
    }
}

// ---------------------------------------------------------------------------
// BatchEngine
// ---------------------------------------------------------------------------

pub struct BatchEngine {
    pub(crate) service: Arc<dyn GenerationService>,
    pub(crate) sink: Arc<dyn ResultSink>,
    pub(crate) settings: EngineSettings,
    pub(crate) events: EventBus,
}

/// What happened to one polled entry.
enum Polled {
    Checked,
    Interrupted,
}

impl BatchEngine {
    pub fn new(
        service: Arc<dyn GenerationService>,
        sink: Arc<dyn ResultSink>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            service,
            sink,
            settings,
            events: EventBus::default(),
        }
    }

    /// Publish on an existing bus instead of a private one.
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Run `queue` to completion, cancellation or failure.
    ///
    /// On success every entry is gathered. On cancellation each
    /// non-gathered entry with a remote id is cancelled once and its
    /// partial images go to the sink. On failure outstanding jobs are
    /// cancelled, the queue is cleared and the error returned.
    pub async fn run(
        &self,
        queue: &mut Vec<QueueEntry>,
        cancel: &CancellationToken,
    ) -> Result<BatchReport, EngineError> {
        let mut batch = Batch::new();
        tracing::info!(batch_id = %batch.id, jobs = queue.len(), "Batch started");
        self.events.publish(EngineEvent::BatchStarted {
            batch_id: batch.id,
            jobs: queue.len(),
        });

        loop {
            batch.drain(queue);
            if cancel.is_cancelled() || queue.iter().all(|e| e.gathered) {
                break;
            }
            if queue_status(queue).done {
                batch
                    .wait_for_gather(queue, self.settings.settle_delay, cancel)
                    .await;
                continue;
            }

            let pending: Vec<usize> = queue
                .iter()
                .enumerate()
                .filter(|(_, e)| !e.gathered)
                .map(|(i, _)| i)
                .collect();
            let window = max_requests(
                pending.iter().map(|&i| &queue[i]),
                self.settings.max_parallel_images,
                self.settings.max_parallel_requests,
            )
            .clamp(1, pending.len());

            let mut polled = 0;
            for &index in &pending[..window] {
                if cancel.is_cancelled() {
                    break;
                }
                if queue[index].is_done() {
                    continue;
                }

                match self.poll_entry(queue, index, &mut batch, cancel).await {
                    Ok(Polled::Checked) => polled += 1,
                    Ok(Polled::Interrupted) => break,
                    Err(err) => return Err(self.fail(queue, &mut batch, err).await),
                }

                if !self.pause(self.settings.poll_delay, cancel).await {
                    break;
                }
                batch.drain(queue);
                self.publish_progress(queue, &batch);
            }

            if polled == 0 && !cancel.is_cancelled() {
                batch
                    .wait_for_gather(queue, self.settings.settle_delay, cancel)
                    .await;
            }
        }

        let outcome = if cancel.is_cancelled() {
            self.drain_cancelled(queue, &mut batch).await;
            self.events.publish(EngineEvent::BatchCancelled {
                batch_id: batch.id,
                images: batch.images,
            });
            BatchOutcome::Cancelled
        } else {
            self.events.publish(EngineEvent::BatchFinished {
                batch_id: batch.id,
                images: batch.images,
            });
            BatchOutcome::Finished
        };

        let report = BatchReport {
            batch_id: batch.id,
            outcome,
            jobs: queue.len(),
            images: batch.images,
            elapsed_secs: batch.elapsed_secs(),
        };
        tracing::info!(
            batch_id = %report.batch_id,
            outcome = ?report.outcome,
            images = report.images,
            elapsed_secs = report.elapsed_secs,
            "Batch ended",
        );
        Ok(report)
    }

    /// Submit (when needed), check and, once done, fetch one entry.
    async fn poll_entry(
        &self,
        queue: &mut [QueueEntry],
        index: usize,
        batch: &mut Batch,
        cancel: &CancellationToken,
    ) -> Result<Polled, EngineError> {
        let entry = &mut queue[index];

        let job_id = match entry.job_id.clone() {
            Some(job_id) => job_id,
            None => {
                entry.state = EntryState::Submitting;
                let job_id = self
                    .service
                    .submit(&entry.job)
                    .await
                    .map_err(|source| EngineError::SubmitFailed { index, source })?;
                tracing::info!(batch_id = %batch.id, index, job_id = %job_id, "Job submitted");
                entry.mark_submitted(job_id.clone());
                self.events.publish(EngineEvent::JobSubmitted {
                    batch_id: batch.id,
                    index,
                    job_id: job_id.clone(),
                });
                if cancel.is_cancelled() {
                    return Ok(Polled::Interrupted);
                }
                job_id
            }
        };

        let status = self
            .service
            .check(&job_id)
            .await
            .map_err(|source| EngineError::PollFailed {
                job_id: job_id.clone(),
                source,
            })?;
        if cancel.is_cancelled() {
            return Ok(Polled::Interrupted);
        }
        if status.faulted {
            entry.state = EntryState::Faulted;
            return Err(EngineError::Faulted { job_id });
        }
        if !status.is_possible {
            return Err(EngineError::NotPossible { job_id });
        }

        tracing::debug!(
            index,
            job_id = %job_id,
            queue_position = status.queue_position,
            wait_time = status.wait_time,
            done = status.done,
            "Job checked",
        );
        let done = status.done;
        entry.status = Some(status);
        if !done {
            return Ok(Polled::Checked);
        }

        entry.state = EntryState::Done;
        let generations = self
            .service
            .fetch(&job_id)
            .await
            .map_err(|source| EngineError::FetchFailed {
                job_id: job_id.clone(),
                source,
            })?;
        let records = self.records(&entry.job, &job_id, &generations);
        tracing::info!(index, job_id = %job_id, images = records.len(), "Job finished");
        self.events.publish(EngineEvent::JobCompleted {
            batch_id: batch.id,
            index,
            job_id,
            images: records.len(),
        });
        batch.spawn_sink(Arc::clone(&self.sink), index, records);
        Ok(Polled::Checked)
    }

    pub(crate) fn records(
        &self,
        job: &JobSpec,
        job_id: &str,
        generations: &[Generation],
    ) -> Vec<ImageRecord> {
        generations
            .iter()
            .map(|generation| {
                let mut record = ImageRecord::from_generation(job, job_id, generation);
                record.shared_externally |= self.settings.anonymous;
                record
            })
            .collect()
    }

    /// Sleep for `delay`. Returns `false` when cancelled first.
    async fn pause(&self, delay: Duration, cancel: &CancellationToken) -> bool {
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    fn publish_progress(&self, queue: &[QueueEntry], batch: &Batch) {
        self.events.publish(EngineEvent::Progress {
            batch_id: batch.id,
            status: queue_status(queue),
            elapsed_secs: batch.elapsed_secs(),
        });
    }
}
