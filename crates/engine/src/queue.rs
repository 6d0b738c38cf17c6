//! Queue entries and slot accounting.

use chrono::Utc;
use horde_core::job::JobSpec;
use horde_core::status::{aggregate, AggregateStatus, RequestStatus};
use horde_core::types::{RemoteJobId, Timestamp};
use serde::Serialize;

/// Lifecycle of one queue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryState {
    Planned,
    Submitting,
    InFlight,
    Done,
    Faulted,
    Cancelled,
}

/// A job plus everything the engine learns about it.
///
/// The [`JobSpec`] never changes once queued; only the entry fields do.
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub job: JobSpec,
    pub job_id: Option<RemoteJobId>,
    /// Set once the job's images went through the result sink. Never reset.
    pub gathered: bool,
    pub status: Option<RequestStatus>,
    pub submitted_at: Option<Timestamp>,
    pub state: EntryState,
}

impl QueueEntry {
    pub fn new(job: JobSpec) -> Self {
        Self {
            job,
            job_id: None,
            gathered: false,
            status: None,
            submitted_at: None,
            state: EntryState::Planned,
        }
    }

    /// Whether the latest snapshot reports the job done.
    pub fn is_done(&self) -> bool {
        self.status.as_ref().is_some_and(|s| s.done)
    }

    pub(crate) fn mark_submitted(&mut self, job_id: RemoteJobId) {
        self.job_id = Some(job_id);
        self.submitted_at = Some(Utc::now());
        self.state = EntryState::InFlight;
    }

    pub(crate) fn mark_gathered(&mut self) {
        self.gathered = true;
    }
}

/// Build the queue for a batch.
pub fn queue_from_jobs(jobs: Vec<JobSpec>) -> Vec<QueueEntry> {
    jobs.into_iter().map(QueueEntry::new).collect()
}

/// Combined status of every entry.
pub fn queue_status(queue: &[QueueEntry]) -> AggregateStatus {
    aggregate(queue.iter().map(|e| e.status.as_ref()))
}

/// Size of the polling window over `entries`.
///
/// The longest prefix whose image counts sum to at most `max_images`,
/// capped at `max_requests`.
pub fn max_requests<'a, I>(entries: I, max_images: usize, max_requests: usize) -> usize
where
    I: IntoIterator<Item = &'a QueueEntry>,
{
    let mut images = 0;
    let mut requests = 0;
    for entry in entries {
        let next = images + entry.job.image_count();
        if next > max_images {
            break;
        }
        images = next;
        requests += 1;
    }
    requests.min(max_requests)
}


#[cfg(test)]
mod tests {
    use super::fixtures::job;
    use super::*;

    fn queue(len: usize) -> Vec<QueueEntry> {
        queue_from_jobs((0..len).map(|i| job(&format!("p{i}"))).collect())
    }

    // -- Window --

    #[test]
    fn window_capped_by_requests() {
        assert_eq!(max_requests(&queue(25), 100, 10), 10);
    }

    #[test]
    fn window_capped_by_images() {
        let mut entries = queue(5);
        for entry in &mut entries {
            entry.job.params.n = 40;
        }
        assert_eq!(max_requests(&entries, 100, 10), 2);
    }

    #[test]
    fn window_of_empty_queue() {
        assert_eq!(max_requests(&queue(0), 100, 10), 0);
    }

    // -- Entry --

    #[test]
    fn new_entry_is_planned() {
        let entry = QueueEntry::new(job("a"));
        assert_eq!(entry.state, EntryState::Planned);
        assert!(!entry.is_done());
        assert!(entry.job_id.is_none());
    }

    #[test]
    fn submitted_entry_is_in_flight() {
        let mut entry = QueueEntry::new(job("a"));
        entry.mark_submitted("abc".into());
        assert_eq!(entry.state, EntryState::InFlight);
        assert!(entry.submitted_at.is_some());
    }

    #[test]
    fn status_of_fresh_queue_not_done() {
        assert!(!queue_status(&queue(3)).done);
    }
}
