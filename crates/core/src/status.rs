//! Poll status snapshots, finished generations, and the aggregate status
//! reducer.
//!
//! [`aggregate`] folds the latest snapshot of every queued job into one
//! [`AggregateStatus`] for progress display. It is recomputed on demand
//! and holds no state of its own.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// Response of `GET /generate/check/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestStatus {
    pub finished: u32,
    pub processing: u32,
    pub restarted: u32,
    pub waiting: u32,
    pub done: bool,
    pub faulted: bool,
    pub is_possible: bool,
    pub queue_position: f64,
    pub wait_time: f64,
    pub kudos: f64,
}

impl Default for RequestStatus {
    fn default() -> Self {
        Self {
            finished: 0,
            processing: 0,
            restarted: 0,
            waiting: 0,
            done: false,
            faulted: false,
            is_possible: true,
            queue_position: 0.0,
            wait_time: 0.0,
            kudos: 0.0,
        }
    }
}

/// One finished image as returned by `GET|DELETE /generate/status/{id}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Generation {
    /// Image URL (R2 upload) or base64 payload.
    pub img: String,
    pub seed: String,
    pub model: String,
    pub worker_id: String,
    pub worker_name: String,
    /// Service-side image id.
    pub id: String,
    pub censored: bool,
}

// ---------------------------------------------------------------------------
// Aggregate status
// ---------------------------------------------------------------------------

/// Combined progress of every entry in the queue.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateStatus {
    pub entries: usize,
    pub finished: u32,
    pub processing: u32,
    pub restarted: u32,
    pub waiting: u32,
    /// Mean queue position, rounded.
    pub queue_position: f64,
    /// Mean wait time in seconds.
    pub wait_time: f64,
    pub kudos: f64,
    /// True when any entry faulted.
    pub faulted: bool,
    /// True when every reporting entry considers the job possible.
    pub is_possible: bool,
    /// True only when there is at least one entry and every entry is done.
    pub done: bool,
}

impl Default for AggregateStatus {
    fn default() -> Self {
        Self {
            entries: 0,
            finished: 0,
            processing: 0,
            restarted: 0,
            waiting: 0,
            queue_position: 0.0,
            wait_time: 0.0,
            kudos: 0.0,
            faulted: false,
            is_possible: true,
            done: false,
        }
    }
}

/// Merge per-entry snapshots into one status.
///
/// Each item is one queue entry; `None` means the entry has not been
/// polled yet. Numeric fields are summed, then queue position and wait
/// time are divided by the entry count (a plain mean, not weighted by
/// image count). `faulted` is OR'd, other booleans are AND'd. An empty
/// queue, or any entry without a done snapshot, is never done.
pub fn aggregate<'a, I>(statuses: I) -> AggregateStatus
where
    I: IntoIterator<Item = Option<&'a RequestStatus>>,
{
    let mut merged = AggregateStatus {
        done: true,
        ..Default::default()
    };

    for status in statuses {
        merged.entries += 1;
        let Some(status) = status else {
            merged.done = false;
            continue;
        };
        merged.finished += status.finished;
        merged.processing += status.processing;
        merged.restarted += status.restarted;
        merged.waiting += status.waiting;
        merged.queue_position += status.queue_position;
        merged.wait_time += status.wait_time;
        merged.kudos += status.kudos;
        merged.faulted |= status.faulted;
        merged.is_possible &= status.is_possible;
        merged.done &= status.done;
    }

    if merged.entries == 0 {
        merged.done = false;
        return merged;
    }

    let count = merged.entries as f64;
    merged.queue_position = (merged.queue_position / count).round();
    merged.wait_time /= count;
    merged
}

impl AggregateStatus {
    /// Share of entries that have finished, in `0.0..=1.0`.
    pub fn progress(&self) -> f64 {
        if self.entries == 0 {
            return 0.0;
        }
        let total = self.finished + self.processing + self.waiting;
        if total == 0 {
            return 0.0;
        }
        self.finished as f64 / total as f64
    }
}
