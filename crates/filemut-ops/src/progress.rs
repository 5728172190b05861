//! Progress reporting and final reports for batch operations.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use filemut_walk::WalkCheckpoint;

use crate::operation::{BatchAction, TaskError, TaskRecord, TaskStatus};
use crate::scheduler::{BatchId, BatchState};
use crate::trash::TrashRecord;

/// Progress information for an ongoing batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationProgress {
    /// The batch action.
    pub action: BatchAction,
    /// Number of bytes processed so far.
    pub bytes_done: u64,
    /// Total bytes to process (may be 0 if unknown).
    pub bytes_total: u64,
    /// Number of entries in a terminal state.
    pub items_done: u64,
    /// Total number of entries to process.
    pub items_total: u64,
    /// The entry currently being processed.
    pub current_entry: Option<PathBuf>,
}

impl OperationProgress {
    /// Create a new progress tracker for a batch.
    pub fn new(action: BatchAction, items_total: u64, bytes_total: u64) -> Self {
        Self {
            action,
            bytes_done: 0,
            bytes_total,
            items_done: 0,
            items_total,
            current_entry: None,
        }
    }

    /// Get the progress as a percentage (0.0 to 100.0).
    pub fn percentage(&self) -> f64 {
        if self.bytes_total > 0 {
            (self.bytes_done as f64 / self.bytes_total as f64 * 100.0).min(100.0)
        } else if self.items_total > 0 {
            (self.items_done as f64 / self.items_total as f64 * 100.0).min(100.0)
        } else {
            0.0
        }
    }

    /// Update the entry being processed.
    pub fn set_current_entry(&mut self, path: Option<PathBuf>) {
        self.current_entry = path;
    }

    /// Count finished entries and their bytes.
    pub fn complete_items(&mut self, items: u64, bytes: u64) {
        self.items_done += items;
        self.bytes_done += bytes;
    }
}

/// Result of a finished batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    /// Which batch this is.
    pub id: BatchId,
    /// The batch action.
    pub action: BatchAction,
    /// Terminal state.
    pub state: BatchState,
    /// Every entry the batch reached, in dispatch order.
    pub records: Vec<TaskRecord>,
    /// Total bytes processed.
    pub bytes_done: u64,
    /// Error that stopped the batch before any mutation, if any.
    pub error: Option<TaskError>,
    /// Items moved into the system trash, for later restoration.
    pub trashed: Vec<TrashRecord>,
    /// Walk position reached; pass to [`BatchRequest::resume_from`](crate::BatchRequest::resume_from).
    pub checkpoint: WalkCheckpoint,
}

impl BatchReport {
    fn count(&self, status: TaskStatus) -> usize {
        self.records.iter().filter(|r| r.status == status).count()
    }

    /// Number of entries that succeeded.
    pub fn succeeded(&self) -> usize {
        self.count(TaskStatus::Succeeded)
    }

    /// Number of entries skipped by conflict decisions or earlier failures.
    pub fn skipped(&self) -> usize {
        self.count(TaskStatus::Skipped)
    }

    /// Number of entries that failed.
    pub fn failed(&self) -> usize {
        self.count(TaskStatus::Failed)
    }

    /// Number of entries discarded by cancellation.
    pub fn cancelled(&self) -> usize {
        self.count(TaskStatus::Cancelled)
    }

    /// Check if the batch completed without failures.
    pub fn is_success(&self) -> bool {
        self.state == BatchState::Completed
    }

    /// Records with a given status.
    pub fn with_status(&self, status: TaskStatus) -> impl Iterator<Item = &TaskRecord> {
        self.records.iter().filter(move |r| r.status == status)
    }

    /// Get a human-readable summary of the batch.
    pub fn summary(&self) -> String {
        let verb = match self.action {
            BatchAction::Copy => "Copied",
            BatchAction::Move => "Moved",
            BatchAction::Delete { permanent: true } => "Deleted",
            BatchAction::Delete { permanent: false } => "Trashed",
            BatchAction::Link { .. } => "Linked",
        };

        if let Some(error) = &self.error {
            return format!("{} nothing: {}", verb, error.message);
        }

        let mut summary = format!("{} {} items", verb, self.succeeded());
        for (count, label) in [
            (self.skipped(), "skipped"),
            (self.failed(), "failed"),
            (self.cancelled(), "cancelled"),
        ] {
            if count > 0 {
                summary.push_str(&format!(", {} {}", count, label));
            }
        }
        summary
    }
}
