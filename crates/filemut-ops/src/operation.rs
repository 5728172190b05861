//! Batch requests, transfer tasks and their outcomes.

use std::path::PathBuf;

use compact_str::CompactString;
use serde::{Deserialize, Serialize};

use filemut_core::{EngineError, Entry, ErrorKind, Location};
use filemut_walk::WalkCheckpoint;

/// The action a batch applies to each of its sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
pub enum BatchAction {
    /// Copy sources into the destination directory.
    Copy,
    /// Move sources into the destination directory.
    Move,
    /// Delete sources, to the system trash unless `permanent`.
    Delete { permanent: bool },
    /// Create links to the sources inside the destination directory.
    Link { symbolic: bool },
}

/// A batch operation requested by a caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRequest {
    /// Paths to operate on.
    pub sources: Vec<PathBuf>,
    /// Destination directory (unused for deletes).
    pub destination: Option<PathBuf>,
    /// What to do.
    pub action: BatchAction,
    /// Resume a copy from a previously reported position.
    #[serde(default)]
    pub checkpoint: Option<WalkCheckpoint>,
}

impl BatchRequest {
    /// Create a copy request.
    pub fn copy(sources: Vec<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self::with_destination(sources, destination, BatchAction::Copy)
    }

    /// Create a move request.
    pub fn move_to(sources: Vec<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self::with_destination(sources, destination, BatchAction::Move)
    }

    /// Create a delete request.
    pub fn delete(targets: Vec<PathBuf>, permanent: bool) -> Self {
        Self {
            sources: targets,
            destination: None,
            action: BatchAction::Delete { permanent },
            checkpoint: None,
        }
    }

    /// Create a link request.
    pub fn link(sources: Vec<PathBuf>, destination: impl Into<PathBuf>, symbolic: bool) -> Self {
        Self::with_destination(sources, destination, BatchAction::Link { symbolic })
    }

    /// Resume from the checkpoint of an earlier, interrupted run.
    pub fn resume_from(mut self, checkpoint: WalkCheckpoint) -> Self {
        self.checkpoint = Some(checkpoint);
        self
    }

    fn with_destination(
        sources: Vec<PathBuf>,
        destination: impl Into<PathBuf>,
        action: BatchAction,
    ) -> Self {
        Self {
            sources,
            destination: Some(destination.into()),
            action,
            checkpoint: None,
        }
    }
}

/// The action carried out for a single entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskAction {
    Copy,
    Move,
    Delete { permanent: bool },
    Link { symbolic: bool },
    Rename { new_name: CompactString },
}

impl From<BatchAction> for TaskAction {
    fn from(action: BatchAction) -> Self {
        match action {
            BatchAction::Copy => Self::Copy,
            BatchAction::Move => Self::Move,
            BatchAction::Delete { permanent } => Self::Delete { permanent },
            BatchAction::Link { symbolic } => Self::Link { symbolic },
        }
    }
}

/// One unit of work: a source entry, where it goes and what happens to it.
#[derive(Debug, Clone)]
pub struct TransferTask {
    pub source: Entry,
    pub destination: Option<Location>,
    pub action: TaskAction,
}

impl TransferTask {
    /// Create a new task.
    pub fn new(source: Entry, destination: Option<Location>, action: TaskAction) -> Self {
        Self {
            source,
            destination,
            action,
        }
    }
}

/// Terminal state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
pub enum TaskStatus {
    Succeeded,
    Skipped,
    Failed,
    Cancelled,
}

/// An error attached to one task in a report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskError {
    /// The path that caused the error.
    pub path: PathBuf,
    /// Error category.
    pub kind: ErrorKind,
    /// A human-readable error message.
    pub message: String,
}

impl TaskError {
    /// Create a new task error.
    pub fn new(path: impl Into<PathBuf>, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind,
            message: message.into(),
        }
    }

    /// Capture an engine error, falling back to `path` when it names none.
    pub fn from_engine(path: impl Into<PathBuf>, error: &EngineError) -> Self {
        let path = error
            .path()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| path.into());
        Self::new(path, error.kind(), error.to_string())
    }
}

impl std::fmt::Display for TaskError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path.display(), self.message)
    }
}

/// Final record of one task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub source: PathBuf,
    pub destination: Option<PathBuf>,
    pub action: TaskAction,
    pub status: TaskStatus,
    /// Why the task did not succeed (also set for notable skips).
    pub error: Option<TaskError>,
    /// Bytes written for this task.
    pub bytes: u64,
}

impl TaskRecord {
    /// Record a successful task.
    pub fn succeeded(
        source: impl Into<PathBuf>,
        destination: Option<PathBuf>,
        action: TaskAction,
        bytes: u64,
    ) -> Self {
        Self {
            source: source.into(),
            destination,
            action,
            status: TaskStatus::Succeeded,
            error: None,
            bytes,
        }
    }

    /// Record a task that did not succeed.
    pub fn unsuccessful(
        source: impl Into<PathBuf>,
        destination: Option<PathBuf>,
        action: TaskAction,
        status: TaskStatus,
        error: Option<TaskError>,
    ) -> Self {
        Self {
            source: source.into(),
            destination,
            action,
            status,
            error,
            bytes: 0,
        }
    }
}
