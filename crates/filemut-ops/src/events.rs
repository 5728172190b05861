//! Events emitted by running batches and filesystem invalidation notices.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::conflict::ConflictRequest;
use crate::operation::TaskRecord;
use crate::progress::{BatchReport, OperationProgress};
use crate::scheduler::BatchState;

/// Capacity of the change broadcast channel.
pub const CHANGE_CHANNEL_SIZE: usize = 1024;

/// Event sent through a batch's channel while it runs.
#[derive(Debug)]
pub enum BatchEvent {
    /// Progress update.
    Progress(OperationProgress),
    /// A collision needs a decision from the caller.
    Conflict(ConflictRequest),
    /// An entry reached a terminal state.
    TaskFinished(TaskRecord),
    /// The batch moved to a new lifecycle state.
    StateChanged(BatchState),
    /// The batch finished.
    Finished(BatchReport),
}

/// What happened to a path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeKind {
    Created,
    Deleted,
    Renamed { from: PathBuf },
}

/// Invalidation notice for caches keyed by path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// The affected path (the new path for renames).
    pub path: PathBuf,
    pub kind: ChangeKind,
}

/// Publishing side of the change broadcast.
///
/// Sending never blocks and never fails the caller; with no subscribers the
/// notice is dropped.
#[derive(Debug, Clone)]
pub struct ChangeSink {
    tx: broadcast::Sender<ChangeEvent>,
}

impl ChangeSink {
    /// Create a sink with its own channel.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANGE_CHANNEL_SIZE);
        Self { tx }
    }

    /// Subscribe to future change notices.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.tx.subscribe()
    }

    pub fn created(&self, path: &Path) {
        self.publish(path, ChangeKind::Created);
    }

    pub fn deleted(&self, path: &Path) {
        self.publish(path, ChangeKind::Deleted);
    }

    pub fn renamed(&self, from: &Path, to: &Path) {
        self.publish(
            to,
            ChangeKind::Renamed {
                from: from.to_path_buf(),
            },
        );
    }

    fn publish(&self, path: &Path, kind: ChangeKind) {
        let _ = self.tx.send(ChangeEvent {
            path: path.to_path_buf(),
            kind,
        });
    }
}

impl Default for ChangeSink {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_without_subscribers() {
        let sink = ChangeSink::new();
        sink.created(Path::new("/a"));
    }

    #[tokio::test]
    async fn test_subscribers_see_renames() {
        let sink = ChangeSink::new();
        let mut rx = sink.subscribe();
        sink.renamed(Path::new("/d/a"), Path::new("/d/b"));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.path, PathBuf::from("/d/b"));
        assert_eq!(
            event.kind,
            ChangeKind::Renamed {
                from: PathBuf::from("/d/a")
            }
        );
    }
}
