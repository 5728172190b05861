//! Conflict detection and resolution for file operations.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use filemut_core::EngineError;

use crate::events::BatchEvent;

/// A conflict detected during a file operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    /// The source path being operated on.
    pub source: PathBuf,
    /// The destination path where the conflict exists.
    pub destination: PathBuf,
    /// The kind of conflict.
    pub kind: ConflictKind,
}

impl Conflict {
    /// Create a new conflict.
    pub fn new(source: PathBuf, destination: PathBuf, kind: ConflictKind) -> Self {
        Self {
            source,
            destination,
            kind,
        }
    }

    /// Inspect `destination` and describe what is in the way.
    pub fn at(source: &Path, destination: &Path) -> Self {
        let kind = match std::fs::symlink_metadata(destination) {
            Ok(meta) if meta.is_dir() => ConflictKind::DirectoryExists,
            _ => ConflictKind::FileExists,
        };
        Self::new(source.to_path_buf(), destination.to_path_buf(), kind)
    }
}

/// The kind of conflict encountered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictKind {
    /// A file or link already exists at the destination.
    FileExists,
    /// A directory already exists where a non-directory would go.
    DirectoryExists,
}

impl std::fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FileExists => write!(f, "File already exists"),
            Self::DirectoryExists => write!(f, "Directory already exists"),
        }
    }
}

/// How to resolve a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictDecision {
    /// Replace the existing item.
    Overwrite,
    /// Replace this and every later collision in the batch.
    OverwriteAll,
    /// Leave the existing item and skip this source.
    Skip,
    /// Skip this and every later collision in the batch.
    SkipAll,
    /// Place the new item under a free name (e.g., "file (1).txt").
    AutoRename,
    /// Auto-rename this and every later collision in the batch.
    AutoRenameAll,
    /// Stop the batch.
    Abort,
}

impl ConflictDecision {
    /// Check if this decision applies to all remaining conflicts.
    pub fn is_sticky(&self) -> bool {
        matches!(self, Self::OverwriteAll | Self::SkipAll | Self::AutoRenameAll)
    }

    /// Convert a sticky decision to its single-item equivalent.
    pub fn to_single(&self) -> Self {
        match self {
            Self::OverwriteAll => Self::Overwrite,
            Self::SkipAll => Self::Skip,
            Self::AutoRenameAll => Self::AutoRename,
            _ => *self,
        }
    }
}

/// A pending question to the batch's caller.
///
/// Answer with [`respond`](Self::respond); dropping the request counts as
/// [`ConflictDecision::Skip`].
#[derive(Debug)]
pub struct ConflictRequest {
    pub conflict: Conflict,
    reply: oneshot::Sender<ConflictDecision>,
}

impl ConflictRequest {
    /// Deliver the caller's decision to the suspended batch.
    pub fn respond(self, decision: ConflictDecision) {
        let _ = self.reply.send(decision);
    }
}

/// Where decisions come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictMode {
    /// Ask the caller through the batch's event channel.
    Ask,
    /// Apply the same decision to every collision.
    Always(ConflictDecision),
}

/// Per-batch collision decision procedure.
///
/// A sticky "-all" answer is remembered for the rest of the batch that owns
/// this policy.
#[derive(Debug, Clone)]
pub struct ConflictPolicy {
    mode: ConflictMode,
    sticky: Option<ConflictDecision>,
}

impl ConflictPolicy {
    /// Ask the caller on every collision until it answers with an "-all".
    pub fn interactive() -> Self {
        Self {
            mode: ConflictMode::Ask,
            sticky: None,
        }
    }

    /// Always apply `decision`.
    pub fn fixed(decision: ConflictDecision) -> Self {
        Self {
            mode: ConflictMode::Always(decision.to_single()),
            sticky: None,
        }
    }

    /// The unattended default: auto-rename, never overwrite silently.
    pub fn non_interactive() -> Self {
        Self::fixed(ConflictDecision::AutoRename)
    }

    /// The configured mode.
    pub fn mode(&self) -> ConflictMode {
        self.mode
    }

    /// The remembered "-all" decision, if any.
    pub fn sticky(&self) -> Option<ConflictDecision> {
        self.sticky
    }

    /// Decide what to do about `conflict`.
    ///
    /// Returns `Ok(None)` when the destination is free. In [`ConflictMode::Ask`]
    /// this suspends until the caller answers the [`BatchEvent::Conflict`]
    /// request or `cancel` fires, which yields [`EngineError::Cancelled`].
    pub async fn resolve(
        &mut self,
        conflict: Conflict,
        destination_exists: bool,
        events: &mpsc::Sender<BatchEvent>,
        cancel: &CancellationToken,
    ) -> Result<Option<ConflictDecision>, EngineError> {
        if !destination_exists {
            return Ok(None);
        }
        if let Some(decision) = self.sticky {
            return Ok(Some(decision.to_single()));
        }

        let decision = match self.mode {
            ConflictMode::Always(decision) => decision,
            ConflictMode::Ask => {
                let (reply, answer) = oneshot::channel();
                let request = ConflictRequest { conflict, reply };

                tokio::select! {
                    sent = events.send(BatchEvent::Conflict(request)) => {
                        if sent.is_err() {
                            debug!("no listener for conflict request, skipping");
                            return Ok(Some(ConflictDecision::Skip));
                        }
                    }
                    _ = cancel.cancelled() => return Err(EngineError::Cancelled),
                }

                tokio::select! {
                    answer = answer => answer.unwrap_or(ConflictDecision::Skip),
                    _ = cancel.cancelled() => return Err(EngineError::Cancelled),
                }
            }
        };

        if decision.is_sticky() {
            debug!(?decision, "remembering conflict decision for the rest of the batch");
            self.sticky = Some(decision);
        }
        Ok(Some(decision.to_single()))
    }
}

impl Default for ConflictPolicy {
    fn default() -> Self {
        Self::non_interactive()
    }
}

/// Generate an auto-renamed path to avoid conflicts.
///
/// For "file.txt", tries "file (1).txt", "file (2).txt", etc.
pub fn auto_rename_path(path: &Path) -> PathBuf {
    let parent = path.parent().unwrap_or(Path::new(""));
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = path.extension().map(|e| e.to_string_lossy().into_owned());

    let with_suffix = |suffix: &str| match &extension {
        Some(ext) => format!("{} {}.{}", stem, suffix, ext),
        None => format!("{} {}", stem, suffix),
    };

    for i in 1..10_000 {
        let new_path = parent.join(with_suffix(&format!("({})", i)));
        if std::fs::symlink_metadata(&new_path).is_err() {
            return new_path;
        }
    }

    // Fallback: use timestamp
    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    parent.join(with_suffix(&format!("({})", timestamp)))
}
