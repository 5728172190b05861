//! Error taxonomy for file mutation operations.

use std::fmt;
use std::path::{Path, PathBuf};

use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced by the engine, its primitives and its planners.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Read or write failure on a single entry.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The entry vanished between discovery and use.
    #[error("Path not found: {path}")]
    NotFound { path: PathBuf },

    /// The destination volume cannot hold the data.
    #[error("Insufficient space at {path}: {required} bytes required, {available} available")]
    InsufficientSpace {
        path: PathBuf,
        required: u64,
        available: u64,
    },

    /// An atomic move or hard link was requested across volumes.
    #[error("{source_path} and {destination} are on different volumes")]
    CrossVolume {
        source_path: PathBuf,
        destination: PathBuf,
    },

    /// The destination is structurally illegal for this source.
    #[error("Invalid target {destination} for {source_path}: {reason}")]
    InvalidTarget {
        source_path: PathBuf,
        destination: PathBuf,
        reason: String,
    },

    /// A directory still had children when it was about to be removed.
    #[error("Directory not empty: {path}")]
    NotEmpty { path: PathBuf },

    /// A name violates the filesystem naming rules.
    #[error("Invalid name '{name}': {reason}")]
    InvalidName { name: CompactString, reason: String },

    /// Something already occupies the destination.
    #[error("Already exists: {path}")]
    AlreadyExists { path: PathBuf },

    /// A bulk rename plan contains collisions.
    #[error("Rename plan has {} conflict(s)", conflicts.len())]
    PlanConflict { conflicts: Vec<PlanCollision> },

    /// A rename template could not be parsed.
    #[error("Invalid template '{template}': {reason}")]
    TemplateInvalid { template: String, reason: String },

    /// A trashed item no longer knows where it came from.
    #[error("Original location of trash item {id} is unknown")]
    RestoreTargetUnknown { id: String },

    /// A lifecycle control was issued in a state that does not allow it.
    #[error("Cannot {action} a batch that is {state}")]
    InvalidTransition { action: &'static str, state: String },

    /// The operation was cancelled before this item ran.
    #[error("Operation cancelled")]
    Cancelled,
}

impl EngineError {
    /// Create an I/O error with path context, mapping well-known kinds.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        use std::io::ErrorKind;

        let path = path.into();
        match source.kind() {
            ErrorKind::NotFound => Self::NotFound { path },
            ErrorKind::AlreadyExists => Self::AlreadyExists { path },
            ErrorKind::DirectoryNotEmpty => Self::NotEmpty { path },
            ErrorKind::StorageFull => Self::InsufficientSpace {
                path,
                required: 0,
                available: 0,
            },
            _ => Self::Io { path, source },
        }
    }

    /// Create an invalid name error.
    pub fn invalid_name(name: impl Into<CompactString>, reason: impl Into<String>) -> Self {
        Self::InvalidName {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error concerns a single item and leaves the batch running.
    pub fn is_per_task(&self) -> bool {
        !matches!(
            self,
            Self::PlanConflict { .. }
                | Self::TemplateInvalid { .. }
                | Self::InvalidTransition { .. }
                | Self::Cancelled
        )
    }

    /// The path this error is about, when it names one.
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Io { path, .. }
            | Self::NotFound { path }
            | Self::InsufficientSpace { path, .. }
            | Self::NotEmpty { path }
            | Self::AlreadyExists { path } => Some(path),
            Self::CrossVolume { source_path, .. } | Self::InvalidTarget { source_path, .. } => {
                Some(source_path)
            }
            _ => None,
        }
    }

    /// Short machine-friendly category name.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Io { .. } | Self::NotFound { .. } => ErrorKind::Io,
            Self::InsufficientSpace { .. } => ErrorKind::InsufficientSpace,
            Self::CrossVolume { .. } => ErrorKind::CrossVolume,
            Self::InvalidTarget { .. } => ErrorKind::InvalidTarget,
            Self::NotEmpty { .. } => ErrorKind::NotEmpty,
            Self::InvalidName { .. } => ErrorKind::InvalidName,
            Self::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            Self::PlanConflict { .. } => ErrorKind::PlanConflict,
            Self::TemplateInvalid { .. } => ErrorKind::TemplateInvalid,
            Self::RestoreTargetUnknown { .. } => ErrorKind::RestoreTargetUnknown,
            Self::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }
}

/// Category of an [`EngineError`], cheap to copy into reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    Io,
    InsufficientSpace,
    CrossVolume,
    InvalidTarget,
    NotEmpty,
    InvalidName,
    AlreadyExists,
    PlanConflict,
    TemplateInvalid,
    RestoreTargetUnknown,
    InvalidTransition,
    Cancelled,
}

/// One offending pair found while validating a bulk rename plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanCollision {
    /// The selected entry whose planned name collides.
    pub source: PathBuf,
    /// The other party: a second selected entry or an existing, unselected one.
    pub other: PathBuf,
    /// The destination both would occupy.
    pub destination: PathBuf,
    /// Whether `other` is part of the selection.
    pub kind: CollisionKind,
}

/// What a planned rename collides with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CollisionKind {
    /// Two planned destinations are identical.
    WithinPlan,
    /// The destination is held by an entry outside the selection.
    ExistingEntry,
}

impl fmt::Display for PlanCollision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            CollisionKind::WithinPlan => write!(
                f,
                "{} and {} would both become {}",
                self.source.display(),
                self.other.display(),
                self.destination.display()
            ),
            CollisionKind::ExistingEntry => write!(
                f,
                "{} would overwrite existing {}",
                self.source.display(),
                self.other.display()
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_error_io() {
        let err = EngineError::io(
            "/test/path",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert!(matches!(err, EngineError::NotFound { .. }));
        assert_eq!(err.kind(), ErrorKind::Io);

        let err = EngineError::io(
            "/test/dir",
            std::io::Error::from(std::io::ErrorKind::DirectoryNotEmpty),
        );
        assert!(matches!(err, EngineError::NotEmpty { .. }));
    }

    #[test]
    fn test_per_task_classification() {
        assert!(EngineError::NotEmpty { path: "/a".into() }.is_per_task());
        assert!(!EngineError::Cancelled.is_per_task());
        assert!(
            !EngineError::PlanConflict {
                conflicts: Vec::new()
            }
            .is_per_task()
        );
    }

    #[test]
    fn test_collision_display() {
        let collision = PlanCollision {
            source: "/d/a".into(),
            other: "/d/Name1".into(),
            destination: "/d/Name1".into(),
            kind: CollisionKind::ExistingEntry,
        };
        assert!(collision.to_string().contains("overwrite existing"));
    }
}
