//! Directory identity tracking for loop avoidance.

use std::fs::Metadata;

use dashmap::DashSet;

/// Tracks directories already descended into, keyed by (device, inode).
///
/// Symlinks are never followed, so the only way to meet the same directory
/// twice is a bind mount or a filesystem that reuses directory inodes.
/// The set is shared with jwalk's read-dir callback, hence concurrent.
#[derive(Debug, Default)]
pub struct VisitedDirs {
    seen: DashSet<(u64, u64)>,
}

impl VisitedDirs {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self {
            seen: DashSet::new(),
        }
    }

    /// Record a directory. Returns `true` the first time it is seen.
    pub fn enter(&self, metadata: &Metadata) -> bool {
        match dir_key(metadata) {
            Some(key) => self.seen.insert(key),
            None => true,
        }
    }

    /// Get the number of distinct directories seen.
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    /// Check if no directory has been recorded.
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

#[cfg(unix)]
fn dir_key(metadata: &Metadata) -> Option<(u64, u64)> {
    use std::os::unix::fs::MetadataExt;
    Some((metadata.dev(), metadata.ino()))
}

#[cfg(not(unix))]
fn dir_key(_metadata: &Metadata) -> Option<(u64, u64)> {
    None
}
