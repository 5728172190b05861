//! Aggregate counts over a walked tree.

use std::ops::AddAssign;

use filemut_core::{Entry, EntryKind};
use serde::{Deserialize, Serialize};

/// Item and byte totals for one root (or a sum of roots).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalkTotals {
    /// Every entry, the root included.
    pub items: u64,
    /// Regular files.
    pub files: u64,
    /// Directories.
    pub dirs: u64,
    /// Symbolic links.
    pub symlinks: u64,
    /// Sum of regular file sizes.
    pub bytes: u64,
}

impl WalkTotals {
    /// Create empty totals.
    pub fn new() -> Self {
        Self::default()
    }

    /// Account for one entry.
    pub fn record(&mut self, entry: &Entry) {
        self.items += 1;
        match entry.kind {
            EntryKind::File => {
                self.files += 1;
                self.bytes += entry.size;
            }
            EntryKind::Directory => self.dirs += 1,
            EntryKind::Symlink { .. } => self.symlinks += 1,
            EntryKind::Special => {}
        }
    }

    /// Sum a slice of per-root totals.
    pub fn sum(parts: &[WalkTotals]) -> WalkTotals {
        parts.iter().fold(WalkTotals::new(), |mut acc, t| {
            acc += *t;
            acc
        })
    }
}

impl AddAssign for WalkTotals {
    fn add_assign(&mut self, rhs: Self) {
        self.items += rhs.items;
        self.files += rhs.files;
        self.dirs += rhs.dirs;
        self.symlinks += rhs.symlinks;
        self.bytes += rhs.bytes;
    }
}
