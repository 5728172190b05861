//! Entry metadata snapshots.

use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::location::Location;

/// Type of filesystem object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryKind {
    /// Regular file.
    File,
    /// Directory.
    Directory,
    /// Symbolic link, never followed.
    Symlink {
        /// Link target as stored in the link.
        target: PathBuf,
    },
    /// Sockets, fifos, devices.
    Special,
}

impl EntryKind {
    /// Check if this is a directory.
    pub fn is_dir(&self) -> bool {
        matches!(self, EntryKind::Directory)
    }

    /// Check if this is a regular file.
    pub fn is_file(&self) -> bool {
        matches!(self, EntryKind::File)
    }

    /// Check if this is a symbolic link.
    pub fn is_symlink(&self) -> bool {
        matches!(self, EntryKind::Symlink { .. })
    }
}

/// A location plus the metadata observed when it was discovered.
///
/// The snapshot goes stale as soon as the filesystem changes; consumers
/// must tolerate the entry having vanished or changed at use time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry {
    /// Where the entry lives.
    pub location: Location,
    /// What it is.
    pub kind: EntryKind,
    /// Size in bytes (zero for directories and links).
    pub size: u64,
    /// Last modification time.
    pub modified: SystemTime,
    /// Unix permission bits (0 where unsupported).
    pub mode: u32,
}

impl Entry {
    /// Build an entry from `symlink_metadata` output.
    pub fn from_metadata(location: Location, metadata: &Metadata) -> Self {
        let file_type = metadata.file_type();
        let kind = if file_type.is_symlink() {
            let target = std::fs::read_link(location.path()).unwrap_or_default();
            EntryKind::Symlink { target }
        } else if file_type.is_dir() {
            EntryKind::Directory
        } else if file_type.is_file() {
            EntryKind::File
        } else {
            EntryKind::Special
        };

        let size = if kind.is_file() { metadata.len() } else { 0 };

        Self {
            location,
            kind,
            size,
            modified: metadata.modified().unwrap_or(std::time::UNIX_EPOCH),
            mode: permission_bits(metadata),
        }
    }

    /// The entry's path.
    pub fn path(&self) -> &Path {
        self.location.path()
    }

    /// Check whether the entry still exists with the same kind and size.
    pub fn is_current(&self) -> bool {
        match std::fs::symlink_metadata(self.path()) {
            Ok(meta) => {
                let fresh = Entry::from_metadata(self.location.clone(), &meta);
                fresh.kind == self.kind && fresh.size == self.size
            }
            Err(_) => false,
        }
    }
}

/// Get the permission bits from metadata.
#[cfg(unix)]
pub fn permission_bits(metadata: &Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
pub fn permission_bits(metadata: &Metadata) -> u32 {
    if metadata.permissions().readonly() {
        0o444
    } else {
        0o644
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::VolumeId;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_entry_from_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("a.txt");
        fs::write(&path, "hello").unwrap();

        let meta = fs::symlink_metadata(&path).unwrap();
        let entry = Entry::from_metadata(Location::new(&path, VolumeId::new(1)), &meta);

        assert!(entry.kind.is_file());
        assert_eq!(entry.size, 5);
        assert!(entry.is_current());

        fs::write(&path, "hello world").unwrap();
        assert!(!entry.is_current());
    }

    #[cfg(unix)]
    #[test]
    fn test_entry_symlink_not_followed() {
        let temp = TempDir::new().unwrap();
        let link = temp.path().join("loop");
        std::os::unix::fs::symlink(temp.path(), &link).unwrap();

        let meta = fs::symlink_metadata(&link).unwrap();
        let entry = Entry::from_metadata(Location::new(&link, VolumeId::new(1)), &meta);

        assert_eq!(
            entry.kind,
            EntryKind::Symlink {
                target: temp.path().to_path_buf()
            }
        );
        assert_eq!(entry.size, 0);
    }
}
