//! Normalized filesystem locations.

use std::ffi::OsStr;
use std::fmt;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Identifier of the volume (device) a location lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VolumeId(pub u64);

impl VolumeId {
    /// Create a new VolumeId from a raw device number.
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for VolumeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "vol:{:x}", self.0)
    }
}

/// An absolute, lexically normalized path tagged with its volume.
///
/// Locations are immutable; deriving a new path produces a new `Location`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    path: PathBuf,
    volume: VolumeId,
}

impl Location {
    /// Create a location from a path and a known volume.
    pub fn new(path: impl AsRef<Path>, volume: VolumeId) -> Self {
        Self {
            path: normalize(path.as_ref()),
            volume,
        }
    }

    /// The normalized path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The volume this location belongs to.
    pub fn volume(&self) -> VolumeId {
        self.volume
    }

    /// Final path component.
    pub fn file_name(&self) -> Option<&OsStr> {
        self.path.file_name()
    }

    /// Parent directory path, if any.
    pub fn parent(&self) -> Option<&Path> {
        self.path.parent()
    }

    /// Whether both locations sit on the same volume.
    pub fn same_volume(&self, other: &Location) -> bool {
        self.volume == other.volume
    }

    /// Whether `self` lies strictly inside `ancestor`.
    pub fn is_descendant_of(&self, ancestor: &Location) -> bool {
        self.path != ancestor.path && self.path.starts_with(&ancestor.path)
    }

    /// A sibling location on the same volume, with another final name.
    pub fn with_file_name(&self, name: impl AsRef<OsStr>) -> Self {
        Self {
            path: self.path.with_file_name(name),
            volume: self.volume,
        }
    }

    /// Consume and return the inner path.
    pub fn into_path(self) -> PathBuf {
        self.path
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

impl AsRef<Path> for Location {
    fn as_ref(&self) -> &Path {
        &self.path
    }
}

/// Make `path` absolute and resolve `.` and `..` without touching the disk.
///
/// Symlinks are not resolved: `a/link/..` becomes `a`.
pub fn normalize(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };

    let mut out = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::Prefix(prefix) => out.push(prefix.as_os_str()),
            Component::RootDir => out.push(Component::RootDir.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            Component::Normal(name) => out.push(name),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_dots() {
        assert_eq!(normalize(Path::new("/a/./b/../c")), PathBuf::from("/a/c"));
        assert_eq!(normalize(Path::new("/../x")), PathBuf::from("/x"));
    }

    #[test]
    fn test_normalize_relative_is_absolute() {
        assert!(normalize(Path::new("some/file")).is_absolute());
    }

    #[test]
    fn test_descendant() {
        let parent = Location::new("/data/photos", VolumeId::new(1));
        let child = Location::new("/data/photos/2024/a.jpg", VolumeId::new(1));
        let sibling = Location::new("/data/photos-old", VolumeId::new(1));

        assert!(child.is_descendant_of(&parent));
        assert!(!parent.is_descendant_of(&parent));
        assert!(!sibling.is_descendant_of(&parent));
    }

    #[test]
    fn test_with_file_name_keeps_volume() {
        let loc = Location::new("/data/a.txt", VolumeId::new(7));
        let renamed = loc.with_file_name("b.txt");
        assert_eq!(renamed.path(), Path::new("/data/b.txt"));
        assert_eq!(renamed.volume(), VolumeId::new(7));
    }
}
