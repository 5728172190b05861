//! Location classification and volume relationships.

use std::fs::Metadata;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sysinfo::Disks;
use tracing::debug;

use crate::config::EngineConfig;
use crate::entry::Entry;
use crate::error::EngineError;
use crate::location::{Location, VolumeId, normalize};

/// Filesystem types whose mounts are treated as remote.
const REMOTE_FS_TYPES: &[&str] = &[
    "nfs", "nfs4", "cifs", "smb3", "smbfs", "ncpfs", "afs", "9p", "ceph", "glusterfs", "davfs",
    "fuse.sshfs", "fuse.rclone", "fuse.s3fs", "fuse.gvfsd-fuse",
];

/// Where a location lives, as far as mutation strategy is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LocationKind {
    /// Ordinary local filesystem.
    Local,
    /// Inside a system trash directory.
    Trash,
    /// On a network or otherwise remote mount.
    Remote,
}

/// Result of [`PathResolver::classify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub volume: VolumeId,
    pub kind: LocationKind,
    pub is_trashable: bool,
    pub is_writable: bool,
}

/// Result of [`PathResolver::relationship`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    /// Source and destination share a volume; atomic rename is possible.
    pub same_volume: bool,
    /// The destination is the source itself or inside it.
    pub is_descendant: bool,
}

#[derive(Debug, Clone)]
struct MountPoint {
    path: PathBuf,
    remote: bool,
}

impl MountPoint {
    fn new(path: impl Into<PathBuf>, fs_type: &str) -> Self {
        Self {
            path: path.into(),
            remote: REMOTE_FS_TYPES.contains(&fs_type),
        }
    }
}

/// Normalizes paths, assigns volumes and classifies locations.
#[derive(Debug, Clone, Default)]
pub struct PathResolver {
    trash_roots: Vec<PathBuf>,
    overrides: Vec<(PathBuf, VolumeId)>,
    mounts: Vec<MountPoint>,
}

impl PathResolver {
    /// Create a resolver that knows the current mount table and home trash.
    pub fn new() -> Self {
        Self {
            trash_roots: home_trash().into_iter().collect(),
            overrides: Vec::new(),
            mounts: read_mount_table(),
        }
    }

    /// Create a resolver from engine configuration.
    pub fn from_config(config: &EngineConfig) -> Self {
        let mut resolver = Self::new().with_trash_root(&config.trash_dir);
        for (prefix, id) in &config.volume_overrides {
            resolver = resolver.with_volume_override(prefix, VolumeId::new(*id));
        }
        resolver
    }

    /// Add a trash directory whose contents classify as [`LocationKind::Trash`].
    ///
    /// Per-volume `.Trash` and `.Trash-<uid>` directories are always recognized.
    pub fn with_trash_root(mut self, root: impl AsRef<Path>) -> Self {
        let root = normalize(root.as_ref());
        if !self.trash_roots.contains(&root) {
            self.trash_roots.push(root);
        }
        self
    }

    /// Treat everything under `prefix` as living on `volume`.
    ///
    /// The longest matching prefix wins.
    pub fn with_volume_override(mut self, prefix: impl AsRef<Path>, volume: VolumeId) -> Self {
        self.overrides.push((normalize(prefix.as_ref()), volume));
        self.overrides
            .sort_by(|a, b| b.0.components().count().cmp(&a.0.components().count()));
        self
    }

    /// Resolve a path into a [`Location`]; the path itself need not exist.
    pub fn locate(&self, path: impl AsRef<Path>) -> Location {
        let path = normalize(path.as_ref());
        let volume = self.volume_of(&path);
        Location::new(path, volume)
    }

    /// Capture an [`Entry`] for an existing path without following links.
    pub fn entry(&self, path: impl AsRef<Path>) -> Result<Entry, EngineError> {
        let path = normalize(path.as_ref());
        let metadata = std::fs::symlink_metadata(&path).map_err(|e| EngineError::io(&path, e))?;
        let volume = self.volume_from_metadata(&path, &metadata);
        Ok(Entry::from_metadata(Location::new(path, volume), &metadata))
    }

    /// Volume for a path whose metadata is already at hand.
    pub fn volume_from_metadata(&self, path: &Path, metadata: &Metadata) -> VolumeId {
        self.override_for(path)
            .unwrap_or_else(|| VolumeId::new(device_id(metadata)))
    }

    /// Volume of `path`, or of its nearest existing ancestor.
    pub fn volume_of(&self, path: &Path) -> VolumeId {
        if let Some(volume) = self.override_for(path) {
            return volume;
        }
        path.ancestors()
            .find_map(|p| std::fs::symlink_metadata(p).ok())
            .map(|m| VolumeId::new(device_id(&m)))
            .unwrap_or(VolumeId::new(0))
    }

    fn override_for(&self, path: &Path) -> Option<VolumeId> {
        self.overrides
            .iter()
            .find(|(prefix, _)| path.starts_with(prefix))
            .map(|(_, volume)| *volume)
    }

    /// Classify a location.
    pub fn classify(&self, location: &Location) -> Classification {
        let path = location.path();
        let kind = if self.is_trash(path) {
            LocationKind::Trash
        } else if self.is_remote(path) {
            LocationKind::Remote
        } else {
            LocationKind::Local
        };

        let exists = std::fs::symlink_metadata(path).is_ok();
        let writable = nearest_existing(path).is_some_and(|p| is_writable(&p));
        let parent_writable = location
            .parent()
            .and_then(nearest_existing)
            .is_some_and(|p| is_writable(&p));

        Classification {
            volume: location.volume(),
            kind,
            is_trashable: exists && kind == LocationKind::Local && parent_writable,
            is_writable: writable,
        }
    }

    /// Relationship between a source and the destination it would occupy.
    ///
    /// Containment is checked both on the normalized paths and on the
    /// physical paths, so a destination reached through a symlink into the
    /// source still counts as inside it.
    pub fn relationship(&self, source: &Location, destination: &Location) -> Relationship {
        let lexical = destination.path() == source.path() || destination.is_descendant_of(source);
        Relationship {
            same_volume: source.same_volume(destination),
            is_descendant: lexical
                || physical_path(destination.path()).starts_with(physical_path(source.path())),
        }
    }

    /// Like [`relationship`](Self::relationship), rejecting self-containment.
    pub fn check_target(
        &self,
        source: &Location,
        destination: &Location,
    ) -> Result<Relationship, EngineError> {
        let relationship = self.relationship(source, destination);
        if relationship.is_descendant {
            let reason = if destination.path() == source.path()
                || physical_path(destination.path()) == physical_path(source.path())
            {
                "source and destination are the same"
            } else {
                "destination is inside the source"
            };
            return Err(EngineError::InvalidTarget {
                source_path: source.path().to_path_buf(),
                destination: destination.path().to_path_buf(),
                reason: reason.to_string(),
            });
        }
        Ok(relationship)
    }

    fn is_trash(&self, path: &Path) -> bool {
        self.trash_roots.iter().any(|root| path.starts_with(root))
            || path.components().any(|c| {
                let name = c.as_os_str().to_string_lossy();
                name == ".Trash" || name.starts_with(".Trash-")
            })
    }

    fn is_remote(&self, path: &Path) -> bool {
        self.mounts
            .iter()
            .filter(|m| path.starts_with(&m.path))
            .max_by_key(|m| m.path.components().count())
            .is_some_and(|m| m.remote)
    }
}

/// Free bytes available to unprivileged users on the volume holding `path`.
///
/// Returns `None` when the platform cannot tell.
pub fn available_space(path: &Path) -> Option<u64> {
    let existing = nearest_existing(path)?;
    statvfs_available(&existing)
}

#[cfg(unix)]
#[allow(clippy::unnecessary_cast)]
fn statvfs_available(path: &Path) -> Option<u64> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes()).ok()?;
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    // SAFETY: c_path is NUL-terminated and stat is a valid out pointer.
    let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
    if rc != 0 {
        return None;
    }
    Some(stat.f_bavail as u64 * stat.f_frsize as u64)
}

#[cfg(not(unix))]
fn statvfs_available(_path: &Path) -> Option<u64> {
    None
}

/// Freedesktop home trash under the user's data directory.
fn home_trash() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|dirs| dirs.data_dir().join("Trash"))
}

/// `path` with its parent resolved through symlinks.
///
/// The final component is kept as is, so a symlink names itself rather
/// than its target. Missing trailing directories are re-appended to the
/// nearest ancestor that exists.
fn physical_path(path: &Path) -> PathBuf {
    let (Some(parent), Some(name)) = (path.parent(), path.file_name()) else {
        return path.to_path_buf();
    };
    let mut missing = Vec::new();
    let mut base = parent;
    loop {
        if let Ok(mut resolved) = std::fs::canonicalize(base) {
            resolved.extend(missing.iter().rev());
            resolved.push(name);
            return resolved;
        }
        match (base.parent(), base.file_name()) {
            (Some(up), Some(part)) => {
                missing.push(part);
                base = up;
            }
            _ => return path.to_path_buf(),
        }
    }
}

fn nearest_existing(path: &Path) -> Option<PathBuf> {
    path.ancestors()
        .find(|p| std::fs::symlink_metadata(p).is_ok())
        .map(Path::to_path_buf)
}

#[cfg(unix)]
fn is_writable(path: &Path) -> bool {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    match CString::new(path.as_os_str().as_bytes()) {
        // SAFETY: c_path is NUL-terminated for the duration of the call.
        Ok(c_path) => unsafe { libc::access(c_path.as_ptr(), libc::W_OK) == 0 },
        Err(_) => false,
    }
}

#[cfg(not(unix))]
fn is_writable(path: &Path) -> bool {
    std::fs::metadata(path).is_ok_and(|m| !m.permissions().readonly())
}

/// Get the device ID from metadata.
#[cfg(unix)]
fn device_id(metadata: &Metadata) -> u64 {
    use std::os::unix::fs::MetadataExt;
    metadata.dev()
}

#[cfg(not(unix))]
fn device_id(_metadata: &Metadata) -> u64 {
    0
}

fn read_mount_table() -> Vec<MountPoint> {
    let disks = Disks::new_with_refreshed_list();
    let mounts: Vec<MountPoint> = disks
        .list()
        .iter()
        .map(|disk| MountPoint::new(disk.mount_point(), &disk.file_system().to_string_lossy()))
        .collect();
    debug!(count = mounts.len(), "loaded mount table");
    mounts
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_remote_longest_prefix() {
        let resolver = PathResolver {
            mounts: vec![
                MountPoint::new("/", "ext4"),
                MountPoint::new("/mnt/nas", "nfs4"),
                MountPoint::new("/mnt/nas/cache", "ext4"),
            ],
            ..Default::default()
        };
        assert!(resolver.is_remote(Path::new("/mnt/nas/docs/a.txt")));
        assert!(!resolver.is_remote(Path::new("/mnt/nas/cache/a.txt")));
        assert!(!resolver.is_remote(Path::new("/home/user")));
    }

    #[test]
    fn test_mount_table_loads() {
        let resolver = PathResolver::new();
        if cfg!(target_os = "linux") {
            assert!(resolver.mounts.iter().any(|m| m.path == Path::new("/")));
        }
    }

    #[test]
    fn test_descendant_target_rejected() {
        let temp = TempDir::new().unwrap();
        let resolver = PathResolver::new();
        let src = resolver.locate(temp.path().join("dir"));
        let dst = resolver.locate(temp.path().join("dir/sub/dir"));

        let err = resolver.check_target(&src, &dst).unwrap_err();
        assert!(matches!(err, EngineError::InvalidTarget { .. }));

        let same = resolver.check_target(&src, &src.clone()).unwrap_err();
        assert!(matches!(same, EngineError::InvalidTarget { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_descendant_through_symlink_rejected() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("tree/inner")).unwrap();
        std::os::unix::fs::symlink(temp.path().join("tree/inner"), temp.path().join("alias"))
            .unwrap();

        let resolver = PathResolver::new();
        let src = resolver.locate(temp.path().join("tree"));
        let dst = resolver.locate(temp.path().join("alias/tree"));
        assert!(resolver.relationship(&src, &dst).is_descendant);
        assert!(matches!(
            resolver.check_target(&src, &dst),
            Err(EngineError::InvalidTarget { .. })
        ));

        // The link itself may still be copied next to its target.
        let link = resolver.locate(temp.path().join("alias"));
        let beside = resolver.locate(temp.path().join("tree/alias"));
        assert!(!resolver.relationship(&link, &beside).is_descendant);
    }

    #[test]
    fn test_same_volume_for_siblings() {
        let temp = TempDir::new().unwrap();
        let resolver = PathResolver::new();
        let a = resolver.locate(temp.path().join("a"));
        let b = resolver.locate(temp.path().join("b/c"));
        assert!(resolver.relationship(&a, &b).same_volume);
    }

    #[test]
    fn test_volume_override() {
        let temp = TempDir::new().unwrap();
        let resolver =
            PathResolver::new().with_volume_override(temp.path().join("usb"), VolumeId::new(99));
        let inside = resolver.locate(temp.path().join("usb/photos"));
        let outside = resolver.locate(temp.path().join("home"));

        assert_eq!(inside.volume(), VolumeId::new(99));
        assert!(!resolver.relationship(&outside, &inside).same_volume);
    }

    #[test]
    fn test_classify_trash() {
        let temp = TempDir::new().unwrap();
        let trash = temp.path().join("trash");
        std::fs::create_dir(&trash).unwrap();
        std::fs::write(temp.path().join("a.txt"), "a").unwrap();

        let resolver = PathResolver::new().with_trash_root(&trash);
        let in_trash = resolver.classify(&resolver.locate(trash.join("files/x")));
        assert_eq!(in_trash.kind, LocationKind::Trash);
        assert!(!in_trash.is_trashable);

        let local = resolver.classify(&resolver.locate(temp.path().join("a.txt")));
        assert!(local.is_writable);
        assert!(local.is_trashable || local.kind == LocationKind::Remote);

        let volume_trash = resolver.classify(&resolver.locate("/mnt/usb/.Trash-1000/files/a"));
        assert_eq!(volume_trash.kind, LocationKind::Trash);
    }

    #[test]
    fn test_available_space_known() {
        let temp = TempDir::new().unwrap();
        if cfg!(unix) {
            assert!(available_space(&temp.path().join("missing/child")).is_some());
        }
    }
}
