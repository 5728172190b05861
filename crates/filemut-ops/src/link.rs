//! Link primitive.

use std::fs;

use tracing::debug;

use filemut_core::{EngineError, Entry, Location};

use crate::copy::remove_existing;

/// Create a hard or symbolic link at `destination` pointing to `entry`.
///
/// Symbolic links store the source's absolute path. Hard links are refused
/// for directories and across volumes.
pub fn link_entry(
    entry: &Entry,
    destination: &Location,
    symbolic: bool,
    replace: bool,
) -> Result<(), EngineError> {
    if !symbolic {
        if entry.kind.is_dir() {
            return Err(EngineError::InvalidTarget {
                source_path: entry.path().to_path_buf(),
                destination: destination.path().to_path_buf(),
                reason: "cannot hard link a directory".into(),
            });
        }
        if !entry.location.same_volume(destination) {
            return Err(EngineError::CrossVolume {
                source_path: entry.path().to_path_buf(),
                destination: destination.path().to_path_buf(),
            });
        }
    }

    if fs::symlink_metadata(destination.path()).is_ok() {
        if !replace {
            return Err(EngineError::AlreadyExists {
                path: destination.path().to_path_buf(),
            });
        }
        remove_existing(destination.path())?;
    }

    let result = if symbolic {
        symlink(entry, destination)
    } else {
        fs::hard_link(entry.path(), destination.path())
    };
    result.map_err(|e| EngineError::io(destination.path(), e))?;

    debug!(src = %entry.path().display(), dst = %destination.path().display(), symbolic, "linked");
    Ok(())
}

#[cfg(unix)]
fn symlink(entry: &Entry, destination: &Location) -> std::io::Result<()> {
    std::os::unix::fs::symlink(entry.path(), destination.path())
}

#[cfg(windows)]
fn symlink(entry: &Entry, destination: &Location) -> std::io::Result<()> {
    if entry.kind.is_dir() {
        std::os::windows::fs::symlink_dir(entry.path(), destination.path())
    } else {
        std::os::windows::fs::symlink_file(entry.path(), destination.path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use filemut_core::{PathResolver, VolumeId};
    use tempfile::TempDir;

    #[cfg(unix)]
    #[test]
    fn test_hard_link_shares_inode() {
        use std::os::unix::fs::MetadataExt;

        let temp = TempDir::new().unwrap();
        let resolver = PathResolver::new();
        fs::write(temp.path().join("a.txt"), "x").unwrap();

        let entry = resolver.entry(temp.path().join("a.txt")).unwrap();
        let dest = resolver.locate(temp.path().join("b.txt"));
        link_entry(&entry, &dest, false, false).unwrap();

        let a = fs::metadata(entry.path()).unwrap();
        let b = fs::metadata(dest.path()).unwrap();
        assert_eq!(a.ino(), b.ino());
    }

    #[cfg(unix)]
    #[test]
    fn test_symbolic_link_points_at_source() {
        let temp = TempDir::new().unwrap();
        let resolver = PathResolver::new();
        fs::create_dir(temp.path().join("dir")).unwrap();

        let entry = resolver.entry(temp.path().join("dir")).unwrap();
        let dest = resolver.locate(temp.path().join("shortcut"));
        link_entry(&entry, &dest, true, false).unwrap();

        assert_eq!(fs::read_link(dest.path()).unwrap(), entry.path());
    }

    #[test]
    fn test_hard_link_rejections() {
        let temp = TempDir::new().unwrap();
        let resolver =
            PathResolver::new().with_volume_override(temp.path().join("usb"), VolumeId::new(3));
        fs::create_dir(temp.path().join("usb")).unwrap();
        fs::create_dir(temp.path().join("dir")).unwrap();
        fs::write(temp.path().join("a.txt"), "x").unwrap();

        let file = resolver.entry(temp.path().join("a.txt")).unwrap();
        let err = link_entry(&file, &resolver.locate(temp.path().join("usb/a.txt")), false, false)
            .unwrap_err();
        assert!(matches!(err, EngineError::CrossVolume { .. }));

        let dir = resolver.entry(temp.path().join("dir")).unwrap();
        let err = link_entry(&dir, &resolver.locate(temp.path().join("dir2")), false, false)
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidTarget { .. }));
    }
}
