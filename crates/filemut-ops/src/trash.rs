//! System trash integration.
//!
//! Entries are handed to the platform trash (freedesktop home or per-volume
//! trash, the Windows recycle bin) through the `trash` crate. Listing,
//! restoring and purging go through its `os_limited` API where the platform
//! provides one; elsewhere the trash is write-only.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use filemut_core::{EngineError, Entry, Location, PathResolver};
use filemut_walk::TreeWalker;

use crate::copy::{CopyOptions, apply_dir_metadata, copy_entry, remove_existing};

/// Metadata kept for each trashed item.
///
/// Fields the platform cannot tell come out as `None`; such an item can still
/// be restored with [`TrashStore::restore_to`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrashRecord {
    pub id: String,
    #[serde(default)]
    pub original_path: Option<PathBuf>,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl TrashRecord {
    /// Final component of the original path, falling back to the id.
    pub fn display_name(&self) -> String {
        self.original_path
            .as_deref()
            .and_then(Path::file_name)
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.id.clone())
    }
}

impl From<&trash::TrashItem> for TrashRecord {
    fn from(item: &trash::TrashItem) -> Self {
        let original_path = if item.original_parent.as_os_str().is_empty() {
            None
        } else {
            Some(item.original_path())
        };
        Self {
            id: item.id.to_string_lossy().into_owned(),
            original_path,
            deleted_at: DateTime::from_timestamp(item.time_deleted, 0),
        }
    }
}

/// Handle on the system trash.
#[derive(Debug, Clone)]
pub struct TrashStore {
    resolver: Arc<PathResolver>,
    copy_options: CopyOptions,
}

impl TrashStore {
    pub fn new(resolver: Arc<PathResolver>, copy_options: CopyOptions) -> Self {
        Self {
            resolver,
            copy_options: copy_options.replacing(false),
        }
    }

    /// Where the item with `id` is kept inside the trash.
    pub fn stored_path(&self, id: &str) -> PathBuf {
        stored_path_of(Path::new(id))
    }

    /// Move `entry` into the system trash.
    pub fn trash(&self, entry: &Entry) -> Result<TrashRecord, EngineError> {
        let path = entry.path();
        if fs::symlink_metadata(path).is_err() {
            return Err(EngineError::NotFound {
                path: path.to_path_buf(),
            });
        }

        let original = physical_original(path);
        let before: Vec<_> = listing(path).into_iter().map(|item| item.id).collect();

        trash::delete(path).map_err(|e| trash_error(path, e))?;

        let record = listing(path)
            .iter()
            .find(|item| !before.contains(&item.id) && item.original_path() == original)
            .map(TrashRecord::from)
            .unwrap_or_else(|| {
                debug!(path = %path.display(), "trashed item not listed by the platform");
                TrashRecord {
                    id: original.to_string_lossy().into_owned(),
                    original_path: Some(original.clone()),
                    deleted_at: Some(Utc::now()),
                }
            });

        info!(path = %path.display(), id = %record.id, "moved to trash");
        Ok(record)
    }

    /// All items currently in the trash, oldest first.
    pub fn list(&self) -> Result<Vec<TrashRecord>, EngineError> {
        let mut records: Vec<TrashRecord> = system::list(Path::new(""))?
            .iter()
            .map(TrashRecord::from)
            .collect();
        records.sort_by(|a, b| a.deleted_at.cmp(&b.deleted_at).then_with(|| a.id.cmp(&b.id)));
        Ok(records)
    }

    /// Look up one item.
    pub fn get(&self, id: &str) -> Result<TrashRecord, EngineError> {
        self.find(id).map(|item| TrashRecord::from(&item))
    }

    fn find(&self, id: &str) -> Result<trash::TrashItem, EngineError> {
        system::list(Path::new(id))?
            .into_iter()
            .find(|item| item.id.to_string_lossy() == id)
            .ok_or_else(|| EngineError::NotFound {
                path: PathBuf::from(id),
            })
    }

    /// Put an item back where it came from.
    pub fn restore(&self, id: &str) -> Result<PathBuf, EngineError> {
        self.restore_item(self.find(id)?)
    }

    fn restore_item(&self, item: trash::TrashItem) -> Result<PathBuf, EngineError> {
        let record = TrashRecord::from(&item);
        let original = record
            .original_path
            .ok_or_else(|| EngineError::RestoreTargetUnknown { id: record.id.clone() })?;

        if fs::symlink_metadata(&original).is_ok() {
            return Err(EngineError::AlreadyExists { path: original });
        }
        if let Some(parent) = original.parent() {
            fs::create_dir_all(parent).map_err(|e| EngineError::io(parent, e))?;
        }

        system::restore(item, &original)?;
        info!(id = %record.id, path = %original.display(), "restored from trash");
        Ok(original)
    }

    /// Put an item into `directory`, under its original name when known.
    pub fn restore_to(&self, id: &str, directory: impl AsRef<Path>) -> Result<PathBuf, EngineError> {
        let item = self.find(id)?;
        let record = TrashRecord::from(&item);
        let target = self
            .resolver
            .locate(directory.as_ref().join(record.display_name()));
        if fs::symlink_metadata(target.path()).is_ok() {
            return Err(EngineError::AlreadyExists {
                path: target.path().to_path_buf(),
            });
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| EngineError::io(parent, e))?;
        }
        // The parent may have just been created on another volume.
        let target = self.resolver.locate(target.path());

        let stored = self.resolver.entry(self.stored_path(&record.id))?;
        self.relocate(&stored, &target)?;
        system::forget(&item);

        info!(id = %record.id, path = %target.path().display(), "restored from trash");
        Ok(target.into_path())
    }

    /// Delete an item from the trash for good.
    pub fn purge(&self, id: &str) -> Result<(), EngineError> {
        let item = self.find(id)?;
        system::purge(item, Path::new(id))?;
        debug!(id, "purged from trash");
        Ok(())
    }

    /// Move `entry` to `target`, copying then deleting across volumes.
    fn relocate(&self, entry: &Entry, target: &Location) -> Result<(), EngineError> {
        if entry.location.same_volume(target) {
            match fs::rename(entry.path(), target.path()) {
                Ok(()) => return Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::CrossesDevices => {}
                Err(e) => return Err(EngineError::io(entry.path(), e)),
            }
        }

        debug!(src = %entry.path().display(), dst = %target.path().display(), "relocating by copy");
        if let Err(e) = self.copy_tree(entry, target) {
            if fs::symlink_metadata(target.path()).is_ok() {
                let _ = remove_existing(target.path());
            }
            return Err(e);
        }
        remove_existing(entry.path())
    }

    fn copy_tree(&self, entry: &Entry, target: &Location) -> Result<(), EngineError> {
        let walker = TreeWalker::new(Arc::clone(&self.resolver));
        let mut directories = Vec::new();

        for item in walker.walk(vec![entry.clone()]) {
            let item = item?;
            let dest = self.resolver.locate(target.path().join(&item.relative));
            copy_entry(&item.entry, &dest, &self.copy_options, &mut |_| {})?;
            if item.entry.kind.is_dir() {
                directories.push((item.entry, dest));
            }
        }

        for (source, dest) in directories.iter().rev() {
            apply_dir_metadata(source, dest.path(), &self.copy_options)?;
        }
        Ok(())
    }
}

/// Trash contents for bookkeeping around a delete; a failed listing only
/// costs the record its platform id.
fn listing(path: &Path) -> Vec<trash::TrashItem> {
    system::list(path).unwrap_or_else(|e| {
        warn!(path = %path.display(), error = %e, "could not list trash");
        Vec::new()
    })
}

/// The path the platform records as the original location of `path`.
fn physical_original(path: &Path) -> PathBuf {
    let (Some(parent), Some(name)) = (path.parent(), path.file_name()) else {
        return path.to_path_buf();
    };
    fs::canonicalize(parent)
        .map(|parent| parent.join(name))
        .unwrap_or_else(|_| path.to_path_buf())
}

/// Freedesktop ids name the `info/<name>.trashinfo` file; the entry itself
/// sits in the sibling `files/` directory.
#[cfg(not(target_os = "windows"))]
fn stored_path_of(id: &Path) -> PathBuf {
    let trash_dir = id.parent().and_then(Path::parent);
    match (trash_dir, id.file_stem()) {
        (Some(dir), Some(name)) => dir.join("files").join(name),
        _ => id.to_path_buf(),
    }
}

#[cfg(target_os = "windows")]
fn stored_path_of(id: &Path) -> PathBuf {
    id.to_path_buf()
}

fn trash_error(path: &Path, error: trash::Error) -> EngineError {
    match error {
        trash::Error::RestoreCollision { path, .. } => EngineError::AlreadyExists { path },
        other => EngineError::io(path, std::io::Error::other(other.to_string())),
    }
}

#[cfg(any(
    target_os = "windows",
    all(unix, not(target_os = "macos"), not(target_os = "ios"), not(target_os = "android"))
))]
mod system {
    use std::path::Path;

    use trash::TrashItem;
    use trash::os_limited;
    use tracing::warn;

    use super::trash_error;
    use filemut_core::EngineError;

    pub fn list(context: &Path) -> Result<Vec<TrashItem>, EngineError> {
        os_limited::list().map_err(|e| trash_error(context, e))
    }

    pub fn restore(item: TrashItem, target: &Path) -> Result<(), EngineError> {
        os_limited::restore_all(vec![item]).map_err(|e| trash_error(target, e))
    }

    pub fn purge(item: TrashItem, context: &Path) -> Result<(), EngineError> {
        os_limited::purge_all(vec![item]).map_err(|e| trash_error(context, e))
    }

    /// Drop the platform's bookkeeping for an item already moved out.
    pub fn forget(item: &TrashItem) {
        if cfg!(target_os = "windows") {
            return;
        }
        let info_file = Path::new(&item.id);
        if let Err(e) = std::fs::remove_file(info_file) {
            warn!(path = %info_file.display(), error = %e, "could not remove trash info file");
        }
    }
}

#[cfg(not(any(
    target_os = "windows",
    all(unix, not(target_os = "macos"), not(target_os = "ios"), not(target_os = "android"))
)))]
mod system {
    use std::path::Path;

    use trash::TrashItem;

    use filemut_core::EngineError;

    pub fn list(_context: &Path) -> Result<Vec<TrashItem>, EngineError> {
        Ok(Vec::new())
    }

    pub fn restore(_item: TrashItem, target: &Path) -> Result<(), EngineError> {
        Err(EngineError::NotFound {
            path: target.to_path_buf(),
        })
    }

    pub fn purge(_item: TrashItem, context: &Path) -> Result<(), EngineError> {
        Err(EngineError::NotFound {
            path: context.to_path_buf(),
        })
    }

    pub fn forget(_item: &TrashItem) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (TrashStore, Arc<PathResolver>) {
        let resolver = Arc::new(PathResolver::new());
        let store = TrashStore::new(Arc::clone(&resolver), CopyOptions::default());
        (store, resolver)
    }

    #[test]
    fn test_record_from_degraded_item() {
        let item = trash::TrashItem {
            id: "/home/u/.local/share/Trash/info/doc.txt.trashinfo".into(),
            name: "doc.txt".into(),
            original_parent: PathBuf::new(),
            time_deleted: 1_700_000_000,
        };
        let record = TrashRecord::from(&item);
        assert_eq!(record.original_path, None);
        assert_eq!(record.display_name(), record.id);
        assert_eq!(record.deleted_at.map(|t| t.timestamp()), Some(1_700_000_000));

        let (store, _) = store();
        assert!(matches!(
            store.restore_item(item),
            Err(EngineError::RestoreTargetUnknown { .. })
        ));
    }

    #[cfg(not(target_os = "windows"))]
    #[test]
    fn test_stored_path_beside_info_file() {
        let (store, _) = store();
        assert_eq!(
            store.stored_path("/data/.Trash-1000/info/a b.txt.trashinfo"),
            PathBuf::from("/data/.Trash-1000/files/a b.txt")
        );
    }

    #[cfg(all(unix, not(target_os = "macos")))]
    mod system_trash {
        use super::*;
        use tempfile::TempDir;

        fn listed(store: &TrashStore, id: &str) -> bool {
            store.list().unwrap().iter().any(|r| r.id == id)
        }

        #[test]
        fn test_trash_and_restore_file() {
            let temp = TempDir::new().unwrap();
            let (store, resolver) = store();
            let path = temp.path().join("notes.txt");
            fs::write(&path, "remember").unwrap();

            let record = store.trash(&resolver.entry(&path).unwrap()).unwrap();
            assert!(!path.exists());
            assert_eq!(record.display_name(), "notes.txt");
            assert!(listed(&store, &record.id));
            assert!(store.stored_path(&record.id).exists());

            let restored = store.restore(&record.id).unwrap();
            assert_eq!(fs::read_to_string(&restored).unwrap(), "remember");
            assert!(path.exists());
            assert!(!listed(&store, &record.id));
        }

        #[test]
        fn test_ids_are_unique_for_same_path() {
            let temp = TempDir::new().unwrap();
            let (store, resolver) = store();
            let path = temp.path().join("again.txt");

            let mut ids = Vec::new();
            for _ in 0..3 {
                fs::write(&path, "x").unwrap();
                ids.push(store.trash(&resolver.entry(&path).unwrap()).unwrap().id);
            }
            ids.sort();
            ids.dedup();
            assert_eq!(ids.len(), 3);
            for id in &ids {
                store.purge(id).unwrap();
            }
        }

        #[test]
        fn test_restore_refuses_occupied_original() {
            let temp = TempDir::new().unwrap();
            let (store, resolver) = store();
            let path = temp.path().join("a.txt");
            fs::write(&path, "old").unwrap();
            let record = store.trash(&resolver.entry(&path).unwrap()).unwrap();
            fs::write(&path, "new").unwrap();

            let err = store.restore(&record.id).unwrap_err();
            assert!(matches!(err, EngineError::AlreadyExists { .. }));
            assert!(listed(&store, &record.id));
            assert_eq!(fs::read_to_string(&path).unwrap(), "new");
            store.purge(&record.id).unwrap();
        }

        #[test]
        fn test_restore_to_other_directory() {
            let temp = TempDir::new().unwrap();
            let (store, resolver) = store();
            let dir = temp.path().join("photos");
            fs::create_dir_all(dir.join("2024")).unwrap();
            fs::write(dir.join("2024/a.jpg"), "jpg").unwrap();

            let record = store.trash(&resolver.entry(&dir).unwrap()).unwrap();
            let elsewhere = temp.path().join("recovered");
            let restored = store.restore_to(&record.id, &elsewhere).unwrap();

            assert_eq!(restored, elsewhere.join("photos"));
            assert_eq!(fs::read_to_string(restored.join("2024/a.jpg")).unwrap(), "jpg");
            assert!(!listed(&store, &record.id));
        }

        #[test]
        fn test_purge() {
            let temp = TempDir::new().unwrap();
            let (store, resolver) = store();
            let path = temp.path().join("gone");
            fs::create_dir(&path).unwrap();
            fs::write(path.join("inner"), "x").unwrap();

            let record = store.trash(&resolver.entry(&path).unwrap()).unwrap();
            let stored = store.stored_path(&record.id);
            store.purge(&record.id).unwrap();

            assert!(!listed(&store, &record.id));
            assert!(!stored.exists());
            assert!(matches!(store.purge(&record.id), Err(EngineError::NotFound { .. })));
            assert!(matches!(store.get("../etc"), Err(EngineError::NotFound { .. })));
        }
    }
}
