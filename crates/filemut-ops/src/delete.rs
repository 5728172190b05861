//! Delete primitive.

use std::fs;

use tracing::debug;

use filemut_core::{EngineError, Entry};

use crate::trash::{TrashRecord, TrashStore};

/// Outcome of a successful delete.
#[derive(Debug, Clone)]
pub enum Deleted {
    /// Unlinked for good.
    Permanently,
    /// Moved into the system trash.
    Trashed(TrashRecord),
}

/// Delete one entry.
///
/// Permanent deletes never recurse: a directory must already be empty, and
/// [`EngineError::NotEmpty`] reports a child that appeared after its
/// descendants were removed. Non-permanent deletes hand the whole entry to
/// the system trash.
pub fn delete_entry(
    entry: &Entry,
    permanent: bool,
    trash: &TrashStore,
) -> Result<Deleted, EngineError> {
    if !permanent {
        return trash.trash(entry).map(Deleted::Trashed);
    }

    let result = if entry.kind.is_dir() {
        fs::remove_dir(entry.path())
    } else {
        fs::remove_file(entry.path())
    };
    result.map_err(|e| EngineError::io(entry.path(), e))?;
    debug!(path = %entry.path().display(), "deleted");
    Ok(Deleted::Permanently)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::copy::CopyOptions;
    use filemut_core::PathResolver;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn setup() -> (TempDir, TrashStore, Arc<PathResolver>) {
        let temp = TempDir::new().unwrap();
        let resolver = Arc::new(PathResolver::new());
        let trash = TrashStore::new(Arc::clone(&resolver), CopyOptions::default());
        (temp, trash, resolver)
    }

    #[test]
    fn test_permanent_file_delete() {
        let (temp, trash, resolver) = setup();
        let path = temp.path().join("a.txt");
        fs::write(&path, "x").unwrap();

        let outcome = delete_entry(&resolver.entry(&path).unwrap(), true, &trash).unwrap();
        assert!(matches!(outcome, Deleted::Permanently));
        assert!(!path.exists());
    }

    #[test]
    fn test_permanent_delete_of_nonempty_dir() {
        let (temp, trash, resolver) = setup();
        let dir = temp.path().join("dir");
        fs::create_dir(&dir).unwrap();
        let entry = resolver.entry(&dir).unwrap();
        fs::write(dir.join("late.txt"), "appeared").unwrap();

        let err = delete_entry(&entry, true, &trash).unwrap_err();
        assert!(matches!(err, EngineError::NotEmpty { .. }));
        assert!(dir.join("late.txt").exists());
    }

    #[test]
    fn test_vanished_entry() {
        let (temp, trash, resolver) = setup();
        let path = temp.path().join("a.txt");
        fs::write(&path, "x").unwrap();
        let entry = resolver.entry(&path).unwrap();
        fs::remove_file(&path).unwrap();

        assert!(matches!(
            delete_entry(&entry, true, &trash),
            Err(EngineError::NotFound { .. })
        ));
        assert!(matches!(
            delete_entry(&entry, false, &trash),
            Err(EngineError::NotFound { .. })
        ));
    }

    #[cfg(all(unix, not(target_os = "macos")))]
    #[test]
    fn test_trash_delete() {
        let (temp, trash, resolver) = setup();
        let path = temp.path().join("a.txt");
        fs::write(&path, "x").unwrap();

        let outcome = delete_entry(&resolver.entry(&path).unwrap(), false, &trash).unwrap();
        let Deleted::Trashed(record) = outcome else {
            panic!("expected a trash record");
        };
        assert!(!path.exists());
        assert!(trash.stored_path(&record.id).exists());
        trash.purge(&record.id).unwrap();
    }
}
