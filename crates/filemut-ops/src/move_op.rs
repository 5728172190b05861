//! Move primitives.
//!
//! [`move_entry`] is the atomic same-volume rename. Moves between volumes are
//! built from copy, verify and delete by [`move_across`]; the source is only
//! removed once its copy has been checked.

use std::fs;

use tracing::{debug, warn};

use filemut_core::{EngineError, Entry, EntryKind, Location};

use crate::copy::{CopyOptions, copy_entry, file_digest, remove_existing};

/// Atomically rename `entry` to `destination`.
///
/// Fails with [`EngineError::CrossVolume`] when the two are on different
/// volumes; the caller must copy and delete instead.
pub fn move_entry(entry: &Entry, destination: &Location, replace: bool) -> Result<(), EngineError> {
    let cross_volume = || EngineError::CrossVolume {
        source_path: entry.path().to_path_buf(),
        destination: destination.path().to_path_buf(),
    };

    if !entry.location.same_volume(destination) {
        return Err(cross_volume());
    }

    if let Ok(existing) = fs::symlink_metadata(destination.path()) {
        if !replace {
            return Err(EngineError::AlreadyExists {
                path: destination.path().to_path_buf(),
            });
        }
        // rename(2) replaces files atomically but refuses a directory target
        // unless both are directories and the target is empty, and never puts
        // a directory over a file.
        if existing.is_dir() || entry.kind.is_dir() {
            remove_existing(destination.path())?;
        }
    }

    match fs::rename(entry.path(), destination.path()) {
        Ok(()) => {
            debug!(src = %entry.path().display(), dst = %destination.path().display(), "renamed");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::CrossesDevices => Err(cross_volume()),
        Err(e) => Err(EngineError::io(entry.path(), e)),
    }
}

/// Move a file or symlink to another volume.
///
/// Copies first, verifies the destination against the source (size, plus a
/// BLAKE3 digest when `verify_checksum` is set), then removes the source. A
/// failed verification removes the copy and leaves the source in place.
pub fn move_across(
    entry: &Entry,
    destination: &Location,
    options: &CopyOptions,
    verify_checksum: bool,
    on_bytes: &mut dyn FnMut(u64),
) -> Result<u64, EngineError> {
    if entry.kind.is_dir() {
        return Err(EngineError::InvalidTarget {
            source_path: entry.path().to_path_buf(),
            destination: destination.path().to_path_buf(),
            reason: "directories are moved entry by entry".into(),
        });
    }

    let bytes = copy_entry(entry, destination, options, on_bytes)?;

    if entry.kind == EntryKind::File {
        if let Err(e) = verify_copy(entry, destination, bytes, options, verify_checksum) {
            warn!(dst = %destination.path().display(), error = %e, "copy failed verification, removing it");
            let _ = fs::remove_file(destination.path());
            return Err(e);
        }
    }

    fs::remove_file(entry.path()).map_err(|e| EngineError::io(entry.path(), e))?;
    debug!(src = %entry.path().display(), dst = %destination.path().display(), bytes, "moved across volumes");
    Ok(bytes)
}

fn verify_copy(
    entry: &Entry,
    destination: &Location,
    copied: u64,
    options: &CopyOptions,
    verify_checksum: bool,
) -> Result<(), EngineError> {
    let written = fs::metadata(destination.path())
        .map_err(|e| EngineError::io(destination.path(), e))?
        .len();
    let source_now = fs::metadata(entry.path())
        .map_err(|e| EngineError::io(entry.path(), e))?
        .len();

    if written != copied || source_now != copied {
        return Err(EngineError::io(
            destination.path(),
            std::io::Error::other(format!(
                "size mismatch after copy: source {} bytes, destination {} bytes",
                source_now, written
            )),
        ));
    }

    if verify_checksum
        && file_digest(entry.path(), options.buffer_size)?
            != file_digest(destination.path(), options.buffer_size)?
    {
        return Err(EngineError::io(
            destination.path(),
            std::io::Error::other("checksum mismatch after copy"),
        ));
    }
    Ok(())
}
