//! Rename primitive and filename validation.

use std::fs;

use tracing::debug;

use filemut_core::{EngineError, Entry, Location};

/// Longest file name accepted, in bytes.
pub const MAX_NAME_LEN: usize = 255;

/// Rename `entry` within its directory.
///
/// Fails with [`EngineError::InvalidName`] for names the filesystem would
/// reject and with [`EngineError::AlreadyExists`] when another entry holds the
/// new name. Renaming to the current name is a no-op.
pub fn rename_entry(entry: &Entry, new_name: &str) -> Result<Location, EngineError> {
    validate_filename(new_name)?;

    let destination = entry.location.with_file_name(new_name);
    if destination.path() == entry.path() {
        return Ok(destination);
    }

    // A case-only rename on a case-insensitive filesystem sees itself here.
    if let Ok(existing) = fs::symlink_metadata(destination.path()) {
        let same_entry = fs::symlink_metadata(entry.path())
            .map(|current| same_file(&current, &existing))
            .unwrap_or(false);
        if !same_entry {
            return Err(EngineError::AlreadyExists {
                path: destination.path().to_path_buf(),
            });
        }
    }

    fs::rename(entry.path(), destination.path()).map_err(|e| EngineError::io(entry.path(), e))?;
    debug!(from = %entry.path().display(), to = %destination.path().display(), "renamed");
    Ok(destination)
}

#[cfg(unix)]
fn same_file(a: &fs::Metadata, b: &fs::Metadata) -> bool {
    use std::os::unix::fs::MetadataExt;
    a.dev() == b.dev() && a.ino() == b.ino()
}

#[cfg(not(unix))]
fn same_file(_a: &fs::Metadata, _b: &fs::Metadata) -> bool {
    false
}

/// Validate a filename for cross-platform compatibility.
pub fn validate_filename(name: &str) -> Result<(), EngineError> {
    let invalid = |reason: &str| Err(EngineError::invalid_name(name, reason));

    if name.is_empty() {
        return invalid("Name cannot be empty");
    }

    if name.len() > MAX_NAME_LEN {
        return invalid("Name is too long (max 255 bytes)");
    }

    // Check for invalid characters
    for c in ['/', '\0'] {
        if name.contains(c) {
            return invalid(&format!("Name cannot contain {:?}", c));
        }
    }

    #[cfg(target_os = "windows")]
    {
        for c in ['\\', ':', '*', '?', '"', '<', '>', '|'] {
            if name.contains(c) {
                return invalid(&format!("Name cannot contain {:?}", c));
            }
        }

        let reserved = [
            "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7",
            "COM8", "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
        ];
        let upper_name = name.to_uppercase();
        let base_name = upper_name.split('.').next().unwrap_or("");
        if reserved.contains(&base_name) {
            return invalid("Reserved filename");
        }
    }

    if name.starts_with(' ') || name.ends_with(' ') {
        return invalid("Name cannot start or end with spaces");
    }

    if name == "." || name == ".." {
        return invalid("'.' and '..' are reserved names");
    }

    if name.ends_with('.') {
        return invalid("Name cannot end with a dot");
    }

    Ok(())
}
