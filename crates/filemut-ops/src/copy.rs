//! Copy primitive.
//!
//! Regular files are streamed into a hidden temporary file in the destination
//! directory and moved onto the destination name only once every byte has been
//! written and synced, so a failed or interrupted copy never leaves a
//! truncated file under the real name.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;

use tracing::{debug, trace};

use filemut_core::{EngineConfig, EngineError, Entry, EntryKind, Location, available_space};

/// Options for the copy primitive.
#[derive(Debug, Clone)]
pub struct CopyOptions {
    /// Size of the streaming buffer.
    pub buffer_size: usize,
    /// Copy permission bits.
    pub preserve_permissions: bool,
    /// Copy modification times.
    pub preserve_timestamps: bool,
    /// Replace whatever occupies the destination.
    pub replace: bool,
}

impl CopyOptions {
    /// Options derived from engine configuration.
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            buffer_size: config.copy_buffer_size,
            preserve_permissions: config.preserve_permissions,
            preserve_timestamps: config.preserve_timestamps,
            replace: false,
        }
    }

    /// Same options with `replace` set.
    pub fn replacing(&self, replace: bool) -> Self {
        Self {
            replace,
            ..self.clone()
        }
    }
}

impl Default for CopyOptions {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

/// Copy one entry to `destination`.
///
/// Directories are created empty (or merged into when one already exists);
/// their contents are separate tasks. Symlinks are recreated as links.
/// `on_bytes` is called after every chunk written. Returns the number of
/// bytes copied.
pub fn copy_entry(
    entry: &Entry,
    destination: &Location,
    options: &CopyOptions,
    on_bytes: &mut dyn FnMut(u64),
) -> Result<u64, EngineError> {
    match &entry.kind {
        EntryKind::File => copy_file(entry.path(), destination.path(), options, on_bytes),
        EntryKind::Directory => {
            create_directory(destination.path(), options.replace)?;
            Ok(0)
        }
        EntryKind::Symlink { target } => {
            copy_symlink(target, destination.path(), options.replace)?;
            Ok(0)
        }
        EntryKind::Special => Err(EngineError::io(
            entry.path(),
            std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "cannot copy sockets, fifos or device nodes",
            ),
        )),
    }
}

fn copy_file(
    source: &Path,
    destination: &Path,
    options: &CopyOptions,
    on_bytes: &mut dyn FnMut(u64),
) -> Result<u64, EngineError> {
    let mut reader = File::open(source).map_err(|e| EngineError::io(source, e))?;
    let src_meta = reader.metadata().map_err(|e| EngineError::io(source, e))?;
    let expected = src_meta.len();

    let parent = destination.parent().unwrap_or(Path::new("."));
    if let Some(available) = available_space(parent) {
        if available < expected {
            return Err(EngineError::InsufficientSpace {
                path: destination.to_path_buf(),
                required: expected,
                available,
            });
        }
    }

    if !options.replace && fs::symlink_metadata(destination).is_ok() {
        return Err(EngineError::AlreadyExists {
            path: destination.to_path_buf(),
        });
    }

    let mut temp = tempfile::Builder::new()
        .prefix(".filemut-")
        .suffix(".part")
        .tempfile_in(parent)
        .map_err(|e| EngineError::io(parent, e))?;

    let mut buffer = vec![0u8; options.buffer_size.max(1)];
    let mut copied = 0u64;
    loop {
        let read = reader
            .read(&mut buffer)
            .map_err(|e| EngineError::io(source, e))?;
        if read == 0 {
            break;
        }
        temp.write_all(&buffer[..read])
            .map_err(|e| EngineError::io(destination, e))?;
        copied += read as u64;
        on_bytes(read as u64);
    }

    if copied != expected {
        return Err(EngineError::io(
            source,
            std::io::Error::other(format!(
                "source changed during copy: expected {} bytes, read {}",
                expected, copied
            )),
        ));
    }

    temp.as_file()
        .sync_all()
        .map_err(|e| EngineError::io(destination, e))?;

    if options.preserve_permissions {
        fs::set_permissions(temp.path(), src_meta.permissions())
            .map_err(|e| EngineError::io(destination, e))?;
    }
    if options.preserve_timestamps {
        if let Ok(modified) = src_meta.modified() {
            temp.as_file()
                .set_modified(modified)
                .map_err(|e| EngineError::io(destination, e))?;
        }
    }

    if options.replace {
        if fs::symlink_metadata(destination).is_ok_and(|m| m.is_dir()) {
            fs::remove_dir_all(destination).map_err(|e| EngineError::io(destination, e))?;
        }
        temp.persist(destination)
            .map_err(|e| EngineError::io(destination, e.error))?;
    } else {
        temp.persist_noclobber(destination)
            .map_err(|e| EngineError::io(destination, e.error))?;
    }

    trace!(src = %source.display(), dst = %destination.display(), bytes = copied, "copied file");
    Ok(copied)
}

/// Create `destination` as a directory, merging into an existing one.
fn create_directory(destination: &Path, replace: bool) -> Result<(), EngineError> {
    match fs::symlink_metadata(destination) {
        Ok(meta) if meta.is_dir() => {
            debug!(path = %destination.display(), "merging into existing directory");
            return Ok(());
        }
        Ok(_) if replace => remove_existing(destination)?,
        Ok(_) => {
            return Err(EngineError::AlreadyExists {
                path: destination.to_path_buf(),
            });
        }
        Err(_) => {}
    }
    fs::create_dir(destination).map_err(|e| EngineError::io(destination, e))
}

#[cfg(unix)]
fn copy_symlink(target: &Path, destination: &Path, replace: bool) -> Result<(), EngineError> {
    if fs::symlink_metadata(destination).is_ok() {
        if !replace {
            return Err(EngineError::AlreadyExists {
                path: destination.to_path_buf(),
            });
        }
        remove_existing(destination)?;
    }
    std::os::unix::fs::symlink(target, destination).map_err(|e| EngineError::io(destination, e))
}

#[cfg(not(unix))]
fn copy_symlink(_target: &Path, destination: &Path, _replace: bool) -> Result<(), EngineError> {
    Err(EngineError::io(
        destination,
        std::io::Error::new(std::io::ErrorKind::Unsupported, "symlinks are not supported"),
    ))
}

/// Remove whatever is at `path`, recursively for directories.
pub(crate) fn remove_existing(path: &Path) -> Result<(), EngineError> {
    let meta = fs::symlink_metadata(path).map_err(|e| EngineError::io(path, e))?;
    let result = if meta.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    result.map_err(|e| EngineError::io(path, e))
}

/// Apply a source directory's permission bits and mtime to its copy.
///
/// Called after the directory's contents are written, since writing children
/// updates the mtime and a read-only mode would block them.
pub fn apply_dir_metadata(
    source: &Entry,
    destination: &Path,
    options: &CopyOptions,
) -> Result<(), EngineError> {
    if options.preserve_timestamps {
        let dir = File::open(destination).map_err(|e| EngineError::io(destination, e))?;
        dir.set_modified(source.modified)
            .map_err(|e| EngineError::io(destination, e))?;
    }
    if options.preserve_permissions {
        set_mode(destination, source.mode)?;
    }
    Ok(())
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<(), EngineError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
        .map_err(|e| EngineError::io(path, e))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<(), EngineError> {
    Ok(())
}

/// Compute the full BLAKE3 digest of a file.
pub fn file_digest(path: &Path, buffer_size: usize) -> Result<blake3::Hash, EngineError> {
    let mut file = File::open(path).map_err(|e| EngineError::io(path, e))?;
    let mut hasher = blake3::Hasher::new();
    let mut buffer = vec![0u8; buffer_size.max(1)];
    loop {
        let read = file.read(&mut buffer).map_err(|e| EngineError::io(path, e))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hasher.finalize())
}
