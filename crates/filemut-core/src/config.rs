//! Engine configuration.

use std::path::PathBuf;

use derive_builder::Builder;
use serde::{Deserialize, Serialize};

/// Configuration shared by the scheduler, primitives and trash handle.
#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
pub struct EngineConfig {
    /// An extra trash directory; anything under it, like the system trash
    /// itself, counts as already trashed.
    #[builder(default = "default_trash_dir()")]
    #[serde(default = "default_trash_dir")]
    pub trash_dir: PathBuf,

    /// Buffer size used when streaming file contents.
    #[builder(default = "256 * 1024")]
    #[serde(default = "default_copy_buffer_size")]
    pub copy_buffer_size: usize,

    /// Copy permission bits to the destination.
    #[builder(default = "true")]
    #[serde(default = "default_true")]
    pub preserve_permissions: bool,

    /// Copy modification times to the destination.
    #[builder(default = "true")]
    #[serde(default = "default_true")]
    pub preserve_timestamps: bool,

    /// Compare BLAKE3 digests before deleting the source of a cross-volume move.
    #[builder(default = "false")]
    #[serde(default)]
    pub verify_checksum: bool,

    /// Capacity of each batch's event channel.
    #[builder(default = "100")]
    #[serde(default = "default_channel_size")]
    pub channel_size: usize,

    /// Subtrees that must be treated as separate volumes, with their ids.
    #[builder(default)]
    #[serde(default)]
    pub volume_overrides: Vec<(PathBuf, u64)>,
}

fn default_true() -> bool {
    true
}

fn default_copy_buffer_size() -> usize {
    256 * 1024
}

fn default_channel_size() -> usize {
    100
}

/// The user's home trash, `$XDG_DATA_HOME/Trash` on freedesktop systems.
pub fn default_trash_dir() -> PathBuf {
    directories::BaseDirs::new()
        .map(|dirs| dirs.data_dir().join("Trash"))
        .unwrap_or_else(|| {
            std::env::var_os("HOME")
                .map(PathBuf::from)
                .unwrap_or_else(std::env::temp_dir)
                .join(".local/share/Trash")
        })
}

impl EngineConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        if let Some(ref dir) = self.trash_dir {
            if dir.as_os_str().is_empty() {
                return Err("Trash directory cannot be empty".to_string());
            }
        }
        if let Some(size) = self.copy_buffer_size {
            if size == 0 {
                return Err("Copy buffer size must be positive".to_string());
            }
        }
        if let Some(size) = self.channel_size {
            if size == 0 {
                return Err("Channel size must be positive".to_string());
            }
        }
        Ok(())
    }
}

impl EngineConfig {
    /// Create a new engine config builder.
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    /// Create a default config that also treats `trash_dir` as a trash location.
    pub fn new(trash_dir: impl Into<PathBuf>) -> Self {
        Self {
            trash_dir: trash_dir.into(),
            copy_buffer_size: default_copy_buffer_size(),
            preserve_permissions: true,
            preserve_timestamps: true,
            verify_checksum: false,
            channel_size: default_channel_size(),
            volume_overrides: Vec::new(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new(default_trash_dir())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = EngineConfig::builder()
            .trash_dir("/tmp/trash")
            .copy_buffer_size(4096usize)
            .verify_checksum(true)
            .build()
            .unwrap();

        assert_eq!(config.trash_dir, PathBuf::from("/tmp/trash"));
        assert_eq!(config.copy_buffer_size, 4096);
        assert!(config.verify_checksum);
        assert!(config.preserve_permissions);
        assert_eq!(config.channel_size, 100);
    }

    #[test]
    fn test_config_builder_rejects_zero_buffer() {
        let result = EngineConfig::builder().copy_buffer_size(0usize).build();
        assert!(result.is_err());
    }

    #[test]
    fn test_config_partial_json() {
        let config: EngineConfig =
            serde_json::from_str(r#"{ "trash_dir": "/srv/trash", "verify_checksum": true }"#)
                .unwrap();
        assert_eq!(config.trash_dir, PathBuf::from("/srv/trash"));
        assert!(config.verify_checksum);
        assert!(config.preserve_timestamps);
        assert_eq!(config.copy_buffer_size, 256 * 1024);
    }
}
