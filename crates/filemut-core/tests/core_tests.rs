use filemut_core::{
    EngineConfig, EngineError, EntryKind, ErrorKind, LocationKind, PathResolver, VolumeId,
};
use std::fs;
use tempfile::TempDir;

#[test]
fn test_engine_config_builder() {
    let config = EngineConfig::builder()
        .trash_dir("/var/tmp/filemut-trash")
        .copy_buffer_size(64 * 1024usize)
        .preserve_timestamps(false)
        .channel_size(16usize)
        .build()
        .unwrap();

    assert_eq!(config.copy_buffer_size, 64 * 1024);
    assert!(!config.preserve_timestamps);
    assert!(config.preserve_permissions);
    assert!(!config.verify_checksum);
    assert_eq!(config.channel_size, 16);

    // Test default config
    let default_config = EngineConfig::default();
    assert_eq!(default_config.copy_buffer_size, 256 * 1024);
    assert_eq!(default_config.channel_size, 100);
}

#[test]
fn test_engine_config_from_json() {
    let config: EngineConfig = serde_json::from_str(
        r#"{"trash_dir": "/data/trash", "volume_overrides": [["/mnt/usb", 7]]}"#,
    )
    .unwrap();

    assert_eq!(config.trash_dir, std::path::PathBuf::from("/data/trash"));
    assert_eq!(config.volume_overrides.len(), 1);
    assert!(config.preserve_permissions);

    let resolver = PathResolver::from_config(&config);
    assert_eq!(resolver.locate("/mnt/usb/photos").volume(), VolumeId::new(7));
    let trash = resolver.locate("/data/trash/files/x");
    assert_eq!(resolver.classify(&trash).kind, LocationKind::Trash);
}

#[test]
fn test_entry_kinds() {
    let temp = TempDir::new().unwrap();
    let resolver = PathResolver::new();
    fs::create_dir(temp.path().join("dir")).unwrap();
    fs::write(temp.path().join("file.bin"), [0u8; 128]).unwrap();

    let dir = resolver.entry(temp.path().join("dir")).unwrap();
    assert!(dir.kind.is_dir());

    let file = resolver.entry(temp.path().join("file.bin")).unwrap();
    assert_eq!(file.kind, EntryKind::File);
    assert_eq!(file.size, 128);
    assert!(file.is_current());

    fs::write(temp.path().join("file.bin"), [0u8; 12]).unwrap();
    assert!(!file.is_current());
}

#[cfg(unix)]
#[test]
fn test_symlink_entry_keeps_target() {
    let temp = TempDir::new().unwrap();
    let resolver = PathResolver::new();
    std::os::unix::fs::symlink("elsewhere", temp.path().join("link")).unwrap();

    let link = resolver.entry(temp.path().join("link")).unwrap();
    match &link.kind {
        EntryKind::Symlink { target } => assert_eq!(target.to_str(), Some("elsewhere")),
        other => panic!("expected symlink, got {:?}", other),
    }
}

#[test]
fn test_missing_entry_is_not_found() {
    let temp = TempDir::new().unwrap();
    let err = PathResolver::new()
        .entry(temp.path().join("nope"))
        .unwrap_err();

    assert!(matches!(err, EngineError::NotFound { .. }));
    assert_eq!(err.kind(), ErrorKind::Io);
    assert!(err.is_per_task());
}

#[test]
fn test_relationship_and_targets() {
    let temp = TempDir::new().unwrap();
    let resolver =
        PathResolver::new().with_volume_override(temp.path().join("external"), VolumeId::new(99));
    fs::create_dir_all(temp.path().join("src/sub")).unwrap();
    fs::create_dir(temp.path().join("external")).unwrap();

    let src = resolver.locate(temp.path().join("src"));
    let inside = resolver.locate(temp.path().join("src/sub/src"));
    let sibling = resolver.locate(temp.path().join("copy"));
    let external = resolver.locate(temp.path().join("external/src"));

    assert!(resolver.relationship(&src, &inside).is_descendant);
    assert!(resolver.check_target(&src, &inside).is_err());
    assert!(resolver.check_target(&src, &src).is_err());

    let rel = resolver.check_target(&src, &sibling).unwrap();
    assert!(rel.same_volume);
    let rel = resolver.check_target(&src, &external).unwrap();
    assert!(!rel.same_volume);
}

#[test]
fn test_locations_are_normalized() {
    let resolver = PathResolver::new();
    let a = resolver.locate("/tmp/x/../y/./z");
    assert_eq!(a.path(), std::path::Path::new("/tmp/y/z"));
    assert_eq!(a.file_name().and_then(|n| n.to_str()), Some("z"));
}
