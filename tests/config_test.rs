// Session configuration file tests

use multiview::{CapacityTier, QualityLevel, SessionConfig, SessionError};
use std::fs;
use tempfile::TempDir;

#[test]
fn test_save_and_load_round_trip() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("multiview.toml");

    let mut config = SessionConfig::default();
    config.capacity.free_slots = 4;
    config.quality.initial_level = QualityLevel::High;
    config.quality.memory_ceiling_mb = Some(1024);
    config.save_to_file(&path).unwrap();

    let loaded = SessionConfig::load_from_file(&path).unwrap();
    assert_eq!(loaded, config);
    assert_eq!(loaded.capacity.limit_for(CapacityTier::Free), 4);
}

#[test]
fn test_empty_file_uses_defaults() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("empty.toml");
    fs::write(&path, "").unwrap();

    let loaded = SessionConfig::load_from_file(&path).unwrap();
    assert_eq!(loaded, SessionConfig::default());
}

#[test]
fn test_invalid_file_is_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("bad.toml");
    fs::write(&path, "[quality]\nrecover_dropped_frame_rate = 0.5\n").unwrap();

    let err = SessionConfig::load_from_file(&path).unwrap_err();
    assert!(matches!(err, SessionError::Configuration(_)));
}

#[test]
fn test_missing_file_is_an_io_error() {
    let temp_dir = TempDir::new().unwrap();
    let err = SessionConfig::load_from_file(temp_dir.path().join("nope.toml")).unwrap_err();
    assert!(matches!(err, SessionError::Io(_)));
}
