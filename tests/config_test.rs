//! Integration tests for Settings loading with layered precedence.
//!
//! Precedence: defaults < global file < local file < FORMSCHEMA_* env vars.
//! Env overrides are covered in `config_env_test.rs`, which runs as its own
//! process so no variable leaks into these tests.

use std::fs;

use tempfile::TempDir;

use formschema::config::{local_config_path, Settings};

// ============================================================
// Settings::load_from() layering
// ============================================================

#[test]
fn given_no_config_files_when_load_then_defaults() {
    let settings = Settings::load_from(None, None).expect("load settings");

    assert_eq!(settings, Settings::default());
}

#[test]
fn given_global_and_local_when_load_then_local_wins_per_field() {
    // Arrange
    let temp = TempDir::new().unwrap();
    let global = temp.path().join("global.toml");
    let local = temp.path().join("local.toml");
    fs::write(
        &global,
        r#"
allow_legacy = true

[export]
export_media = true
media_dir_name = "attachments"
"#,
    )
    .unwrap();
    fs::write(
        &local,
        r#"
[export]
media_dir_name = "files"
"#,
    )
    .unwrap();

    // Act
    let settings = Settings::load_from(Some(&global), Some(&local)).expect("load settings");

    // Assert: unspecified local fields keep the global values
    assert!(settings.allow_legacy);
    assert!(settings.export.export_media);
    assert_eq!(settings.export.media_dir_name, "files");
}

#[test]
fn given_project_dir_with_local_config_when_load_then_applied() {
    let temp = TempDir::new().unwrap();
    fs::write(
        local_config_path(temp.path()),
        "[export]\nworking_dir = \"/data/submissions\"\n",
    )
    .unwrap();

    let settings = Settings::load(Some(temp.path())).expect("load settings");

    assert_eq!(
        settings.export.working_dir.as_deref(),
        Some(std::path::Path::new("/data/submissions"))
    );
}

#[test]
fn given_invalid_toml_when_load_then_config_error() {
    let temp = TempDir::new().unwrap();
    let local = temp.path().join("broken.toml");
    fs::write(&local, "allow_legacy = [").unwrap();

    let err = Settings::load_from(None, Some(&local)).unwrap_err();

    assert!(err.to_string().starts_with("config error"), "{err}");
}

#[test]
fn given_settings_when_rendering_toml_then_loadable_again() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("roundtrip.toml");
    let mut settings = Settings::default();
    settings.allow_legacy = true;
    settings.export.media_dir_name = "m".into();
    fs::write(&path, settings.to_toml().unwrap()).unwrap();

    let loaded = Settings::load_from(Some(&path), None).unwrap();

    assert_eq!(loaded, settings);
}
