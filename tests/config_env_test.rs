//! FORMSCHEMA_* environment overrides.
//!
//! Kept in its own test binary: environment variables are process-wide.

use std::fs;

use tempfile::TempDir;

use formschema::config::Settings;

#[test]
fn given_env_vars_when_load_then_override_files() {
    // Arrange
    let temp = TempDir::new().unwrap();
    let local = temp.path().join("local.toml");
    fs::write(&local, "[export]\nexport_media = false\nmedia_dir_name = \"files\"\n").unwrap();
    std::env::set_var("FORMSCHEMA_EXPORT__EXPORT_MEDIA", "true");
    std::env::set_var("FORMSCHEMA_ALLOW_LEGACY", "true");

    // Act
    let settings = Settings::load_from(None, Some(&local)).expect("load settings");

    // Assert
    assert!(settings.export.export_media);
    assert!(settings.allow_legacy);
    assert_eq!(settings.export.media_dir_name, "files");

    std::env::remove_var("FORMSCHEMA_EXPORT__EXPORT_MEDIA");
    std::env::remove_var("FORMSCHEMA_ALLOW_LEGACY");
}
