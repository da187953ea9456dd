//! Configuration management with layered loading
//!
//! Precedence (lowest to highest):
//! 1. Compiled defaults
//! 2. Global config: `$XDG_CONFIG_HOME/formschema/formschema.toml`
//! 3. Local config: `<project_dir>/.formschema.toml`
//! 4. Environment variables: `FORMSCHEMA_*` prefix, `__` between sections

use std::path::{Path, PathBuf};

use config::{Config, ConfigError, Environment};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::application::ApplicationError;
use crate::util::path::expand_path;

/// Export behavior.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ExportSettings {
    /// Copy attachments next to the exported rows
    pub export_media: bool,
    /// Name of the media directory created inside the output directory
    pub media_dir_name: String,
    /// Directory submissions and attachments are read from (default: the
    /// submission's own directory)
    pub working_dir: Option<PathBuf>,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            export_media: false,
            media_dir_name: "media".into(),
            working_dir: None,
        }
    }
}

/// Raw export settings for intermediate parsing (`None` → not specified).
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RawExportSettings {
    pub export_media: Option<bool>,
    pub media_dir_name: Option<String>,
    pub working_dir: Option<PathBuf>,
}

/// Raw settings for intermediate parsing.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RawSettings {
    pub allow_legacy: Option<bool>,
    pub export: RawExportSettings,
}

/// Unified configuration for formschema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Settings {
    /// Accept a malformed instance `xmlns` as form id
    pub allow_legacy: bool,
    pub export: ExportSettings,
}

/// Get the XDG config directory for formschema.
pub fn global_config_dir() -> Option<PathBuf> {
    ProjectDirs::from("", "", "formschema").map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the path to the global config file.
pub fn global_config_path() -> Option<PathBuf> {
    global_config_dir().map(|dir| dir.join("formschema.toml"))
}

/// Get the path to the local config file in a project directory.
pub fn local_config_path(project_dir: &Path) -> PathBuf {
    project_dir.join(".formschema.toml")
}

/// Load a TOML file into RawSettings for manual merging.
fn load_raw_settings(path: &Path) -> Result<RawSettings, ApplicationError> {
    let content = std::fs::read_to_string(path).map_err(|e| ApplicationError::Config {
        message: format!("read {}: {}", path.display(), e),
    })?;
    toml::from_str(&content).map_err(|e| ApplicationError::Config {
        message: format!("parse {}: {}", path.display(), e),
    })
}

impl Settings {
    /// Expand `~` and `$VAR` in path-like fields.
    fn expand_paths(&mut self) {
        if let Some(dir) = &self.export.working_dir {
            self.export.working_dir = Some(expand_path(&dir.to_string_lossy()));
        }
    }

    /// Overlay wins wherever it specifies a value.
    fn merge_with(&self, overlay: &RawSettings) -> Self {
        Self {
            allow_legacy: overlay.allow_legacy.unwrap_or(self.allow_legacy),
            export: ExportSettings {
                export_media: overlay
                    .export
                    .export_media
                    .unwrap_or(self.export.export_media),
                media_dir_name: overlay
                    .export
                    .media_dir_name
                    .clone()
                    .unwrap_or_else(|| self.export.media_dir_name.clone()),
                working_dir: overlay
                    .export
                    .working_dir
                    .clone()
                    .or_else(|| self.export.working_dir.clone()),
            },
        }
    }

    /// Load settings with layered precedence.
    ///
    /// # Arguments
    /// * `project_dir` - Optional directory holding a `.formschema.toml`
    pub fn load(project_dir: Option<&Path>) -> Result<Self, ApplicationError> {
        let global = global_config_path().filter(|p| p.exists());
        let local = project_dir
            .map(local_config_path)
            .filter(|p| p.exists());
        Self::load_from(global.as_deref(), local.as_deref())
    }

    /// Load from explicit config files; missing layers are skipped.
    pub fn load_from(global: Option<&Path>, local: Option<&Path>) -> Result<Self, ApplicationError> {
        let mut current = Self::default();
        for path in [global, local].into_iter().flatten() {
            let raw = load_raw_settings(path)?;
            current = current.merge_with(&raw);
        }
        current = Self::apply_env_overrides(current)?;
        current.expand_paths();
        Ok(current)
    }

    /// Apply FORMSCHEMA_* environment variables as explicit overrides.
    fn apply_env_overrides(mut settings: Self) -> Result<Self, ApplicationError> {
        let config = Config::builder()
            .add_source(Environment::with_prefix("FORMSCHEMA").separator("__"))
            .build()
            .map_err(config_err)?;

        if let Ok(val) = config.get_bool("allow_legacy") {
            settings.allow_legacy = val;
        }
        if let Ok(val) = config.get_bool("export.export_media") {
            settings.export.export_media = val;
        }
        if let Ok(val) = config.get_string("export.media_dir_name") {
            settings.export.media_dir_name = val;
        }
        if let Ok(val) = config.get_string("export.working_dir") {
            settings.export.working_dir = Some(PathBuf::from(val));
        }

        Ok(settings)
    }

    /// Show the effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String, ApplicationError> {
        toml::to_string_pretty(self).map_err(|e| ApplicationError::Config {
            message: format!("serialize config: {e}"),
        })
    }

    /// Generate a template config file.
    pub fn template() -> String {
        r#"# formschema configuration
#
# Locations (by precedence, lowest to highest):
#   Global: ~/.config/formschema/formschema.toml
#   Local:  <project_dir>/.formschema.toml
#   Env:    FORMSCHEMA_* environment variables, e.g. FORMSCHEMA_EXPORT__EXPORT_MEDIA=true

# Accept form definitions whose instance xmlns is not of the form
# "http://your.domain.org/formId" as their form id
# allow_legacy = false

[export]
# Copy attachments into the media directory next to the exported rows
# export_media = false

# Name of the media directory
# media_dir_name = "media"

# Directory submissions and attachments are read from
# working_dir = "~/submissions"
"#
        .to_string()
    }
}

fn config_err(e: ConfigError) -> ApplicationError {
    ApplicationError::Config {
        message: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn given_default_settings_when_created_then_media_dir_is_media() {
        let settings = Settings::default();
        assert!(!settings.allow_legacy);
        assert!(!settings.export.export_media);
        assert_eq!(settings.export.media_dir_name, "media");
        assert!(settings.export.working_dir.is_none());
    }

    #[test]
    fn given_partial_overlay_when_merging_then_only_specified_fields_change() {
        let base = Settings::default();
        let overlay = RawSettings {
            allow_legacy: Some(true),
            export: RawExportSettings {
                export_media: None,
                media_dir_name: Some("attachments".into()),
                working_dir: None,
            },
        };

        let result = base.merge_with(&overlay);

        assert!(result.allow_legacy);
        assert!(!result.export.export_media);
        assert_eq!(result.export.media_dir_name, "attachments");
    }

    #[test]
    fn given_tilde_in_working_dir_when_expand_paths_then_expands_to_home() {
        let mut settings = Settings::default();
        settings.export.working_dir = Some(PathBuf::from("~/submissions"));

        settings.expand_paths();

        let home = std::env::var("HOME").expect("HOME should be set");
        let dir = settings.export.working_dir.unwrap();
        assert!(dir.to_string_lossy().starts_with(&home));
    }

    #[test]
    fn given_settings_when_serializing_then_template_and_toml_parse() {
        let toml_text = Settings::default().to_toml().unwrap();
        let parsed: RawSettings = toml::from_str(&toml_text).unwrap();
        assert_eq!(parsed.allow_legacy, Some(false));
        let template: RawSettings = toml::from_str(&Settings::template()).unwrap();
        assert!(template.allow_legacy.is_none());
    }
}
