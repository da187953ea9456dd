//! Form definition service
//!
//! Loads definitions from disk and compares stored against incoming files.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, instrument};

use crate::application::{ApplicationError, ApplicationResult, IoResultExt};
use crate::domain::{compare_xml, FieldTreeBuilder, FormDefinition, Verdict};
use crate::infrastructure::traits::FileSystem;

/// Service for loading and comparing form definitions.
pub struct FormService {
    fs: Arc<dyn FileSystem>,
    builder: FieldTreeBuilder,
    allow_legacy: bool,
}

impl FormService {
    /// Create a new form service.
    pub fn new(fs: Arc<dyn FileSystem>, allow_legacy: bool) -> Self {
        Self {
            fs,
            builder: FieldTreeBuilder::new(),
            allow_legacy,
        }
    }

    fn read(&self, path: &Path) -> ApplicationResult<String> {
        if !self.fs.is_file(path) {
            return Err(ApplicationError::DefinitionNotFound(path.to_path_buf()));
        }
        self.fs
            .read_to_string(path)
            .with_path_context("read form definition", path)
    }

    /// Load and validate a definition.
    ///
    /// Without a declared title the file stem is used.
    #[instrument(level = "debug", skip(self))]
    pub fn load(&self, path: &Path) -> ApplicationResult<FormDefinition> {
        let xml = self.read(path)?;
        let fallback_title = path.file_stem().map(|s| s.to_string_lossy().into_owned());
        let definition = FormDefinition::parse_with(
            &self.builder,
            &xml,
            fallback_title.as_deref(),
            self.allow_legacy,
        )?;
        debug!(
            form_id = definition.form_id(),
            version = definition.model_version().unwrap_or_default(),
            "loaded form definition"
        );
        Ok(definition)
    }

    /// Decide whether `incoming` may replace `existing`.
    ///
    /// `existing_title` stands in for a missing title on either definition;
    /// the stored file stem is used when it is absent.
    #[instrument(level = "debug", skip(self))]
    pub fn compare_files(
        &self,
        incoming: &Path,
        existing: &Path,
        existing_title: Option<&str>,
    ) -> ApplicationResult<Verdict> {
        let incoming_xml = self.read(incoming)?;
        let existing_xml = self.read(existing)?;
        if incoming_xml == existing_xml {
            return Ok(Verdict::Identical);
        }
        let fallback_title = existing_title.map(str::to_string).or_else(|| {
            existing
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
        });
        let incoming_definition = FormDefinition::parse_with(
            &self.builder,
            &incoming_xml,
            fallback_title.as_deref(),
            self.allow_legacy,
        )?;
        let verdict = compare_xml(&incoming_definition, &existing_xml, fallback_title.as_deref())?;
        info!(
            form_id = incoming_definition.form_id(),
            %verdict,
            "compared form definitions"
        );
        Ok(verdict)
    }
}
