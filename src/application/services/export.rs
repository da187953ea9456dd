//! Export assembly service
//!
//! Builds the header and rows of the main export table and one table per
//! repeat group from a form definition and its submissions.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rayon::prelude::*;
use tracing::{debug, instrument};

use crate::application::mapper::{map_value, map_value_shifted, MediaContext};
use crate::application::{ApplicationError, ApplicationResult, IoResultExt, SubmissionResultExt};
use crate::domain::{FormDefinition, IncompleteSubmissionData, Model, Reason, XmlElement};
use crate::infrastructure::traits::FileSystem;

/// One exported table: a header and rows aligned with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    /// FQN of the repeat group, empty for the main table
    pub name: String,
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    fn new(name: impl Into<String>, header: Vec<String>) -> Self {
        Self {
            name: name.into(),
            header,
            rows: Vec::new(),
        }
    }
}

/// A parsed submission document.
#[derive(Debug, Clone)]
pub struct Submission {
    pub path: PathBuf,
    /// `meta/instanceID`, or the file stem when absent
    pub local_id: String,
    pub root: XmlElement,
}

/// Export tables of one submission, main row first.
#[derive(Debug, Clone)]
struct SubmissionRows {
    main: Vec<String>,
    repeats: Vec<Vec<Vec<String>>>,
}

/// Service assembling export tables.
pub struct ExportService {
    fs: Arc<dyn FileSystem>,
}

impl ExportService {
    /// Create a new export service.
    pub fn new(fs: Arc<dyn FileSystem>) -> Self {
        Self { fs }
    }

    /// Column names of the main table.
    pub fn header(&self, model: &Model<'_>) -> Vec<String> {
        model.flat_map(|child| child.names())
    }

    /// Pairs of one submission for the main table, aligned with
    /// [`header`](Self::header).
    pub fn row(
        &self,
        model: &Model<'_>,
        submission: &XmlElement,
        local_id: &str,
        media: &MediaContext,
    ) -> ApplicationResult<Vec<(String, String)>> {
        let mut pairs = Vec::new();
        for child in model.children() {
            let element = submission.child(child.name());
            pairs.extend(map_value(self.fs.as_ref(), &child, element, local_id, media)?);
        }
        Ok(pairs)
    }

    /// Column names of a repeat group's own table, relative to the group.
    pub fn repeat_header(&self, repeat: &Model<'_>) -> Vec<String> {
        let shift = repeat.count_ancestors();
        repeat.flat_map(|child| child.names_shifted(shift))
    }

    /// One row per occurrence of `repeat` in the submission.
    pub fn repeat_rows(
        &self,
        base: &Model<'_>,
        repeat: &Model<'_>,
        submission: &XmlElement,
        local_id: &str,
        media: &MediaContext,
    ) -> ApplicationResult<Vec<Vec<(String, String)>>> {
        let shift = repeat.count_ancestors();
        let base_depth = base.tree().name_chain(base.index()).len();
        let chain = repeat.tree().name_chain(repeat.index());
        let segments = chain.get(base_depth..).unwrap_or_default();

        let mut rows = Vec::new();
        for occurrence in occurrences(submission, segments) {
            let mut pairs = Vec::new();
            for child in repeat.children() {
                let element = occurrence.child(child.name());
                pairs.extend(map_value_shifted(
                    self.fs.as_ref(),
                    &child,
                    element,
                    local_id,
                    media,
                    shift,
                )?);
            }
            rows.push(pairs);
        }
        Ok(rows)
    }

    /// Read and parse one submission document.
    pub fn load_submission(&self, path: &Path) -> ApplicationResult<Submission> {
        let xml = self
            .fs
            .read_to_string(path)
            .with_path_context("read submission", path)?;
        let root = XmlElement::parse(&xml).with_submission_context(path)?;
        let local_id = root
            .child("meta")
            .and_then(|meta| meta.child("instanceID"))
            .map(|id| id.value().to_string())
            .filter(|id| !id.is_empty())
            .or_else(|| path.file_stem().map(|s| s.to_string_lossy().into_owned()))
            .unwrap_or_default();
        Ok(Submission {
            path: path.to_path_buf(),
            local_id,
            root,
        })
    }

    /// Submission files named by `inputs`; directories are searched for
    /// `.xml` files.
    pub fn collect_submissions(&self, inputs: &[PathBuf]) -> ApplicationResult<Vec<PathBuf>> {
        let mut files = Vec::new();
        for input in inputs {
            if self.fs.is_dir(input) {
                files.extend(
                    self.fs
                        .find_files(input, "xml")
                        .with_path_context("list submissions", input)?,
                );
            } else {
                files.push(input.clone());
            }
        }
        Ok(files)
    }

    /// Export all `submissions` of `definition`.
    ///
    /// Rows are mapped in parallel and returned in input order. Attachments
    /// are resolved against `working_dir`, or each submission's own directory.
    #[instrument(level = "debug", skip_all, fields(form_id = definition.form_id(), submissions = submissions.len()))]
    pub fn export(
        &self,
        definition: &FormDefinition,
        submissions: &[PathBuf],
        working_dir: Option<&Path>,
        export_media: bool,
        export_media_dir: &Path,
    ) -> ApplicationResult<Vec<Table>> {
        let model = definition.submission_element().ok_or_else(|| {
            ApplicationError::Form(IncompleteSubmissionData::new(
                Reason::BadParse,
                "definition has no submission element",
            ))
        })?;
        let repeats = model.repeatable_fields();

        let mut tables = vec![Table::new("", self.header(&model))];
        tables.extend(
            repeats
                .iter()
                .map(|r| Table::new(r.fqn(), self.repeat_header(r))),
        );

        let results: Vec<SubmissionRows> = submissions
            .par_iter()
            .map(|path| {
                let submission = self.load_submission(path)?;
                let dir = working_dir
                    .map(Path::to_path_buf)
                    .or_else(|| path.parent().map(Path::to_path_buf))
                    .unwrap_or_default();
                let media = MediaContext::new(dir, export_media, export_media_dir);
                let main = values(self.row(&model, &submission.root, &submission.local_id, &media)?);
                let repeats = repeats
                    .iter()
                    .map(|repeat| {
                        self.repeat_rows(&model, repeat, &submission.root, &submission.local_id, &media)
                            .map(|rows| rows.into_iter().map(values).collect())
                    })
                    .collect::<ApplicationResult<Vec<_>>>()?;
                Ok(SubmissionRows { main, repeats })
            })
            .collect::<ApplicationResult<Vec<_>>>()?;

        for result in results {
            tables[0].rows.push(result.main);
            for (table, rows) in tables.iter_mut().skip(1).zip(result.repeats) {
                table.rows.extend(rows);
            }
        }
        debug!(tables = tables.len(), rows = tables[0].rows.len(), "export assembled");
        Ok(tables)
    }
}

fn values(pairs: Vec<(String, String)>) -> Vec<String> {
    pairs.into_iter().map(|(_, value)| value).collect()
}

/// Elements reached from `root` by following `segments` through every
/// matching child at each level.
fn occurrences<'a>(root: &'a XmlElement, segments: &[&str]) -> Vec<&'a XmlElement> {
    let mut current = vec![root];
    for segment in segments {
        current = current
            .into_iter()
            .flat_map(|e| e.children.iter().filter(|c| c.name == *segment))
            .collect();
    }
    current
}
