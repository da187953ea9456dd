//! Value mapping: one submission element to export name/value pairs.
//!
//! Every mapper emits exactly as many pairs as [`Model::names_shifted`]
//! returns for the same model and shift, whether the element is present or
//! not. Rows stay rectangular this way.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::{instrument, trace, warn};

use crate::application::{ApplicationResult, IoResultExt};
use crate::domain::model::{GEOPOINT_COMPONENTS, REPEAT_PREFIX};
use crate::domain::{DataType, Model, XmlElement};
use crate::infrastructure::traits::FileSystem;
use crate::util::path::relative_media_path;

/// Where media files live and whether they get exported.
#[derive(Debug, Clone)]
pub struct MediaContext {
    /// Directory holding the submission and its attachments
    pub working_dir: PathBuf,
    pub export_media: bool,
    /// Destination of copied attachments
    pub export_media_dir: PathBuf,
}

impl MediaContext {
    pub fn new(working_dir: impl Into<PathBuf>, export_media: bool, export_media_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
            export_media,
            export_media_dir: export_media_dir.into(),
        }
    }
}

/// Per-type transform of a present element into its pairs.
pub type Transform = fn(&str, &XmlElement) -> Vec<(String, String)>;

/// Mapping strategy for one field, chosen by its data type.
#[derive(Debug, Clone, Copy)]
pub enum FieldMapper {
    /// Fixed-width output from a supplied transform
    Simple { transform: Transform, width: usize },
    Choice,
    Geopoint,
    Media,
    Group,
    Repeat,
}

impl FieldMapper {
    pub fn for_model(model: &Model<'_>) -> Self {
        match model.data_type() {
            DataType::Null if model.is_repeatable() => FieldMapper::Repeat,
            DataType::Null if !model.is_empty() => FieldMapper::Group,
            DataType::ChoiceList => FieldMapper::Choice,
            DataType::Geopoint => FieldMapper::Geopoint,
            DataType::Binary => FieldMapper::Media,
            DataType::Null
            | DataType::Text
            | DataType::Integer
            | DataType::Decimal
            | DataType::Date
            | DataType::DateTime
            | DataType::Time
            | DataType::Geoshape
            | DataType::Geotrace
            | DataType::ChoiceSingle
            | DataType::Barcode => FieldMapper::Simple {
                transform: text_value,
                width: 1,
            },
        }
    }
}

fn text_value(name: &str, element: &XmlElement) -> Vec<(String, String)> {
    vec![(name.to_string(), element.value().to_string())]
}

/// Map `element` (the submission's counterpart of `model`) to export pairs.
pub fn map_value(
    fs: &dyn FileSystem,
    model: &Model<'_>,
    element: Option<&XmlElement>,
    local_id: &str,
    media: &MediaContext,
) -> ApplicationResult<Vec<(String, String)>> {
    map_value_shifted(fs, model, element, local_id, media, 0)
}

/// Like [`map_value`], with names relative to the `shift`-th ancestor.
#[instrument(level = "trace", skip_all, fields(field = model.name()))]
pub fn map_value_shifted(
    fs: &dyn FileSystem,
    model: &Model<'_>,
    element: Option<&XmlElement>,
    local_id: &str,
    media: &MediaContext,
    shift: usize,
) -> ApplicationResult<Vec<(String, String)>> {
    let fqn = model.fqn_shifted(shift);
    let pairs = match FieldMapper::for_model(model) {
        FieldMapper::Simple { transform, width } => match element {
            Some(e) => transform(&fqn, e),
            None => empty(&fqn, width),
        },
        FieldMapper::Choice => choice_pairs(&fqn, model.choices(), element),
        FieldMapper::Geopoint => geopoint_pairs(&fqn, element),
        FieldMapper::Media => vec![(fqn, media_value(fs, element, media)?)],
        FieldMapper::Repeat => {
            let value = element
                .map(|_| format!("{}/{}", local_id, model.fqn()))
                .unwrap_or_default();
            vec![(format!("{}{}", REPEAT_PREFIX, fqn), value)]
        }
        FieldMapper::Group => {
            let mut pairs = Vec::new();
            for child in model.children() {
                let child_element = element.and_then(|e| e.child(child.name()));
                pairs.extend(map_value_shifted(fs, &child, child_element, local_id, media, shift)?);
            }
            pairs
        }
    };
    trace!(pairs = pairs.len(), "mapped field");
    Ok(pairs)
}

fn empty(fqn: &str, width: usize) -> Vec<(String, String)> {
    std::iter::repeat_with(|| (fqn.to_string(), String::new()))
        .take(width)
        .collect()
}

/// Base pair, then one `1`/`0` flag per declared choice.
fn choice_pairs(fqn: &str, choices: &[String], element: Option<&XmlElement>) -> Vec<(String, String)> {
    let raw = element.map(|e| e.value()).unwrap_or_default();
    let selections: HashSet<&str> = raw.split_whitespace().collect();
    std::iter::once((fqn.to_string(), raw.to_string()))
        .chain(choices.iter().map(|choice| {
            let flag = if selections.contains(choice.as_str()) { "1" } else { "0" };
            (format!("{}/{}", fqn, choice), flag.to_string())
        }))
        .collect()
}

fn geopoint_pairs(fqn: &str, element: Option<&XmlElement>) -> Vec<(String, String)> {
    let mut parts = element
        .map(|e| e.value())
        .unwrap_or_default()
        .split_whitespace();
    GEOPOINT_COMPONENTS
        .iter()
        .map(|component| {
            let value = parts.next().unwrap_or_default();
            (format!("{}-{}", fqn, component), value.to_string())
        })
        .collect()
}

/// Resolve an attachment file name, copying it when media export is on.
fn media_value(
    fs: &dyn FileSystem,
    element: Option<&XmlElement>,
    media: &MediaContext,
) -> ApplicationResult<String> {
    let Some(file_name) = element.map(|e| e.value()).filter(|v| !v.is_empty()) else {
        return Ok(String::new());
    };
    if !media.export_media {
        return Ok(file_name.to_string());
    }

    let source = media.working_dir.join(file_name);
    if !fs.is_file(&source) {
        warn!(file = %source.display(), "media file not found");
        return Ok(String::new());
    }
    fs.create_dir_all(&media.export_media_dir)
        .with_path_context("create media directory", &media.export_media_dir)?;
    let destination = free_destination(fs, &source, &media.export_media_dir.join(file_name))?;
    if !fs.exists(&destination) {
        fs.copy(&source, &destination)
            .with_path_context("copy media file", &source)?;
    }
    Ok(relative_media_path(&media.export_media_dir, &destination))
}

/// First of `name`, `name-2`, `name-3`, ... that is free or already holds
/// the same bytes as `source`.
fn free_destination(fs: &dyn FileSystem, source: &Path, wanted: &Path) -> ApplicationResult<PathBuf> {
    let stem = wanted
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = wanted.extension().map(|e| e.to_string_lossy().into_owned());
    let mut candidate = wanted.to_path_buf();
    let mut sequence = 2;
    while fs.exists(&candidate) {
        if same_content(fs, source, &candidate)? {
            break;
        }
        let name = match &extension {
            Some(ext) => format!("{}-{}.{}", stem, sequence, ext),
            None => format!("{}-{}", stem, sequence),
        };
        candidate = wanted.with_file_name(name);
        sequence += 1;
    }
    Ok(candidate)
}

fn same_content(fs: &dyn FileSystem, a: &Path, b: &Path) -> ApplicationResult<bool> {
    let left = fs.read(a).with_path_context("read media file", a)?;
    let right = fs.read(b).with_path_context("read media file", b)?;
    Ok(left == right)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::FieldTreeBuilder;
    use crate::infrastructure::traits::RealFileSystem;

    fn element(name: &str, value: &str) -> XmlElement {
        let mut e = XmlElement::new(name);
        e.text = value.to_string();
        e
    }

    #[test]
    fn given_selected_tokens_when_mapping_choices_then_flags_membership() {
        let choices = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let pairs = choice_pairs("base", &choices, Some(&element("base", "a b")));
        assert_eq!(
            pairs,
            vec![
                ("base".to_string(), "a b".to_string()),
                ("base/a".to_string(), "1".to_string()),
                ("base/b".to_string(), "1".to_string()),
                ("base/c".to_string(), "0".to_string()),
            ]
        );
    }

    #[test]
    fn given_partial_geopoint_when_mapping_then_missing_components_empty() {
        let pairs = geopoint_pairs("loc", Some(&element("loc", "1.5 2.5")));
        let values: Vec<_> = pairs.iter().map(|(_, v)| v.as_str()).collect();
        assert_eq!(values, vec!["1.5", "2.5", "", ""]);
        assert_eq!(pairs[3].0, "loc-Accuracy");
    }

    #[test]
    fn given_absent_group_when_mapping_then_width_matches_names() {
        let xml = r#"<h:html xmlns="http://www.w3.org/2002/xforms" xmlns:h="http://www.w3.org/1999/xhtml">
  <h:head><h:title>t</h:title><model>
    <instance><data id="t"><g><a/><loc/></g></data></instance>
    <bind nodeset="/data/g/a" type="string"/>
    <bind nodeset="/data/g/loc" type="geopoint"/>
  </model></h:head><h:body/></h:html>"#;
        let tree = FieldTreeBuilder::new().build(xml).unwrap();
        let group = Model::root(&tree).unwrap().children()[0];
        let media = MediaContext::new(".", false, "media");

        let pairs = map_value(&RealFileSystem, &group, None, "uuid:1", &media).unwrap();

        assert_eq!(pairs.len(), group.names().len());
        assert!(pairs.iter().all(|(_, v)| v.is_empty()));
    }
}
