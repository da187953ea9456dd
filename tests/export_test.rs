//! Tests for ExportService
//!
//! Export tables are built from the fixtures under `tests/resources`:
//! - `simple-1` has one repeat group with two occurrences and an attachment
//! - `visits` has nested repeats and a submission without any repeat

use std::path::PathBuf;
use std::sync::Arc;

use tempfile::TempDir;

use formschema::application::services::{ExportService, FormService, Table};
use formschema::application::ApplicationError;
use formschema::config::Settings;
use formschema::infrastructure::traits::RealFileSystem;
use formschema::infrastructure::ServiceContainer;
use formschema::util::testing::init_test_setup;

fn resources() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/resources")
}

fn services() -> (FormService, ExportService) {
    init_test_setup();
    let fs = Arc::new(RealFileSystem);
    (
        FormService::new(fs.clone(), false),
        ExportService::new(fs),
    )
}

fn table<'a>(tables: &'a [Table], name: &str) -> &'a Table {
    tables
        .iter()
        .find(|t| t.name == name)
        .unwrap_or_else(|| panic!("no table {:?}", name))
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

// ============================================================
// main table
// ============================================================

#[test]
fn given_simple_submission_when_exporting_then_main_row_aligned_with_header() {
    // Arrange
    let (forms, export) = services();
    let definition = forms.load(&resources().join("forms/simple.xml")).unwrap();
    let submission = resources().join("submissions/simple-1/submission.xml");

    // Act
    let tables = export
        .export(&definition, &[submission], None, false, &PathBuf::from("media"))
        .unwrap();

    // Assert
    let main = table(&tables, "");
    assert_eq!(main.header.len(), 15);
    assert_eq!(main.rows.len(), 1);
    assert_eq!(
        main.rows[0],
        strings(&[
            "Ada",
            "36",
            "47.37",
            "8.54",
            "408",
            "5.0",
            "red blue",
            "1",
            "0",
            "1",
            "first, visit",
            "good",
            "uuid:0001/members",
            "photo.jpg",
            "uuid:0001",
        ])
    );
}

#[test]
fn given_repeat_group_when_exporting_then_one_row_per_occurrence() {
    let (forms, export) = services();
    let definition = forms.load(&resources().join("forms/simple.xml")).unwrap();
    let submission = resources().join("submissions/simple-1/submission.xml");

    let tables = export
        .export(&definition, &[submission], None, false, &PathBuf::from("media"))
        .unwrap();

    assert_eq!(tables.len(), 2);
    let members = table(&tables, "members");
    assert_eq!(members.header, strings(&["member_name", "member_age"]));
    assert_eq!(
        members.rows,
        vec![strings(&["Bob", "7"]), strings(&["Eve", "4"])]
    );
}

#[test]
fn given_media_export_when_exporting_then_attachment_copied() {
    let temp = TempDir::new().unwrap();
    let media_dir = temp.path().join("media");
    let (forms, export) = services();
    let definition = forms.load(&resources().join("forms/simple.xml")).unwrap();
    let submission = resources().join("submissions/simple-1/submission.xml");

    let tables = export
        .export(&definition, &[submission], None, true, &media_dir)
        .unwrap();

    let main = table(&tables, "");
    let photo = main.header.iter().position(|h| h == "photo").unwrap();
    assert_eq!(main.rows[0][photo], "media/photo.jpg");
    assert!(media_dir.join("photo.jpg").is_file());
}

// ============================================================
// nested repeats
// ============================================================

#[test]
fn given_nested_repeats_when_exporting_then_tables_per_level() {
    let (forms, export) = services();
    let definition = forms
        .load(&resources().join("forms/nested_repeat.xml"))
        .unwrap();
    let submissions = export
        .collect_submissions(&[resources().join("submissions/visits")])
        .unwrap();

    let tables = export
        .export(&definition, &submissions, None, false, &PathBuf::from("media"))
        .unwrap();

    let names: Vec<&str> = tables.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["", "visit", "visit-sample"]);

    let main = table(&tables, "");
    assert_eq!(main.header, strings(&["site", "SET-OF-visit"]));
    assert_eq!(
        main.rows,
        vec![
            strings(&["Lakeside", "visit-1/visit"]),
            strings(&["Hilltop", ""]),
        ]
    );

    let visit = table(&tables, "visit");
    assert_eq!(visit.header, strings(&["day", "SET-OF-sample"]));
    assert_eq!(
        visit.rows,
        vec![
            strings(&["2024-01-01", "visit-1/visit-sample"]),
            strings(&["2024-01-02", "visit-1/visit-sample"]),
        ]
    );

    let sample = table(&tables, "visit-sample");
    assert_eq!(sample.header, strings(&["code"]));
    assert_eq!(
        sample.rows,
        vec![strings(&["x1"]), strings(&["x2"]), strings(&["y1"])]
    );
}

// ============================================================
// submissions
// ============================================================

#[test]
fn given_submission_without_instance_id_when_loading_then_file_stem_used() {
    let (_, export) = services();

    let submission = export
        .load_submission(&resources().join("submissions/visits/visit-2.xml"))
        .unwrap();

    assert_eq!(submission.local_id, "visit-2");
    assert_eq!(submission.root.name, "data");
}

#[test]
fn given_directory_when_collecting_then_only_xml_files_sorted() {
    let (_, export) = services();

    let files = export
        .collect_submissions(&[resources().join("submissions")])
        .unwrap();

    let names: Vec<String> = files
        .iter()
        .map(|f| f.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["submission.xml", "visit-1.xml", "visit-2.xml"]);
}

#[test]
fn given_malformed_submission_when_exporting_then_invalid_submission_error() {
    let temp = TempDir::new().unwrap();
    let broken = temp.path().join("broken.xml");
    std::fs::write(&broken, "<data><name>unclosed").unwrap();
    let (forms, export) = services();
    let definition = forms.load(&resources().join("forms/simple.xml")).unwrap();

    let err = export
        .export(&definition, &[broken.clone()], None, false, &PathBuf::from("media"))
        .unwrap_err();

    match err {
        ApplicationError::InvalidSubmission { path, .. } => assert_eq!(path, broken),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn given_missing_definition_when_loading_then_not_found() {
    let container = ServiceContainer::new(Settings::default());

    let err = container
        .forms
        .load(&resources().join("forms/does-not-exist.xml"))
        .unwrap_err();

    assert!(matches!(err, ApplicationError::DefinitionNotFound(_)));
}
