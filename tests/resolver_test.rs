//! Tests for export column name resolution over parsed forms

use std::path::PathBuf;

use rstest::rstest;

use formschema::domain::{DataType, FieldTree, FieldTreeBuilder, Model, Multiplicity};

fn form_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/resources/forms")
        .join(name)
}

fn build(name: &str) -> FieldTree {
    let xml = std::fs::read_to_string(form_path(name)).expect("read form fixture");
    FieldTreeBuilder::new().build(&xml).expect("build field tree")
}

fn root_names(tree: &FieldTree) -> Vec<String> {
    Model::root(tree).unwrap().flat_map(|child| child.names())
}

#[test]
fn given_simple_form_when_resolving_names_then_fans_out_composite_fields() {
    let tree = build("simple.xml");

    let names = root_names(&tree);

    assert_eq!(
        names,
        vec![
            "name",
            "age",
            "location-Latitude",
            "location-Longitude",
            "location-Altitude",
            "location-Accuracy",
            "colors",
            "colors/red",
            "colors/green",
            "colors/blue",
            "details-note",
            "details-rating",
            "SET-OF-members",
            "photo",
            "meta-instanceID",
        ]
    );
}

#[test]
fn given_repeat_without_template_when_resolving_then_contributes_once() {
    let tree = build("nested_repeat.xml");
    let root = Model::root(&tree).unwrap();

    // raw children: site, visit (template), visit (instance 0)
    assert_eq!(root.size(), 3);
    assert_eq!(root.children().len(), 2);
    assert_eq!(root_names(&tree), vec!["site", "SET-OF-visit"]);

    let repeats: Vec<String> = root.repeatable_fields().iter().map(|m| m.fqn()).collect();
    assert_eq!(repeats, vec!["visit", "visit-sample"]);
}

#[test]
fn given_repeat_children_when_deduplicating_then_template_copy_survives() {
    let tree = build("nested_repeat.xml");
    let root = Model::root(&tree).unwrap();

    let visit = root
        .children()
        .into_iter()
        .find(|c| c.name() == "visit")
        .unwrap();

    assert_eq!(visit.multiplicity(), Multiplicity::Template);
    assert!(visit.is_repeatable());
}

#[rstest]
#[case("visit", 1, vec!["day", "SET-OF-sample"])]
#[case("visit-sample", 2, vec!["code"])]
fn given_repeat_when_shifting_names_then_relative_to_group(
    #[case] fqn: &str,
    #[case] shift: usize,
    #[case] expected: Vec<&str>,
) {
    let tree = build("nested_repeat.xml");
    let root = Model::root(&tree).unwrap();
    let repeat = root
        .repeatable_fields()
        .into_iter()
        .find(|m| m.fqn() == fqn)
        .unwrap();

    assert_eq!(repeat.count_ancestors(), shift);
    assert_eq!(repeat.flat_map(|c| c.names_shifted(shift)), expected);
}

#[test]
fn given_fields_when_reading_types_then_bind_types_win_over_controls() {
    let tree = build("simple.xml");
    let root = Model::root(&tree).unwrap();
    let types: Vec<(String, DataType)> = root
        .children()
        .iter()
        .map(|c| (c.fqn(), c.data_type()))
        .collect();

    assert!(types.contains(&("age".to_string(), DataType::Integer)));
    assert!(types.contains(&("location".to_string(), DataType::Geopoint)));
    assert!(types.contains(&("colors".to_string(), DataType::ChoiceList)));
    assert!(types.contains(&("photo".to_string(), DataType::Binary)));
    assert!(types.contains(&("details".to_string(), DataType::Null)));
}

#[test]
fn given_every_node_when_resolving_names_then_never_empty() {
    let tree = build("simple.xml");
    for (idx, _) in tree.iter() {
        let model = Model::new(&tree, idx).unwrap();
        if !model.is_root() {
            assert!(!model.names().is_empty(), "{:?}", model);
        }
    }
}
