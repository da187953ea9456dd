//! Field tree builder: turns raw XForm text into a [`FieldTree`].

use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use generational_arena::Index;
use tracing::{debug, info, instrument, warn};

use crate::domain::arena::{FieldNode, FieldTree};
use crate::domain::entities::{
    Binding, DataType, Multiplicity, QualifiedName, SubmissionProfile, NAMESPACE_JAVAROSA,
};
use crate::domain::error::{DomainResult, IncompleteSubmissionData};
use crate::domain::xml::XmlElement;

/// Bind `type` and body control vocabularies, registered once per process.
#[derive(Debug)]
pub struct TypeRegistry {
    bind_types: HashMap<&'static str, DataType>,
    controls: HashMap<&'static str, DataType>,
}

impl TypeRegistry {
    fn register() -> Self {
        let bind_types = HashMap::from([
            ("string", DataType::Text),
            ("int", DataType::Integer),
            ("integer", DataType::Integer),
            ("long", DataType::Integer),
            ("decimal", DataType::Decimal),
            ("date", DataType::Date),
            ("datetime", DataType::DateTime),
            ("time", DataType::Time),
            ("geopoint", DataType::Geopoint),
            ("geoshape", DataType::Geoshape),
            ("geotrace", DataType::Geotrace),
            ("select1", DataType::ChoiceSingle),
            ("select", DataType::ChoiceList),
            ("binary", DataType::Binary),
            ("barcode", DataType::Barcode),
        ]);
        let controls = HashMap::from([
            ("input", DataType::Text),
            ("select1", DataType::ChoiceSingle),
            ("select", DataType::ChoiceList),
            ("upload", DataType::Binary),
        ]);
        Self {
            bind_types,
            controls,
        }
    }

    /// Data type for a bind `type` value; the namespace prefix is ignored.
    pub fn bind_type(&self, value: &str) -> Option<DataType> {
        let local = value.rsplit(':').next().unwrap_or(value);
        self.bind_types
            .get(local.to_ascii_lowercase().as_str())
            .copied()
    }

    pub fn control_type(&self, control: &str) -> Option<DataType> {
        self.controls.get(control).copied()
    }

    fn is_control(&self, name: &str) -> bool {
        self.controls.contains_key(name)
    }
}

static REGISTRY: OnceLock<TypeRegistry> = OnceLock::new();

/// Register the XForm vocabularies. Runs the registration at most once per
/// process no matter how many threads call it.
pub fn initialize() -> &'static TypeRegistry {
    REGISTRY.get_or_init(|| {
        let registry = TypeRegistry::register();
        info!(
            bind_types = registry.bind_types.len(),
            controls = registry.controls.len(),
            "registered xform vocabularies"
        );
        registry
    })
}

/// What the body declares for one control.
#[derive(Debug, Default)]
struct Control {
    data_type: Option<DataType>,
    choices: Vec<String>,
}

/// Facts gathered from `<h:body>`.
#[derive(Debug, Default)]
struct BodyIndex {
    repeats: HashSet<String>,
    controls: HashMap<String, Control>,
}

/// Builds immutable field trees from raw form definitions.
pub struct FieldTreeBuilder {
    registry: &'static TypeRegistry,
}

impl Default for FieldTreeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl FieldTreeBuilder {
    pub fn new() -> Self {
        Self {
            registry: initialize(),
        }
    }

    /// Parse raw XForm text into a field tree.
    #[instrument(level = "debug", skip(self, xml), fields(len = xml.len()))]
    pub fn build(&self, xml: &str) -> DomainResult<FieldTree> {
        let document = XmlElement::parse(xml)?;
        self.build_from_document(&document)
    }

    pub fn build_from_document(&self, document: &XmlElement) -> DomainResult<FieldTree> {
        let model = document
            .find_descendant("model")
            .ok_or_else(|| IncompleteSubmissionData::bad_parse("no <model> element"))?;
        let instance = model
            .children_named("instance")
            .find(|i| i.attr("id").is_none())
            .ok_or_else(|| IncompleteSubmissionData::bad_parse("no primary <instance> element"))?;
        let instance_root = instance.children.first().ok_or_else(|| {
            IncompleteSubmissionData::bad_parse("primary <instance> has no root element")
        })?;

        let bindings = collect_bindings(model);
        let body = document
            .find_descendant("body")
            .map(|body| self.index_body(body))
            .unwrap_or_default();
        debug!(
            bindings = bindings.len(),
            repeats = body.repeats.len(),
            controls = body.controls.len(),
            "indexed form definition"
        );

        let mut tree = FieldTree::new();
        let wrapper = tree.wrapper();
        let root_path = format!("/{}", instance_root.name);
        let mut materializer = Materializer {
            registry: self.registry,
            bindings: &bindings,
            body: &body,
        };
        let root = materializer.add_node(
            &mut tree,
            instance_root,
            wrapper,
            &root_path,
            Multiplicity::Instance(0),
            false,
        );
        materializer.add_children(&mut tree, instance_root, root, &root_path, false);

        let title = document
            .find_descendant("head")
            .and_then(|head| head.child("title"))
            .map(|t| t.value().to_string())
            .filter(|t| !t.is_empty());
        let submission = model
            .child("submission")
            .map(|s| submission_profile(s, &bindings));

        // an instance inheriting the document's default namespace declares no schema
        let schema = instance_root
            .namespace
            .clone()
            .filter(|ns| !ns.is_empty() && model.namespace.as_ref() != Some(ns));
        tree.set_schema(schema);
        tree.set_title(title);
        tree.set_submission(submission);
        tree.set_bindings(bindings);
        Ok(tree)
    }

    fn index_body(&self, body: &XmlElement) -> BodyIndex {
        let mut index = BodyIndex::default();
        for child in &body.children {
            self.index_body_element(child, "", &mut index);
        }
        index
    }

    fn index_body_element(&self, element: &XmlElement, context: &str, index: &mut BodyIndex) {
        match element.name.as_str() {
            "group" => {
                let context = element
                    .attr("ref")
                    .map(|r| resolve_ref(r, context))
                    .unwrap_or_else(|| context.to_string());
                for child in &element.children {
                    self.index_body_element(child, &context, index);
                }
            }
            "repeat" => {
                let Some(nodeset) = element.attr("nodeset").or_else(|| element.attr("ref")) else {
                    warn!("repeat without nodeset ignored");
                    return;
                };
                let path = resolve_ref(nodeset, context);
                for child in &element.children {
                    self.index_body_element(child, &path, index);
                }
                index.repeats.insert(path);
            }
            name if self.registry.is_control(name) => {
                let Some(reference) = element.attr("ref") else {
                    return;
                };
                let choices = element
                    .children_named("item")
                    .filter_map(|item| item.child("value"))
                    .map(|value| value.value().to_string())
                    .collect();
                index.controls.insert(
                    resolve_ref(reference, context),
                    Control {
                        data_type: self.registry.control_type(name),
                        choices,
                    },
                );
            }
            _ => {
                for child in &element.children {
                    self.index_body_element(child, context, index);
                }
            }
        }
    }
}

/// Turns instance elements into arena nodes.
struct Materializer<'a> {
    registry: &'static TypeRegistry,
    bindings: &'a [Binding],
    body: &'a BodyIndex,
}

impl Materializer<'_> {
    fn add_node(
        &mut self,
        tree: &mut FieldTree,
        element: &XmlElement,
        parent: Index,
        path: &str,
        multiplicity: Multiplicity,
        template: bool,
    ) -> Index {
        let template_marker = QualifiedName::namespaced(NAMESPACE_JAVAROSA, "template");
        let mut node = FieldNode::new(element.name.clone());
        node.multiplicity = multiplicity;
        node.repeatable = self.body.repeats.contains(path);
        node.attributes = element
            .attributes
            .iter()
            .filter(|a| a.name != template_marker)
            .map(|a| (a.name.clone(), a.value.clone()))
            .collect();

        if element.children.is_empty() {
            let control = self.body.controls.get(path);
            node.data_type = self
                .bind_type(path)
                .or_else(|| control.and_then(|c| c.data_type))
                .unwrap_or(DataType::Null);
            if matches!(node.data_type, DataType::ChoiceList | DataType::ChoiceSingle) {
                node.choices = control.map(|c| c.choices.clone()).unwrap_or_default();
            }
            if !template {
                node.text = element.value().to_string();
            }
        }
        tree.insert_node(node, parent)
    }

    /// Insert all element children of `element` below `parent`.
    ///
    /// Repeats without `jr:template` are materialized twice: an index
    /// template first, then the numbered instance.
    fn add_children(
        &mut self,
        tree: &mut FieldTree,
        element: &XmlElement,
        parent: Index,
        path: &str,
        template: bool,
    ) {
        let template_marker = QualifiedName::namespaced(NAMESPACE_JAVAROSA, "template");
        let mut templated: HashSet<&str> = HashSet::new();
        let mut occurrences: HashMap<&str, usize> = HashMap::new();

        for child in &element.children {
            let child_path = format!("{}/{}", path, child.name);
            if !self.body.repeats.contains(&child_path) {
                let idx =
                    self.add_node(tree, child, parent, &child_path, Multiplicity::Instance(0), template);
                self.add_children(tree, child, idx, &child_path, template);
                continue;
            }

            let declares_template = child
                .attributes
                .iter()
                .any(|a| a.name == template_marker);
            if declares_template || template {
                if templated.insert(child.name.as_str()) {
                    let idx =
                        self.add_node(tree, child, parent, &child_path, Multiplicity::Template, true);
                    self.add_children(tree, child, idx, &child_path, true);
                }
                continue;
            }

            if templated.insert(child.name.as_str()) {
                let idx =
                    self.add_node(tree, child, parent, &child_path, Multiplicity::Template, true);
                self.add_children(tree, child, idx, &child_path, true);
            }
            let count = occurrences.entry(child.name.as_str()).or_insert(0);
            let multiplicity = Multiplicity::Instance(*count);
            *count += 1;
            let idx = self.add_node(tree, child, parent, &child_path, multiplicity, false);
            self.add_children(tree, child, idx, &child_path, false);
        }
    }

    fn bind_type(&self, path: &str) -> Option<DataType> {
        let type_attr = QualifiedName::local("type");
        self.bindings
            .iter()
            .filter(|b| b.nodeset.eq_ignore_ascii_case(path))
            .find_map(|b| b.attribute(&type_attr))
            .and_then(|t| self.registry.bind_type(t))
    }
}

fn collect_bindings(model: &XmlElement) -> Vec<Binding> {
    model
        .descendants_named("bind")
        .into_iter()
        .filter_map(|bind| {
            let Some(nodeset) = bind.attr("nodeset") else {
                warn!("bind without nodeset ignored");
                return None;
            };
            Some(Binding {
                nodeset: normalize_path(nodeset),
                attributes: bind
                    .attributes
                    .iter()
                    .map(|a| (a.name.clone(), a.value.clone()))
                    .collect(),
            })
        })
        .collect()
}

fn submission_profile(submission: &XmlElement, bindings: &[Binding]) -> SubmissionProfile {
    let id_attr = QualifiedName::local("id");
    let reference = submission
        .attr("ref")
        .map(normalize_path)
        .or_else(|| {
            let bind_id = submission.attr("bind")?;
            bindings
                .iter()
                .find(|b| b.attribute(&id_attr) == Some(bind_id))
                .map(|b| b.nodeset.clone())
        });
    SubmissionProfile {
        reference,
        action: submission.attr("action").map(str::to_string),
        method: submission.attr("method").map(str::to_string),
        attributes: submission
            .attributes
            .iter()
            .map(|a| (a.name.clone(), a.value.clone()))
            .collect(),
    }
}

/// Resolve a body `ref`/`nodeset` against the enclosing group or repeat.
fn resolve_ref(reference: &str, context: &str) -> String {
    let reference = reference.trim();
    if reference.starts_with('/') {
        return normalize_path(reference);
    }
    let relative = reference.trim_start_matches("./");
    if relative.is_empty() || relative == "." {
        return context.to_string();
    }
    normalize_path(&format!("{}/{}", context, relative))
}

fn normalize_path(path: &str) -> String {
    let trimmed = path.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}
