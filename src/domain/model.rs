//! Schema name resolution over a field tree.
//!
//! A [`Model`] is a cheap view of one node. It computes the canonical export
//! column names of that node and collapses the double materialization of
//! repeat groups so every field contributes exactly one set of names.

use std::collections::HashSet;
use std::fmt;

use generational_arena::Index;
use tracing::instrument;

use crate::domain::arena::{FieldNode, FieldTree};
use crate::domain::entities::{DataType, Multiplicity};

/// Suffixes of the four columns a geopoint fans out into.
pub const GEOPOINT_COMPONENTS: [&str; 4] = ["Latitude", "Longitude", "Altitude", "Accuracy"];

/// Prefix of the single column standing in for a repeat group's table.
pub const REPEAT_PREFIX: &str = "SET-OF-";

/// View of one level of a form's model: the root or any of its fields.
#[derive(Clone, Copy)]
pub struct Model<'a> {
    tree: &'a FieldTree,
    idx: Index,
    node: &'a FieldNode,
}

impl fmt::Debug for Model<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("fqn", &self.fqn())
            .field("data_type", &self.node.data_type)
            .field("multiplicity", &self.node.multiplicity)
            .finish()
    }
}

impl<'a> Model<'a> {
    pub fn new(tree: &'a FieldTree, idx: Index) -> Option<Self> {
        let node = tree.get_node(idx)?;
        Some(Self { tree, idx, node })
    }

    /// The declared instance root of `tree`.
    pub fn root(tree: &'a FieldTree) -> Option<Self> {
        tree.root().and_then(|idx| Self::new(tree, idx))
    }

    pub fn index(&self) -> Index {
        self.idx
    }

    pub fn tree(&self) -> &'a FieldTree {
        self.tree
    }

    pub fn node(&self) -> &'a FieldNode {
        self.node
    }

    /// Tag name of the element this model represents.
    pub fn name(&self) -> &'a str {
        &self.node.name
    }

    pub fn data_type(&self) -> DataType {
        self.node.data_type
    }

    pub fn is_repeatable(&self) -> bool {
        self.node.repeatable
    }

    pub fn multiplicity(&self) -> Multiplicity {
        self.node.multiplicity
    }

    /// Declared choice values, empty when none were declared.
    pub fn choices(&self) -> &'a [String] {
        &self.node.choices
    }

    /// Number of raw children, duplicates included.
    pub fn size(&self) -> usize {
        self.node.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Fully qualified name: ancestor names joined by `-`, the synthetic
    /// wrapper and the instance root excluded.
    pub fn fqn(&self) -> String {
        self.fqn_shifted(0)
    }

    /// FQN with the first `shift` segments dropped.
    pub fn fqn_shifted(&self, shift: usize) -> String {
        let mut names = self.tree.name_chain(self.idx);
        // the instance root never appears in column names
        if !names.is_empty() {
            names.remove(0);
        }
        names.into_iter().skip(shift).collect::<Vec<_>>().join("-")
    }

    /// Export column names of this model.
    pub fn names(&self) -> Vec<String> {
        self.names_shifted(0)
    }

    /// Export column names with `shift` leading FQN segments dropped.
    #[instrument(level = "trace", skip(self), fields(name = self.name()))]
    pub fn names_shifted(&self, shift: usize) -> Vec<String> {
        let fqn = self.fqn_shifted(shift);
        match self.data_type() {
            DataType::Geopoint => GEOPOINT_COMPONENTS
                .iter()
                .map(|component| format!("{}-{}", fqn, component))
                .collect(),
            DataType::ChoiceList => std::iter::once(fqn.clone())
                .chain(self.choices().iter().map(|choice| format!("{}/{}", fqn, choice)))
                .collect(),
            DataType::Null if self.is_repeatable() => vec![format!("{}{}", REPEAT_PREFIX, fqn)],
            DataType::Null if !self.is_empty() => {
                self.flat_map(|child| child.names_shifted(shift))
            }
            _ => vec![fqn],
        }
    }

    /// Children with duplicates removed by FQN; the first occurrence wins.
    ///
    /// Repeat groups are materialized as template then numbered instance, so
    /// this keeps only the template.
    pub fn children(&self) -> Vec<Model<'a>> {
        let mut seen = HashSet::new();
        self.node
            .children
            .iter()
            .filter_map(|&idx| Model::new(self.tree, idx))
            .filter(|child| seen.insert(child.fqn()))
            .collect()
    }

    /// Map every de-duplicated child and concatenate the results.
    pub fn flat_map<T, F>(&self, mut mapper: F) -> Vec<T>
    where
        F: FnMut(Model<'a>) -> Vec<T>,
    {
        self.children().into_iter().flat_map(|c| mapper(c)).collect()
    }

    /// Every repeat group below this model, depth-first pre-order.
    pub fn repeatable_fields(&self) -> Vec<Model<'a>> {
        self.flatten()
            .into_iter()
            .filter(|field| field.data_type() == DataType::Null && field.is_repeatable())
            .collect()
    }

    fn flatten(&self) -> Vec<Model<'a>> {
        let mut out = Vec::new();
        for child in self.children() {
            out.push(child);
            if !child.is_empty() {
                out.extend(child.flatten());
            }
        }
        out
    }

    pub fn parent(&self) -> Option<Model<'a>> {
        self.node.parent.and_then(|p| Model::new(self.tree, p))
    }

    /// Number of ancestors, not counting the synthetic wrapper.
    pub fn count_ancestors(&self) -> usize {
        let mut count: usize = 0;
        let mut current = self.node.parent;
        while let Some(p) = current {
            count += 1;
            current = self.tree.parent(p);
        }
        count.saturating_sub(1)
    }

    /// Whether this is the top-most element of the form's model.
    pub fn is_root(&self) -> bool {
        self.count_ancestors() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::arena::FieldNode;

    fn leaf(name: &str, data_type: DataType) -> FieldNode {
        let mut node = FieldNode::new(name);
        node.data_type = data_type;
        node
    }

    #[test]
    fn given_geopoint_when_resolving_names_then_four_components_in_order() {
        let mut tree = FieldTree::new();
        let root = tree.insert_node(FieldNode::new("data"), tree.wrapper());
        let grp = tree.insert_node(FieldNode::new("grp"), root);
        let loc = tree.insert_node(leaf("loc", DataType::Geopoint), grp);

        let names = Model::new(&tree, loc).unwrap().names();

        assert_eq!(
            names,
            vec![
                "grp-loc-Latitude",
                "grp-loc-Longitude",
                "grp-loc-Altitude",
                "grp-loc-Accuracy"
            ]
        );
    }

    #[test]
    fn given_choice_list_without_choices_when_resolving_names_then_only_base() {
        let mut tree = FieldTree::new();
        let root = tree.insert_node(FieldNode::new("data"), tree.wrapper());
        let colors = tree.insert_node(leaf("colors", DataType::ChoiceList), root);

        assert_eq!(Model::new(&tree, colors).unwrap().names(), vec!["colors"]);
    }

    #[test]
    fn given_shift_when_computing_fqn_then_drops_leading_segments() {
        let mut tree = FieldTree::new();
        let root = tree.insert_node(FieldNode::new("data"), tree.wrapper());
        let a = tree.insert_node(FieldNode::new("a"), root);
        let b = tree.insert_node(FieldNode::new("b"), a);
        let c = tree.insert_node(leaf("c", DataType::Text), b);

        let model = Model::new(&tree, c).unwrap();
        assert_eq!(model.fqn(), "a-b-c");
        assert_eq!(model.fqn_shifted(2), "c");
        assert_eq!(model.fqn_shifted(9), "");
        assert_eq!(model.count_ancestors(), 3);
    }

    #[test]
    fn given_instance_root_when_counting_ancestors_then_is_root() {
        let mut tree = FieldTree::new();
        let root = tree.insert_node(FieldNode::new("data"), tree.wrapper());
        let model = Model::new(&tree, root).unwrap();
        assert!(model.is_root());
        assert_eq!(model.fqn(), "");
    }

    #[test]
    fn given_empty_group_when_resolving_names_then_single_fqn() {
        let mut tree = FieldTree::new();
        let root = tree.insert_node(FieldNode::new("data"), tree.wrapper());
        let note = tree.insert_node(FieldNode::new("note"), root);
        assert_eq!(Model::new(&tree, note).unwrap().names(), vec!["note"]);
    }
}
