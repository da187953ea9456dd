use generational_arena::{Arena, Index};
use std::fmt;
use termtree::Tree;
use tracing::instrument;

use crate::domain::entities::{Binding, DataType, Multiplicity, QualifiedName, SubmissionProfile};

/// One field (or group) of a form's declared instance.
#[derive(Debug, Clone)]
pub struct FieldNode {
    /// Local tag name, empty for the synthetic wrapper
    pub name: String,
    pub data_type: DataType,
    pub repeatable: bool,
    pub multiplicity: Multiplicity,
    /// Index of the parent node in the arena, None only for the wrapper
    pub parent: Option<Index>,
    /// Indices of child nodes in the arena, in document order
    pub children: Vec<Index>,
    /// Declared option values, only for choice fields
    pub choices: Vec<String>,
    /// Instance attributes of the element itself
    pub attributes: Vec<(QualifiedName, String)>,
    /// Default value declared in the instance
    pub text: String,
}

impl FieldNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: DataType::Null,
            repeatable: false,
            multiplicity: Multiplicity::Instance(0),
            parent: None,
            children: Vec::new(),
            choices: Vec::new(),
            attributes: Vec::new(),
            text: String::new(),
        }
    }

    pub fn attribute(&self, name: &QualifiedName) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

impl fmt::Display for FieldNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.name, self.data_type)?;
        if self.repeatable {
            match self.multiplicity {
                Multiplicity::Template => write!(f, " repeat:template")?,
                Multiplicity::Instance(n) => write!(f, " repeat:{}", n)?,
            }
        }
        Ok(())
    }
}

/// Arena-based field tree of one parsed form definition.
///
/// The arena root is a synthetic, nameless wrapper; the declared instance
/// root is its only child. Parents are plain arena indices, so the tree has a
/// single owner and no reference cycles. Trees are never mutated once the
/// builder hands them out.
#[derive(Debug)]
pub struct FieldTree {
    arena: Arena<FieldNode>,
    wrapper: Index,
    root: Option<Index>,
    bindings: Vec<Binding>,
    submission: Option<SubmissionProfile>,
    title: Option<String>,
    schema: Option<String>,
}

impl Default for FieldTree {
    fn default() -> Self {
        Self::new()
    }
}

impl FieldTree {
    pub fn new() -> Self {
        let mut arena = Arena::new();
        let wrapper = arena.insert(FieldNode::new(""));
        Self {
            arena,
            wrapper,
            root: None,
            bindings: Vec::new(),
            submission: None,
            title: None,
            schema: None,
        }
    }

    /// Insert a node below `parent`; children keep insertion order.
    #[instrument(level = "trace", skip(self, node), fields(name = %node.name))]
    pub fn insert_node(&mut self, mut node: FieldNode, parent: Index) -> Index {
        node.parent = Some(parent);
        let node_idx = self.arena.insert(node);
        if let Some(parent_node) = self.arena.get_mut(parent) {
            parent_node.children.push(node_idx);
        }
        if parent == self.wrapper && self.root.is_none() {
            self.root = Some(node_idx);
        }
        node_idx
    }

    pub fn get_node(&self, idx: Index) -> Option<&FieldNode> {
        self.arena.get(idx)
    }

    /// The synthetic node above the declared instance root.
    pub fn wrapper(&self) -> Index {
        self.wrapper
    }

    /// The declared instance root, None for an empty tree.
    pub fn root(&self) -> Option<Index> {
        self.root
    }

    pub fn bindings(&self) -> &[Binding] {
        &self.bindings
    }

    pub(crate) fn set_bindings(&mut self, bindings: Vec<Binding>) {
        self.bindings = bindings;
    }

    pub fn submission(&self) -> Option<&SubmissionProfile> {
        self.submission.as_ref()
    }

    pub(crate) fn set_submission(&mut self, submission: Option<SubmissionProfile>) {
        self.submission = submission;
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub(crate) fn set_title(&mut self, title: Option<String>) {
        self.title = title;
    }

    /// Namespace URI (`xmlns`) declared on the instance root.
    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    pub(crate) fn set_schema(&mut self, schema: Option<String>) {
        self.schema = schema;
    }

    pub fn name(&self, idx: Index) -> &str {
        self.get_node(idx).map(|n| n.name.as_str()).unwrap_or_default()
    }

    pub fn parent(&self, idx: Index) -> Option<Index> {
        self.get_node(idx).and_then(|n| n.parent)
    }

    pub fn children(&self, idx: Index) -> &[Index] {
        self.get_node(idx)
            .map(|n| n.children.as_slice())
            .unwrap_or_default()
    }

    /// Names from the instance root down to `idx`, wrapper excluded.
    pub fn name_chain(&self, idx: Index) -> Vec<&str> {
        let mut names = Vec::new();
        let mut current = Some(idx);
        while let Some(c) = current {
            if c == self.wrapper {
                break;
            }
            names.push(self.name(c));
            current = self.parent(c);
        }
        names.reverse();
        names
    }

    /// `/root/group/field` style path used by bind `nodeset` selectors.
    pub fn absolute_path(&self, idx: Index) -> String {
        format!("/{}", self.name_chain(idx).join("/"))
    }

    /// All bind declarations whose `nodeset` selects `idx`, compared
    /// case-insensitively.
    pub fn bindings_for(&self, idx: Index) -> Vec<&Binding> {
        let path = self.absolute_path(idx);
        self.bindings
            .iter()
            .filter(|b| b.nodeset.eq_ignore_ascii_case(&path))
            .collect()
    }

    /// Resolve an absolute `/a/b/c` path, preferring repeat templates over
    /// numbered instances at every step.
    #[instrument(level = "trace", skip(self))]
    pub fn resolve_path(&self, path: &str) -> Option<Index> {
        let mut segments = path.trim().trim_start_matches('/').split('/');
        let root = self.root?;
        if segments.next()? != self.name(root) {
            return None;
        }
        let mut current = root;
        for segment in segments.filter(|s| !s.is_empty()) {
            let candidates: Vec<Index> = self
                .children(current)
                .iter()
                .copied()
                .filter(|&c| self.name(c) == segment)
                .collect();
            current = candidates
                .iter()
                .copied()
                .find(|&c| self.get_node(c).is_some_and(|n| n.multiplicity.is_template()))
                .or_else(|| candidates.first().copied())?;
        }
        Some(current)
    }

    pub fn iter(&self) -> TreeIterator<'_> {
        TreeIterator::new(self)
    }

    /// Number of levels below the wrapper.
    pub fn depth(&self) -> usize {
        match self.root {
            Some(root) => self.calculate_depth(root),
            None => 0,
        }
    }

    /// Render the tree below the instance root, every materialization shown.
    pub fn to_tree_string(&self) -> Tree<String> {
        let Some(root_idx) = self.root else {
            return Tree::new("Empty tree".to_string());
        };

        fn build_tree(tree: &FieldTree, node_idx: Index, parent_tree: &mut Tree<String>) {
            for &child_idx in tree.children(node_idx) {
                if let Some(child) = tree.get_node(child_idx) {
                    let mut child_tree = Tree::new(child.to_string());
                    build_tree(tree, child_idx, &mut child_tree);
                    parent_tree.push(child_tree);
                }
            }
        }

        let mut rendered = Tree::new(self.name(root_idx).to_string());
        build_tree(self, root_idx, &mut rendered);
        rendered
    }

    fn calculate_depth(&self, node_idx: Index) -> usize {
        1 + self
            .children(node_idx)
            .iter()
            .map(|&child| self.calculate_depth(child))
            .max()
            .unwrap_or(0)
    }
}

/// Depth-first pre-order walk starting at the instance root.
pub struct TreeIterator<'a> {
    tree: &'a FieldTree,
    stack: Vec<Index>,
}

impl<'a> TreeIterator<'a> {
    fn new(tree: &'a FieldTree) -> Self {
        let mut stack = Vec::new();
        if let Some(root) = tree.root() {
            stack.push(root);
        }
        Self { tree, stack }
    }
}

impl<'a> Iterator for TreeIterator<'a> {
    type Item = (Index, &'a FieldNode);

    fn next(&mut self) -> Option<Self::Item> {
        let current_idx = self.stack.pop()?;
        let node = self.tree.get_node(current_idx)?;
        // Push children in reverse order for left-to-right traversal
        for &child in node.children.iter().rev() {
            self.stack.push(child);
        }
        Some((current_idx, node))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> (FieldTree, Index, Index) {
        let mut tree = FieldTree::new();
        let wrapper = tree.wrapper();
        let root = tree.insert_node(FieldNode::new("data"), wrapper);
        let group = tree.insert_node(FieldNode::new("grp"), root);
        let leaf = tree.insert_node(FieldNode::new("q"), group);
        (tree, root, leaf)
    }

    #[test]
    fn given_first_child_of_wrapper_when_inserting_then_becomes_root() {
        let (tree, root, _) = sample();
        assert_eq!(tree.root(), Some(root));
        assert_eq!(tree.parent(root), Some(tree.wrapper()));
    }

    #[test]
    fn given_nested_leaf_when_building_path_then_wrapper_is_excluded() {
        let (tree, _, leaf) = sample();
        assert_eq!(tree.name_chain(leaf), vec!["data", "grp", "q"]);
        assert_eq!(tree.absolute_path(leaf), "/data/grp/q");
        assert_eq!(tree.resolve_path("/data/grp/q"), Some(leaf));
        assert_eq!(tree.resolve_path("/data/missing"), None);
    }

    #[test]
    fn given_tree_when_iterating_then_preorder_and_depth() {
        let (tree, _, _) = sample();
        let names: Vec<_> = tree.iter().map(|(_, n)| n.name.as_str()).collect();
        assert_eq!(names, vec!["data", "grp", "q"]);
        assert_eq!(tree.depth(), 3);
        let rendered = tree.to_tree_string().to_string();
        assert!(rendered.starts_with("data"));
        assert!(rendered.contains("q [null]"));
    }
}
