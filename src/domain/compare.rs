//! Structural comparison of two form definitions.
//!
//! Decides whether an incoming definition may replace an existing one while
//! keeping the existing storage shape.

use std::cmp::Ordering;
use std::collections::HashMap;

use generational_arena::Index;
use tracing::{debug, instrument, trace};

use crate::domain::arena::FieldTree;
use crate::domain::entities::{Binding, QualifiedName, Verdict, NAMESPACE_JAVAROSA};
use crate::domain::error::DomainResult;
use crate::domain::identity::FormDefinition;

/// Bind attributes that may change without touching storage.
fn is_changeable_bind_attribute(full_name: &str) -> bool {
    const LOCAL: [&str; 6] = [
        "relevant",
        "constraint",
        "readonly",
        "required",
        "calculate",
        "appearance",
    ];
    const JAVAROSA: [&str; 3] = ["constraintmsg", "preload", "preloadparams"];
    if LOCAL.contains(&full_name) {
        return true;
    }
    full_name
        .strip_prefix(NAMESPACE_JAVAROSA)
        .and_then(|rest| rest.strip_prefix(':'))
        .is_some_and(|local| JAVAROSA.contains(&local))
}

/// Instance attributes whose change breaks storage.
fn is_nonchangeable_instance_attribute(full_name: &str) -> bool {
    full_name == "id"
}

const NODESET_ATTR: &str = "nodeset";
const TYPE_ATTR: &str = "type";

/// How far two nodes diverge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Severity {
    #[default]
    None,
    Small,
    Big,
}

impl Severity {
    pub fn merge(self, other: Severity) -> Severity {
        self.max(other)
    }

    pub fn verdict(self) -> Verdict {
        match self {
            Severity::None => Verdict::ShareInstance,
            Severity::Small => Verdict::ShareSchema,
            Severity::Big => Verdict::Different,
        }
    }

    fn from_verdict(verdict: Verdict) -> Severity {
        match verdict {
            Verdict::ShareSchema => Severity::Small,
            Verdict::Different => Severity::Big,
            _ => Severity::None,
        }
    }
}

/// Compare `incoming` with the raw text of the stored definition.
///
/// The stored definition was accepted earlier, so it is parsed with legacy
/// identities allowed. Parse failures propagate.
#[instrument(level = "debug", skip_all, fields(form_id = incoming.form_id()))]
pub fn compare_xml(
    incoming: &FormDefinition,
    existing_xml: &str,
    existing_title: Option<&str>,
) -> DomainResult<Verdict> {
    if incoming.xml() == existing_xml {
        return Ok(Verdict::Identical);
    }
    let existing = FormDefinition::parse(existing_xml, existing_title, true)?;
    Ok(compare_parsed(incoming, &existing))
}

/// Parse both texts and compare them.
///
/// `fallback_title` stands in for a missing `h:title` on either side: an
/// update of a stored form may omit the title the stored form was saved
/// under.
pub fn compare_definitions(
    incoming_xml: &str,
    existing_xml: &str,
    fallback_title: Option<&str>,
    allow_legacy: bool,
) -> DomainResult<Verdict> {
    if incoming_xml == existing_xml {
        return Ok(Verdict::Identical);
    }
    let incoming = FormDefinition::parse(incoming_xml, fallback_title, allow_legacy)?;
    compare_xml(&incoming, existing_xml, fallback_title)
}

fn compare_parsed(incoming: &FormDefinition, existing: &FormDefinition) -> Verdict {
    let Some(incoming_version) = incoming.model_version() else {
        return Verdict::MissingVersion;
    };
    let earlier_version = is_earlier_version(incoming_version, existing.model_version());
    if earlier_version {
        debug!(
            incoming = incoming_version,
            existing = existing.model_version().unwrap_or_default(),
            "incoming version does not advance"
        );
    }

    if !same_submission_scope(incoming, existing) {
        return Verdict::Different;
    }

    let (Some(left), Some(right)) = (incoming.tree().root(), existing.tree().root()) else {
        return Verdict::Different;
    };
    let verdict = compare_nodes(incoming.tree(), left, existing.tree(), right);
    match verdict {
        Verdict::Different => verdict,
        _ if earlier_version => Verdict::EarlierVersion,
        _ => verdict,
    }
}

/// Whether `incoming` fails to advance past `existing`.
///
/// The same token is always accepted. Differing tokens must order higher:
/// all-digit tokens by numeric value, anything else (and numeric ties such
/// as `1` against `01`) lexicographically.
pub fn is_earlier_version(incoming: &str, existing: Option<&str>) -> bool {
    match existing {
        None => false,
        Some(existing) if existing == incoming => false,
        Some(existing) => version_order(incoming, existing) != Ordering::Greater,
    }
}

fn version_order(a: &str, b: &str) -> Ordering {
    let numeric = |s: &str| !s.is_empty() && s.bytes().all(|c| c.is_ascii_digit());
    if !(numeric(a) && numeric(b)) {
        return a.cmp(b);
    }
    let (sa, sb) = (a.trim_start_matches('0'), b.trim_start_matches('0'));
    sa.len()
        .cmp(&sb.len())
        .then_with(|| sa.cmp(sb))
        .then_with(|| a.cmp(b))
}

fn same_submission_scope(incoming: &FormDefinition, existing: &FormDefinition) -> bool {
    if incoming.base64_rsa_public_key() != existing.base64_rsa_public_key() {
        debug!("encryption settings differ");
        return false;
    }
    match (scoped_element(incoming), scoped_element(existing)) {
        (None, None) => true,
        (Some(a), Some(b)) => {
            let same = incoming.tree().name_chain(a) == existing.tree().name_chain(b);
            if !same {
                debug!("submission elements differ");
            }
            same
        }
        _ => {
            debug!("only one definition restricts its submission element");
            false
        }
    }
}

fn scoped_element(definition: &FormDefinition) -> Option<Index> {
    let reference = definition.tree().submission()?.reference.as_deref()?;
    definition.tree().resolve_path(reference)
}

/// Compare two nodes and everything below them.
pub fn compare_nodes(tree1: &FieldTree, idx1: Index, tree2: &FieldTree, idx2: Index) -> Verdict {
    node_severity(tree1, idx1, tree2, idx2).verdict()
}

fn node_severity(tree1: &FieldTree, idx1: Index, tree2: &FieldTree, idx2: Index) -> Severity {
    let (Some(node1), Some(node2)) = (tree1.get_node(idx1), tree2.get_node(idx2)) else {
        return Severity::Big;
    };
    let mut severity = Severity::None;
    if node1.name != node2.name {
        severity = Severity::Big;
    }

    severity = severity
        .merge(attribute_severity(&node1.attributes, &node2.attributes))
        .merge(binding_severity(tree1, idx1, tree2, idx2));

    let children1 = storage_children(tree1, idx1);
    let mut children2: HashMap<&str, Index> = HashMap::new();
    for idx in storage_children(tree2, idx2) {
        if children2.insert(tree2.name(idx), idx).is_some() {
            trace!(name = tree2.name(idx), "duplicate child name");
            severity = Severity::Big;
        }
    }

    if children1.len() != children2.len() {
        trace!(
            node = %node1.name,
            left = children1.len(),
            right = children2.len(),
            "child counts differ"
        );
        return Severity::Big;
    }
    for child1 in children1 {
        let child_severity = match children2.get(tree1.name(child1)) {
            Some(&child2) => Severity::from_verdict(compare_nodes(tree1, child1, tree2, child2)),
            None => Severity::Big,
        };
        severity = severity.merge(child_severity);
    }
    severity
}

/// Children that define storage: numbered repeat instances are dropped.
fn storage_children(tree: &FieldTree, idx: Index) -> Vec<Index> {
    tree.children(idx)
        .iter()
        .copied()
        .filter(|&c| {
            tree.get_node(c)
                .is_some_and(|n| !n.repeatable || n.multiplicity.is_template())
        })
        .collect()
}

fn attribute_severity(
    attributes1: &[(QualifiedName, String)],
    attributes2: &[(QualifiedName, String)],
) -> Severity {
    let lookup = |attributes: &[(QualifiedName, String)], name: &QualifiedName| {
        attributes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.clone())
    };
    let classify = |name: &QualifiedName| {
        if is_nonchangeable_instance_attribute(&name.full_name().to_lowercase()) {
            Severity::Big
        } else {
            Severity::Small
        }
    };

    let mut severity = Severity::None;
    for (name, value) in attributes1 {
        if lookup(attributes2, name).as_ref() != Some(value) {
            severity = severity.merge(classify(name));
        }
    }
    for (name, _) in attributes2 {
        if lookup(attributes1, name).is_none() {
            severity = severity.merge(classify(name));
        }
    }
    severity
}

fn binding_severity(tree1: &FieldTree, idx1: Index, tree2: &FieldTree, idx2: Index) -> Severity {
    let bindings1 = tree1.bindings_for(idx1);
    let bindings2 = tree2.bindings_for(idx2);
    let lookup = |bindings: &[&Binding], name: &QualifiedName| {
        bindings.iter().find_map(|b| b.attribute(name)).map(str::to_string)
    };
    let classify = |full_name: &str| {
        if is_changeable_bind_attribute(full_name) {
            Severity::Small
        } else {
            Severity::Big
        }
    };

    let mut severity = Severity::None;
    for binding in &bindings1 {
        for (name, value1) in &binding.attributes {
            let full_name = name.full_name().to_lowercase();
            if full_name == NODESET_ATTR {
                continue;
            }
            let value2 = lookup(&bindings2, name);
            if value2.as_ref() == Some(value1) {
                continue;
            }
            let string_select1_swap = full_name == TYPE_ATTR
                && value2
                    .as_deref()
                    .is_some_and(|value2| is_string_select1_swap(value1, value2));
            severity = severity.merge(if string_select1_swap {
                Severity::Small
            } else {
                classify(&full_name)
            });
        }
    }
    for binding in &bindings2 {
        for (name, _) in &binding.attributes {
            let full_name = name.full_name().to_lowercase();
            if full_name != NODESET_ATTR && lookup(&bindings1, name).is_none() {
                severity = severity.merge(classify(&full_name));
            }
        }
    }
    severity
}

fn is_string_select1_swap(value1: &str, value2: &str) -> bool {
    let (a, b) = (value1.to_lowercase(), value2.to_lowercase());
    (a == "string" && b == "select1") || (a == "select1" && b == "string")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("10", Some("2"), false)]
    #[case("2", Some("10"), true)]
    #[case("3", Some("2"), false)]
    #[case("2", Some("3"), true)]
    #[case("1", Some("1"), false)]
    #[case("01", Some("1"), true)]
    #[case("1", Some("01"), false)]
    #[case("10", Some("010"), false)]
    #[case("2024020100", Some("2024013199"), false)]
    #[case("b", Some("a"), false)]
    #[case("1.10", Some("1.9"), true)]
    #[case("1", None, false)]
    fn given_versions_when_checking_order_then_detects_regression(
        #[case] incoming: &str,
        #[case] existing: Option<&str>,
        #[case] earlier: bool,
    ) {
        assert_eq!(is_earlier_version(incoming, existing), earlier);
    }

    #[rstest]
    #[case("appearance", true)]
    #[case("relevant", true)]
    #[case("http://openrosa.org/javarosa:constraintmsg", true)]
    #[case("http://openrosa.org/javarosa:preloadparams", true)]
    #[case("jr:constraintmsg", false)]
    #[case("type", false)]
    fn given_bind_attribute_when_classifying_then_matches_changeable_set(
        #[case] name: &str,
        #[case] changeable: bool,
    ) {
        assert_eq!(is_changeable_bind_attribute(name), changeable);
    }

    #[test]
    fn given_severities_when_merging_then_highest_wins() {
        assert_eq!(Severity::None.merge(Severity::Small), Severity::Small);
        assert_eq!(Severity::Big.merge(Severity::Small), Severity::Big);
        assert_eq!(Severity::default().verdict(), Verdict::ShareInstance);
    }

    #[test]
    fn given_instance_attributes_when_id_changes_then_big() {
        let id = QualifiedName::local("id");
        let other = QualifiedName::namespaced("http://openrosa.org/xforms", "foo");
        let left = vec![(id.clone(), "a".to_string())];
        let right = vec![(id, "b".to_string())];
        assert_eq!(attribute_severity(&left, &right), Severity::Big);

        let left = vec![(other, "x".to_string())];
        assert_eq!(attribute_severity(&left, &[]), Severity::Small);
    }
}
