//! Minimal namespace-aware XML element tree.
//!
//! Raw form definitions and submission documents are both read into this
//! shape. Namespace prefixes are resolved to their URIs so that comparisons
//! never depend on which prefix an author picked.

use std::borrow::Cow;

use quick_xml::events::{BytesStart, Event};
use quick_xml::name::{Namespace, ResolveResult};
use quick_xml::NsReader;
use tracing::instrument;

use crate::domain::entities::QualifiedName;
use crate::domain::error::{DomainResult, IncompleteSubmissionData};

/// One attribute of an element, with its namespace resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlAttribute {
    pub name: QualifiedName,
    pub value: String,
}

/// An element with resolved namespace, attributes, element children and text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XmlElement {
    /// Local tag name
    pub name: String,
    /// Namespace URI of the tag, if bound
    pub namespace: Option<String>,
    /// Attributes in document order, namespace declarations excluded
    pub attributes: Vec<XmlAttribute>,
    /// Element children in document order
    pub children: Vec<XmlElement>,
    /// Concatenated text content (whitespace around text runs trimmed)
    pub text: String,
}

impl XmlElement {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Parse a document and return its root element.
    #[instrument(level = "trace", skip(xml))]
    pub fn parse(xml: &str) -> DomainResult<XmlElement> {
        let mut reader = NsReader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut stack: Vec<XmlElement> = Vec::new();
        let mut root: Option<XmlElement> = None;

        loop {
            // the resolved event keeps `reader` borrowed, so read the position first
            let position = reader.buffer_position();
            let (resolved, event) = reader
                .read_resolved_event()
                .map_err(|e| malformed_at(position, e))?;
            let namespace = namespace_of(&resolved);
            match event {
                Event::Start(start) => {
                    let element = open_element(&reader, &start, namespace)?;
                    stack.push(element);
                }
                Event::Empty(start) => {
                    let element = open_element(&reader, &start, namespace)?;
                    attach(&mut stack, &mut root, element)?;
                }
                Event::End(_) => {
                    let element = stack.pop().ok_or_else(|| {
                        IncompleteSubmissionData::bad_parse("unbalanced closing tag")
                    })?;
                    attach(&mut stack, &mut root, element)?;
                }
                Event::Text(text) => {
                    let text = text.unescape().map_err(|e| xml_error(&reader, e))?;
                    append_text(&mut stack, &text);
                }
                Event::CData(data) => {
                    let bytes = data.into_inner();
                    append_text(&mut stack, &String::from_utf8_lossy(&bytes));
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if !stack.is_empty() {
            return Err(IncompleteSubmissionData::bad_parse(format!(
                "unclosed element <{}>",
                stack.last().map(|e| e.name.as_str()).unwrap_or_default()
            )));
        }
        root.ok_or_else(|| IncompleteSubmissionData::bad_parse("document has no root element"))
    }

    /// Trimmed text value.
    pub fn value(&self) -> &str {
        self.text.trim()
    }

    /// First child element with the given local name.
    pub fn child(&self, name: &str) -> Option<&XmlElement> {
        self.children.iter().find(|c| c.name == name)
    }

    /// All child elements with the given local name, in document order.
    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlElement> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// First element with the given local name in depth-first pre-order,
    /// excluding `self`.
    pub fn find_descendant(&self, name: &str) -> Option<&XmlElement> {
        for child in &self.children {
            if child.name == name {
                return Some(child);
            }
            if let Some(found) = child.find_descendant(name) {
                return Some(found);
            }
        }
        None
    }

    /// All descendants with the given local name in depth-first pre-order.
    pub fn descendants_named<'a>(&'a self, name: &str) -> Vec<&'a XmlElement> {
        let mut found = Vec::new();
        self.collect_descendants(name, &mut found);
        found
    }

    fn collect_descendants<'a>(&'a self, name: &str, found: &mut Vec<&'a XmlElement>) {
        for child in &self.children {
            if child.name == name {
                found.push(child);
            }
            child.collect_descendants(name, found);
        }
    }

    /// Attribute value by namespace URI and local name.
    pub fn attribute(&self, namespace: Option<&str>, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.name.name == name && a.name.namespace.as_deref() == namespace)
            .map(|a| a.value.as_str())
    }

    /// Attribute value of an unqualified attribute.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attribute(None, name)
    }
}

fn namespace_of(resolved: &ResolveResult<'_>) -> Option<String> {
    match resolved {
        ResolveResult::Bound(Namespace(uri)) => Some(String::from_utf8_lossy(uri).into_owned()),
        ResolveResult::Unknown(prefix) => Some(String::from_utf8_lossy(prefix).into_owned()),
        ResolveResult::Unbound => None,
    }
}

fn open_element(
    reader: &NsReader<&[u8]>,
    start: &BytesStart<'_>,
    namespace: Option<String>,
) -> DomainResult<XmlElement> {
    let name = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
    let mut attributes = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(|e| xml_error(reader, e))?;
        if attr.key.as_namespace_binding().is_some() {
            continue;
        }
        let (resolved, local) = reader.resolve_attribute(attr.key);
        let value: Cow<'_, str> = attr.unescape_value().map_err(|e| xml_error(reader, e))?;
        attributes.push(XmlAttribute {
            name: QualifiedName {
                namespace: namespace_of(&resolved),
                name: String::from_utf8_lossy(local.as_ref()).into_owned(),
            },
            value: value.into_owned(),
        });
    }
    Ok(XmlElement {
        name,
        namespace,
        attributes,
        children: Vec::new(),
        text: String::new(),
    })
}

fn attach(
    stack: &mut [XmlElement],
    root: &mut Option<XmlElement>,
    element: XmlElement,
) -> DomainResult<()> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None if root.is_none() => *root = Some(element),
        None => {
            return Err(IncompleteSubmissionData::bad_parse(format!(
                "second root element <{}>",
                element.name
            )))
        }
    }
    Ok(())
}

fn append_text(stack: &mut [XmlElement], text: &str) {
    if let Some(current) = stack.last_mut() {
        current.text.push_str(text);
    }
}

fn xml_error(reader: &NsReader<&[u8]>, e: impl std::fmt::Display) -> IncompleteSubmissionData {
    malformed_at(reader.buffer_position(), e)
}

fn malformed_at(position: impl std::fmt::Display, e: impl std::fmt::Display) -> IncompleteSubmissionData {
    IncompleteSubmissionData::bad_parse(format!("malformed XML at byte {}: {}", position, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn given_prefixed_attributes_when_parsing_then_resolves_namespace_uris() {
        let xml = r#"<h:html xmlns:h="http://www.w3.org/1999/xhtml" xmlns:jr="http://openrosa.org/javarosa">
            <bind nodeset="/data/q" jr:constraintMsg="too big"/>
        </h:html>"#;

        let root = XmlElement::parse(xml).unwrap();

        assert_eq!(root.name, "html");
        assert_eq!(root.namespace.as_deref(), Some("http://www.w3.org/1999/xhtml"));
        let bind = root.child("bind").unwrap();
        assert_eq!(bind.attr("nodeset"), Some("/data/q"));
        assert_eq!(
            bind.attribute(Some("http://openrosa.org/javarosa"), "constraintMsg"),
            Some("too big")
        );
        assert_eq!(bind.attributes.len(), 2);
    }

    #[test]
    fn given_text_with_entities_when_parsing_then_unescapes_and_trims() {
        let root = XmlElement::parse("<a>\n  <b>  x &amp; y  </b>\n</a>").unwrap();
        assert_eq!(root.child("b").unwrap().value(), "x & y");
    }

    #[test]
    fn given_unbalanced_document_when_parsing_then_bad_parse() {
        let err = XmlElement::parse("<a><b></a>").unwrap_err();
        assert_eq!(err.reason(), crate::domain::error::Reason::BadParse);
    }

    #[test]
    fn given_mismatched_closing_tag_when_parsing_then_reports_position() {
        let err = XmlElement::parse("<a>\n  <b>x</c>\n</a>").unwrap_err();
        assert_eq!(err.reason(), crate::domain::error::Reason::BadParse);
        assert!(err.message.starts_with("malformed XML at byte"), "{}", err.message);
    }

    #[test]
    fn given_nested_elements_when_finding_descendants_then_preorder() {
        let root = XmlElement::parse("<a><x><b>1</b></x><b>2</b></a>").unwrap();
        let values: Vec<_> = root.descendants_named("b").iter().map(|e| e.value()).collect();
        assert_eq!(values, vec!["1", "2"]);
        assert_eq!(root.find_descendant("b").unwrap().value(), "1");
    }
}
