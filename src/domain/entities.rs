//! Domain entities: core data structures

use std::fmt;

/// Namespace URI of the JavaRosa extensions (`jr:` prefix).
pub const NAMESPACE_JAVAROSA: &str = "http://openrosa.org/javarosa";

/// Attribute or tag name with its resolved namespace URI.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QualifiedName {
    pub namespace: Option<String>,
    pub name: String,
}

impl QualifiedName {
    pub fn local(name: impl Into<String>) -> Self {
        Self {
            namespace: None,
            name: name.into(),
        }
    }

    pub fn namespaced(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }

    /// `namespace:name`, or just `name` when unqualified (an empty namespace
    /// counts as none).
    pub fn full_name(&self) -> String {
        match self.namespace.as_deref() {
            Some(ns) if !ns.is_empty() => format!("{}:{}", ns, self.name),
            _ => self.name.clone(),
        }
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full_name())
    }
}

/// Declared data type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    /// Groups, and leaves nothing declared a type for
    Null,
    Text,
    Integer,
    Decimal,
    Date,
    DateTime,
    Time,
    Geopoint,
    Geoshape,
    Geotrace,
    ChoiceSingle,
    ChoiceList,
    Binary,
    Barcode,
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::Null => "null",
            DataType::Text => "text",
            DataType::Integer => "integer",
            DataType::Decimal => "decimal",
            DataType::Date => "date",
            DataType::DateTime => "dateTime",
            DataType::Time => "time",
            DataType::Geopoint => "geopoint",
            DataType::Geoshape => "geoshape",
            DataType::Geotrace => "geotrace",
            DataType::ChoiceSingle => "select1",
            DataType::ChoiceList => "select",
            DataType::Binary => "binary",
            DataType::Barcode => "barcode",
        };
        f.write_str(name)
    }
}

/// Which materialization of a node this is.
///
/// Repeat groups appear once as the schema placeholder (`Template`) and once
/// per occurrence found in the instance (`Instance(n)`). Everything else is
/// `Instance(0)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Multiplicity {
    Instance(usize),
    Template,
}

impl Multiplicity {
    pub fn is_template(&self) -> bool {
        matches!(self, Multiplicity::Template)
    }
}

/// One raw `<bind>` declaration from the model block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    /// Value of the `nodeset` selector
    pub nodeset: String,
    /// All attributes of the declaration, `nodeset` included
    pub attributes: Vec<(QualifiedName, String)>,
}

impl Binding {
    pub fn attribute(&self, name: &QualifiedName) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

/// The `<submission>` element of the model block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmissionProfile {
    /// Absolute path of the submitted subtree, if restricted
    pub reference: Option<String>,
    pub action: Option<String>,
    pub method: Option<String>,
    pub attributes: Vec<(QualifiedName, String)>,
}

impl SubmissionProfile {
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(n, _)| n.name == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Identity of a form model: its id and optional model version.
///
/// Equality is exact on both fields; a missing version never equals a
/// present one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FormIdentity {
    pub form_id: String,
    pub model_version: Option<String>,
}

impl fmt::Display for FormIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.model_version {
            Some(version) => write!(f, "{} (version {})", self.form_id, version),
            None => write!(f, "{} (no version)", self.form_id),
        }
    }
}

/// Outcome of comparing an incoming form definition with the stored one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verdict {
    /// Raw texts are byte-identical
    Identical,
    /// Instances and bindings identical, only the body differs
    ShareInstance,
    /// Instances or bindings differ but the storage schema is unchanged
    ShareSchema,
    /// Differences affect storage structure or encryption
    Different,
    /// Incoming definition carries no version
    MissingVersion,
    /// Incoming version does not advance past the stored one
    EarlierVersion,
}

impl Verdict {
    /// Whether an update with this verdict may reuse the existing storage.
    pub fn accepts_update(&self) -> bool {
        matches!(
            self,
            Verdict::Identical | Verdict::ShareInstance | Verdict::ShareSchema
        )
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Verdict::Identical => "IDENTICAL",
            Verdict::ShareInstance => "SHARE_INSTANCE",
            Verdict::ShareSchema => "SHARE_SCHEMA",
            Verdict::Different => "DIFFERENT",
            Verdict::MissingVersion => "MISSING_VERSION",
            Verdict::EarlierVersion => "EARLIER_VERSION",
        };
        f.write_str(name)
    }
}
