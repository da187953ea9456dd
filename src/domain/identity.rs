//! Form identity extraction and definition-level validation.

use std::sync::OnceLock;

use generational_arena::Index;
use regex::Regex;
use tracing::{debug, instrument};

use crate::domain::arena::FieldTree;
use crate::domain::builder::FieldTreeBuilder;
use crate::domain::entities::{FormIdentity, QualifiedName};
use crate::domain::error::{DomainResult, IncompleteSubmissionData, Reason};
use crate::domain::model::Model;

pub const FORM_ID_ATTRIBUTE_NAME: &str = "id";
pub const VERSION_ATTRIBUTE_NAME: &str = "version";
pub const FORWARD_SLASH: &str = "/";
pub const FORWARD_SLASH_SUBSTITUTION: &str = "&#47;";
pub const BASE64_RSA_PUBLIC_KEY: &str = "base64RsaPublicKey";
pub const NAMESPACE_ODK: &str = "http://www.opendatakit.org/xforms";

/// Storage layout used in place of the declared instance for encrypted forms.
const ENCRYPTED_FORM_DEFINITION: &str = r#"<?xml version="1.0"?>
<h:html xmlns="http://www.w3.org/2002/xforms" xmlns:h="http://www.w3.org/1999/xhtml" xmlns:odk="http://www.opendatakit.org/xforms" xmlns:jr="http://openrosa.org/javarosa">
  <h:head>
    <h:title>Encrypted Form</h:title>
    <model>
      <instance>
        <data id="encrypted" xmlns="http://www.opendatakit.org/xforms/encrypted" xmlns:orx="http://openrosa.org/xforms">
          <base64EncryptedKey/>
          <orx:meta><orx:instanceID/></orx:meta>
          <media><file/></media>
          <encryptedXmlFile/>
          <base64EncryptedElementSignature/>
        </data>
      </instance>
      <bind nodeset="/data/base64EncryptedKey" type="string" odk:length="2048"/>
      <bind nodeset="/data/meta/instanceID" type="string"/>
      <bind nodeset="/data/media/file" type="binary"/>
      <bind nodeset="/data/encryptedXmlFile" type="binary"/>
      <bind nodeset="/data/base64EncryptedElementSignature" type="string" odk:length="2048"/>
    </model>
  </h:head>
  <h:body>
    <input ref="base64EncryptedKey"><label>Encrypted Symmetric Key</label></input>
    <input ref="meta/instanceID"><label>InstanceID</label></input>
    <repeat nodeset="/data/media">
      <upload ref="file" mediatype="image/*"><label>media file</label></upload>
    </repeat>
    <upload ref="encryptedXmlFile" mediatype="image/*"><label>submission</label></upload>
    <input ref="base64EncryptedElementSignature"><label>Encrypted Element Signature</label></input>
  </h:body>
</h:html>"#;

/// Read `(formId, modelVersion)` from a model element.
///
/// The `id` attribute wins and has its slashes substituted; otherwise
/// `default_form_id` is used. Returns None when neither is available.
pub fn extract_form_identity(model: &Model<'_>, default_form_id: Option<&str>) -> Option<FormIdentity> {
    let node = model.node();
    let model_version = node
        .attribute(&QualifiedName::local(VERSION_ATTRIBUTE_NAME))
        .map(str::to_string);
    let form_id = node
        .attribute(&QualifiedName::local(FORM_ID_ATTRIBUTE_NAME))
        .map(|id| id.replace(FORWARD_SLASH, FORWARD_SLASH_SUBSTITUTION))
        .or_else(|| default_form_id.map(str::to_string))?;
    Some(FormIdentity {
        form_id,
        model_version,
    })
}

/// Outcome of checking the instance `xmlns` as a fallback form id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaCheck {
    /// Usable fallback id, slash-substituted
    pub fallback_id: Option<String>,
    pub malformed: bool,
}

/// Validate the instance schema.
///
/// Well-formed means there is a `:` and the first `/` comes after it, as in
/// `http://example.org/formId`. A malformed schema is only usable as an id
/// when `allow_legacy` is set.
pub fn check_schema(schema: Option<&str>, allow_legacy: bool) -> SchemaCheck {
    let Some(schema) = schema else {
        return SchemaCheck {
            fallback_id: None,
            malformed: false,
        };
    };
    let substituted = schema.replace(FORWARD_SLASH, FORWARD_SLASH_SUBSTITUTION);
    let well_formed = match (schema.find(':'), schema.find('/')) {
        (Some(colon), Some(slash)) => slash >= colon,
        _ => false,
    };
    if well_formed {
        SchemaCheck {
            fallback_id: Some(substituted),
            malformed: false,
        }
    } else {
        SchemaCheck {
            fallback_id: allow_legacy.then_some(substituted),
            malformed: true,
        }
    }
}

fn title_pattern() -> DomainResult<&'static Regex> {
    static PATTERN: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r#"[\\/:*?"<>|\x00-\x1f]"#))
        .as_ref()
        .map_err(|e| IncompleteSubmissionData::bad_parse(format!("compile title pattern: {}", e)))
}

/// Replace characters that cannot appear in file names with `_`.
pub fn strip_illegal_chars(title: &str) -> DomainResult<String> {
    let cleaned = title_pattern()?.replace_all(title, "_");
    Ok(cleaned.split_whitespace().collect::<Vec<_>>().join(" "))
}

/// A parsed and validated form definition.
#[derive(Debug)]
pub struct FormDefinition {
    xml: String,
    tree: FieldTree,
    root_identity: FormIdentity,
    submission_element: Option<Index>,
    encrypted_storage: Option<FieldTree>,
    base64_rsa_public_key: Option<String>,
    is_not_uploadable: bool,
    is_invalid_form_xmlns: bool,
    title: String,
}

impl FormDefinition {
    /// Parse and validate a raw definition.
    ///
    /// `fallback_title` is used when the definition declares no title.
    /// `allow_legacy` accepts a malformed instance `xmlns` as the form id.
    #[instrument(level = "debug", skip(xml), fields(len = xml.len()))]
    pub fn parse(xml: &str, fallback_title: Option<&str>, allow_legacy: bool) -> DomainResult<Self> {
        Self::parse_with(&FieldTreeBuilder::new(), xml, fallback_title, allow_legacy)
    }

    pub fn parse_with(
        builder: &FieldTreeBuilder,
        xml: &str,
        fallback_title: Option<&str>,
        allow_legacy: bool,
    ) -> DomainResult<Self> {
        if xml.trim().is_empty() {
            return Err(IncompleteSubmissionData::new(
                Reason::MissingXml,
                "no form definition supplied",
            ));
        }
        let tree = builder.build(xml)?;
        let root = Model::root(&tree).ok_or_else(|| {
            IncompleteSubmissionData::bad_parse("failed to construct a form instance")
        })?;

        let schema = check_schema(tree.schema(), allow_legacy);
        let root_identity = extract_form_identity(&root, schema.fallback_id.as_deref())
            .ok_or_else(|| missing_identity(&tree, schema.malformed))?;

        let profile = tree.submission();
        let submission_element = profile
            .and_then(|p| p.reference.as_deref())
            .and_then(|r| tree.resolve_path(r));
        let submission_identity = match submission_element.and_then(|idx| Model::new(&tree, idx)) {
            Some(element) => extract_form_identity(&element, None).ok_or_else(|| {
                IncompleteSubmissionData::new(
                    Reason::IdMissing,
                    "the non-root submission element has no id attribute; add id=\"your.domain.org:formId\" to it",
                )
            })?,
            None => root_identity.clone(),
        };

        let is_not_uploadable = profile.is_some_and(|p| {
            !p.action.as_deref().is_some_and(|a| a.starts_with("http"))
                || p.method.as_deref() != Some("form-data-post")
        });
        if is_not_uploadable {
            debug!(
                form_id = %submission_identity.form_id,
                "form is not uploadable: submission method is not form-data-post or action is not an http(s) url"
            );
        }

        if submission_identity != root_identity {
            return Err(IncompleteSubmissionData::new(
                Reason::MismatchedSubmissionElement,
                format!(
                    "submission element {} and root element {} differ in formId or version",
                    submission_identity, root_identity
                ),
            ));
        }

        let base64_rsa_public_key = profile
            .and_then(|p| p.attribute(BASE64_RSA_PUBLIC_KEY))
            .map(str::to_string);
        let encrypted_storage = match base64_rsa_public_key.as_deref() {
            Some(key) if !key.is_empty() => Some(builder.build(ENCRYPTED_FORM_DEFINITION)?),
            _ => None,
        };

        let title = tree
            .title()
            .or(fallback_title)
            .map(strip_illegal_chars)
            .transpose()?
            .ok_or_else(|| {
                IncompleteSubmissionData::new(Reason::TitleMissing, "form has no title")
            })?;

        Ok(Self {
            xml: xml.to_string(),
            tree,
            root_identity,
            submission_element,
            encrypted_storage,
            base64_rsa_public_key,
            is_not_uploadable,
            is_invalid_form_xmlns: schema.malformed,
            title,
        })
    }

    pub fn xml(&self) -> &str {
        &self.xml
    }

    pub fn tree(&self) -> &FieldTree {
        &self.tree
    }

    pub fn identity(&self) -> &FormIdentity {
        &self.root_identity
    }

    pub fn form_id(&self) -> &str {
        &self.root_identity.form_id
    }

    pub fn model_version(&self) -> Option<&str> {
        self.root_identity.model_version.as_deref()
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn base64_rsa_public_key(&self) -> Option<&str> {
        self.base64_rsa_public_key.as_deref()
    }

    pub fn is_file_encrypted(&self) -> bool {
        self.encrypted_storage.is_some()
    }

    pub fn is_uploadable(&self) -> bool {
        !self.is_not_uploadable
    }

    /// Whether the instance `xmlns` was malformed (legacy forms only).
    pub fn is_invalid_form_xmlns(&self) -> bool {
        self.is_invalid_form_xmlns
    }

    pub fn root(&self) -> Option<Model<'_>> {
        Model::root(&self.tree)
    }

    /// The subtree actually submitted: the profile's element, or the root.
    pub fn submission_element(&self) -> Option<Model<'_>> {
        match self.submission_element {
            Some(idx) => Model::new(&self.tree, idx),
            None => self.root(),
        }
    }

    /// Model that defines storage: the encrypted envelope for encrypted
    /// forms, the submission element otherwise.
    pub fn storage_root(&self) -> Option<Model<'_>> {
        match &self.encrypted_storage {
            Some(envelope) => Model::root(envelope),
            None => self.submission_element(),
        }
    }
}

fn missing_identity(tree: &FieldTree, schema_malformed: bool) -> IncompleteSubmissionData {
    if schema_malformed {
        IncompleteSubmissionData::new(
            Reason::IdMalformed,
            format!(
                "xmlns attribute of the data model is not well-formed: '{}' should look like xmlns=\"http://your.domain.org/formId\"; consider an id=\"formId\" attribute instead",
                tree.schema().unwrap_or_default()
            ),
        )
    } else {
        IncompleteSubmissionData::new(
            Reason::IdMissing,
            "the data model has no id or xmlns attribute; add id=\"your.domain.org:formId\" to the top-level instance element",
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Some("http://example.org/forms/a"), false, Some("http:&#47;&#47;example.org&#47;forms&#47;a"), false)]
    #[case(Some("urn:example"), false, None, true)]
    #[case(Some("urn:example"), true, Some("urn:example"), true)]
    #[case(Some("example/a:b"), false, None, true)]
    #[case(None, false, None, false)]
    fn given_schema_when_checking_then_classifies(
        #[case] schema: Option<&str>,
        #[case] allow_legacy: bool,
        #[case] fallback: Option<&str>,
        #[case] malformed: bool,
    ) {
        let check = check_schema(schema, allow_legacy);
        assert_eq!(check.fallback_id.as_deref(), fallback);
        assert_eq!(check.malformed, malformed);
    }

    #[test]
    fn given_illegal_title_chars_when_stripping_then_replaced() {
        assert_eq!(strip_illegal_chars("a/b: c?  d").unwrap(), "a_b_ c_ d");
        assert_eq!(strip_illegal_chars("tab\there|\"q\"").unwrap(), "tab_here__q_");
    }

    #[test]
    fn given_encrypted_envelope_when_building_then_parses() {
        let tree = FieldTreeBuilder::new().build(ENCRYPTED_FORM_DEFINITION).unwrap();
        let names = Model::root(&tree).unwrap().names();
        assert_eq!(
            names,
            vec![
                "base64EncryptedKey",
                "meta-instanceID",
                "SET-OF-media",
                "encryptedXmlFile",
                "base64EncryptedElementSignature"
            ]
        );
    }
}
