//! Domain-level errors (no external dependencies)

use std::fmt;

use thiserror::Error;

/// Why a form definition was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Reason {
    MissingXml,
    BadParse,
    IdMalformed,
    IdMissing,
    MismatchedSubmissionElement,
    TitleMissing,
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = match self {
            Reason::MissingXml => "MISSING_XML",
            Reason::BadParse => "BAD_PARSE",
            Reason::IdMalformed => "ID_MALFORMED",
            Reason::IdMissing => "ID_MISSING",
            Reason::MismatchedSubmissionElement => "MISMATCHED_SUBMISSION_ELEMENT",
            Reason::TitleMissing => "TITLE_MISSING",
        };
        f.write_str(code)
    }
}

/// The single failure kind of form definition handling.
///
/// None of these are retryable: the definition itself is invalid and has to be
/// surfaced to whoever authored it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("incomplete submission data [{reason}]: {message}")]
pub struct IncompleteSubmissionData {
    pub reason: Reason,
    pub message: String,
}

impl IncompleteSubmissionData {
    pub fn new(reason: Reason, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
        }
    }

    pub fn reason(&self) -> Reason {
        self.reason
    }

    pub(crate) fn bad_parse(message: impl Into<String>) -> Self {
        Self::new(Reason::BadParse, message)
    }
}

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, IncompleteSubmissionData>;
