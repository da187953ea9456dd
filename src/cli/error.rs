//! CLI-level errors (wraps infrastructure errors)

use thiserror::Error;

use crate::application::ApplicationError;
use crate::domain::Verdict;
use crate::infrastructure::InfraError;

/// CLI errors are the top-level error type.
/// These are what get displayed to the user.
#[derive(Error, Debug)]
pub enum CliError {
    #[error("{0}")]
    Infra(#[from] InfraError),

    #[error("invalid arguments: {0}")]
    InvalidArgs(String),

    #[error("{0}")]
    Usage(String),

    #[error("update rejected: {0}")]
    UpdateRejected(Verdict),
}

impl From<ApplicationError> for CliError {
    fn from(e: ApplicationError) -> Self {
        CliError::Infra(InfraError::Application(e))
    }
}

/// Result type for CLI operations.
pub type CliResult<T> = Result<T, CliError>;

impl CliError {
    /// Get the appropriate exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::InvalidArgs(_) | CliError::Usage(_) => crate::exitcode::USAGE,
            CliError::UpdateRejected(_) => crate::exitcode::DATAERR,
            CliError::Infra(e) => match e {
                InfraError::Io { .. } => crate::exitcode::IOERR,
                InfraError::Application(app) => match app {
                    ApplicationError::Form(_) | ApplicationError::InvalidSubmission { .. } => {
                        crate::exitcode::DATAERR
                    }
                    ApplicationError::DefinitionNotFound(_) => crate::exitcode::NOINPUT,
                    ApplicationError::Config { .. } => crate::exitcode::CONFIG,
                    ApplicationError::OperationFailed { .. } => crate::exitcode::IOERR,
                },
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{IncompleteSubmissionData, Reason};
    use std::path::PathBuf;

    #[test]
    fn given_errors_when_mapping_exit_codes_then_sysexits() {
        let form: CliError =
            ApplicationError::Form(IncompleteSubmissionData::new(Reason::IdMissing, "x")).into();
        assert_eq!(form.exit_code(), crate::exitcode::DATAERR);

        let missing: CliError = ApplicationError::DefinitionNotFound(PathBuf::from("a.xml")).into();
        assert_eq!(missing.exit_code(), crate::exitcode::NOINPUT);

        assert_eq!(
            CliError::UpdateRejected(Verdict::Different).exit_code(),
            crate::exitcode::DATAERR
        );
    }
}
