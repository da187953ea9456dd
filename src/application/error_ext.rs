//! Error conversion helpers
//!
//! Extension traits attaching path context to I/O and parse failures.

use std::io;
use std::path::Path;

use crate::application::{ApplicationError, ApplicationResult};
use crate::domain::DomainResult;

/// Extension trait for converting `io::Result` to `ApplicationResult` with context.
pub trait IoResultExt<T> {
    /// Add path context to an I/O error.
    ///
    /// # Example
    /// ```ignore
    /// fs.copy(&src, &dst)
    ///     .with_path_context("copy media file", &src)?;
    /// ```
    fn with_path_context(self, action: &str, path: &Path) -> ApplicationResult<T>;
}

impl<T> IoResultExt<T> for io::Result<T> {
    fn with_path_context(self, action: &str, path: &Path) -> ApplicationResult<T> {
        self.map_err(|e| ApplicationError::OperationFailed {
            context: format!("{}: {}", action, path.display()),
            source: Box::new(e),
        })
    }
}

/// Submission documents that fail to parse are reported with their path
/// instead of as invalid form definitions.
pub trait SubmissionResultExt<T> {
    fn with_submission_context(self, path: &Path) -> ApplicationResult<T>;
}

impl<T> SubmissionResultExt<T> for DomainResult<T> {
    fn with_submission_context(self, path: &Path) -> ApplicationResult<T> {
        self.map_err(|e| ApplicationError::InvalidSubmission {
            path: path.to_path_buf(),
            message: e.message,
        })
    }
}
