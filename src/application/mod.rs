//! Application layer: value mapping and services
//!
//! This layer orchestrates domain logic and depends on I/O boundary traits.

pub mod error;
pub mod error_ext;
pub mod mapper;
pub mod services;

pub use error::{ApplicationError, ApplicationResult};
pub use error_ext::{IoResultExt, SubmissionResultExt};
pub use mapper::{map_value, map_value_shifted, FieldMapper, MediaContext};
