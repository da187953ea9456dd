//! Domain layer: field trees, name resolution and structural comparison
//!
//! This layer is independent of external concerns (no I/O, no CLI, no config loading).

pub mod arena;
pub mod builder;
pub mod compare;
pub mod entities;
pub mod error;
pub mod identity;
pub mod model;
pub mod xml;

pub use arena::{FieldNode, FieldTree};
pub use builder::FieldTreeBuilder;
pub use compare::{compare_definitions, compare_xml, Severity};
pub use entities::*;
pub use error::{DomainResult, IncompleteSubmissionData, Reason};
pub use identity::FormDefinition;
pub use model::Model;
pub use xml::XmlElement;
