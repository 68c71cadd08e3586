//! Error types for entity access.

use keel_core::EntityId;
use std::fmt;

/// Errors from entity stores and query indexes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityError {
    /// Entity with the given ID does not exist.
    NotFound { obj_type: String, id: EntityId },
    /// No definition is registered for the object type.
    UnknownObjectType { obj_type: String },
    /// A query could not be built or executed.
    InvalidQuery { reason: String },
    /// The backing store failed.
    Storage { reason: String },
}

impl fmt::Display for EntityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { obj_type, id } => write!(f, "{obj_type} entity not found: {id}"),
            Self::UnknownObjectType { obj_type } => write!(f, "unknown object type: {obj_type}"),
            Self::InvalidQuery { reason } => write!(f, "invalid entity query: {reason}"),
            Self::Storage { reason } => write!(f, "entity storage failed: {reason}"),
        }
    }
}

impl std::error::Error for EntityError {}
