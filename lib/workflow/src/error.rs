//! Error types for the workflow crate.
//!
//! - `ForestError`: a workflow's stored action forest is malformed
//! - `WorkflowError`: failures at the engine entry points, returned inside a
//!   rootcause report
//!
//! Storage and executor errors live next to their traits (`DataMapperError`
//! in [`crate::mapper`], `ActionError` in [`crate::executor`]).

use crate::mapper::DataMapperError;
use keel_core::{ActionId, WorkflowId};
use keel_entity::EntityError;
use std::fmt;

/// Errors from building an action forest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForestError {
    /// Two stored actions share an ID.
    DuplicateAction { action_id: ActionId },
    /// An action belongs to a different workflow than the one being loaded.
    ForeignAction {
        action_id: ActionId,
        workflow_id: WorkflowId,
    },
    /// An action names a parent that is not part of the workflow.
    MissingParent {
        action_id: ActionId,
        parent_id: ActionId,
    },
    /// Parent links form a cycle.
    CycleDetected,
}

impl fmt::Display for ForestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateAction { action_id } => write!(f, "duplicate action: {action_id}"),
            Self::ForeignAction {
                action_id,
                workflow_id,
            } => write!(f, "action {action_id} belongs to workflow {workflow_id}"),
            Self::MissingParent {
                action_id,
                parent_id,
            } => write!(f, "action {action_id} has missing parent {parent_id}"),
            Self::CycleDetected => write!(f, "action parent links form a cycle"),
        }
    }
}

impl std::error::Error for ForestError {}

/// Errors from the engine entry points.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowError {
    /// The workflow data mapper failed.
    DataMapper(DataMapperError),
    /// The entity store or query index failed.
    Entity(EntityError),
    /// A workflow's action forest could not be loaded.
    InvalidForest {
        workflow_id: WorkflowId,
        error: ForestError,
    },
    /// Workflows can only run against saved entities.
    UnsavedEntity { obj_type: String },
    /// Nested `start_workflow` launches went deeper than allowed.
    LaunchDepthExceeded {
        workflow_id: WorkflowId,
        depth: usize,
    },
}

impl fmt::Display for WorkflowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DataMapper(e) => write!(f, "workflow data mapper error: {e}"),
            Self::Entity(e) => write!(f, "entity access error: {e}"),
            Self::InvalidForest { workflow_id, error } => {
                write!(f, "invalid action forest for workflow {workflow_id}: {error}")
            }
            Self::UnsavedEntity { obj_type } => {
                write!(f, "cannot run workflows on unsaved {obj_type} entity")
            }
            Self::LaunchDepthExceeded { workflow_id, depth } => {
                write!(f, "launching workflow {workflow_id} exceeds depth {depth}")
            }
        }
    }
}

impl std::error::Error for WorkflowError {}

impl From<DataMapperError> for WorkflowError {
    fn from(e: DataMapperError) -> Self {
        Self::DataMapper(e)
    }
}

impl From<EntityError> for WorkflowError {
    fn from(e: EntityError) -> Self {
        Self::Entity(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forest_error_display() {
        let action_id = ActionId::new();
        let parent_id = ActionId::new();
        let err = ForestError::MissingParent {
            action_id,
            parent_id,
        };
        assert!(err.to_string().contains(&parent_id.to_string()));
    }

    #[test]
    fn workflow_error_wraps_lower_errors() {
        let err = WorkflowError::from(DataMapperError::Storage {
            reason: "connection reset".to_string(),
        });
        assert!(matches!(err, WorkflowError::DataMapper(_)));
        assert!(err.to_string().contains("connection reset"));
    }
}
