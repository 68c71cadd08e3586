//! The action executor contract and the registry that resolves stored type
//! names to executors.

use crate::action::{ActionKind, ActionNode};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use keel_core::WorkflowId;
use keel_entity::{Actor, Entity, EntityError};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// What the tree walk should do after an action ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    /// Run the action's children.
    Succeeded,
    /// The action ran but its branch ends here, e.g. an unmet check.
    Declined,
    /// Pause the branch and resume the children at `resume_at`.
    Wait { resume_at: DateTime<Utc> },
    /// Stop the whole instance.
    Stop,
    /// Start another workflow against the same entity, then run the children.
    Launch { workflow_id: WorkflowId },
}

/// Errors from executing one action. Each one ends only its own branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionError {
    /// The stored type name is not a known action kind.
    UnknownActionType { name: String },
    /// The action's params are missing or malformed.
    InvalidParams { kind: ActionKind, reason: String },
    /// No executor is registered for a known kind.
    NotImplemented { kind: ActionKind },
    /// Entity storage failed.
    Storage { reason: String },
    /// An outbound transport (mail, HTTP) failed.
    Transport { reason: String },
}

impl ActionError {
    pub(crate) fn invalid(kind: ActionKind, reason: impl Into<String>) -> Self {
        Self::InvalidParams {
            kind,
            reason: reason.into(),
        }
    }

    /// Returns true if retrying later could succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Storage { .. } | Self::Transport { .. })
    }

    /// Short category name for logs.
    #[must_use]
    pub fn category(&self) -> &'static str {
        match self {
            Self::UnknownActionType { .. } | Self::InvalidParams { .. } => "configuration",
            Self::NotImplemented { .. } => "not_implemented",
            Self::Storage { .. } | Self::Transport { .. } => "transient",
        }
    }
}

impl fmt::Display for ActionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownActionType { name } => write!(f, "unknown action type: {name}"),
            Self::InvalidParams { kind, reason } => {
                write!(f, "invalid params for {kind}: {reason}")
            }
            Self::NotImplemented { kind } => write!(f, "no executor registered for {kind}"),
            Self::Storage { reason } => write!(f, "storage failed: {reason}"),
            Self::Transport { reason } => write!(f, "transport failed: {reason}"),
        }
    }
}

impl std::error::Error for ActionError {}

impl From<EntityError> for ActionError {
    fn from(e: EntityError) -> Self {
        Self::Storage {
            reason: e.to_string(),
        }
    }
}

/// A unit of work for one action kind.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    /// Runs the action against the entity on behalf of the actor.
    async fn execute(
        &self,
        action: &ActionNode,
        entity: &mut Entity,
        actor: &Actor,
    ) -> Result<ActionOutcome, ActionError>;
}

/// Maps action kinds to executors. Populated once at start-up.
#[derive(Clone, Default)]
pub struct ActionExecutorRegistry {
    executors: BTreeMap<ActionKind, Arc<dyn ActionExecutor>>,
}

impl ActionExecutorRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an executor, replacing any previous one for the kind.
    pub fn register(&mut self, kind: ActionKind, executor: Arc<dyn ActionExecutor>) -> &mut Self {
        self.executors.insert(kind, executor);
        self
    }

    /// Resolves a stored type name.
    ///
    /// # Errors
    ///
    /// `UnknownActionType` for names outside [`ActionKind`], `NotImplemented`
    /// for known kinds with nothing registered.
    pub fn resolve(&self, type_name: &str) -> Result<Arc<dyn ActionExecutor>, ActionError> {
        let kind = ActionKind::from_name(type_name).ok_or_else(|| ActionError::UnknownActionType {
            name: type_name.to_string(),
        })?;
        self.executors
            .get(&kind)
            .cloned()
            .ok_or(ActionError::NotImplemented { kind })
    }

    /// Kinds with a registered executor.
    pub fn kinds(&self) -> impl Iterator<Item = ActionKind> + '_ {
        self.executors.keys().copied()
    }
}
