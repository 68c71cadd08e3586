//! Persistence seam for workflows, actions, instances and continuations.

use crate::action::ActionNode;
use crate::definition::{EventKind, WorkflowDefinition};
use crate::instance::{InstanceStatus, ScheduledContinuation, WorkflowInstance};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use keel_core::{AccountId, ActionId, EntityId, WorkflowId, WorkflowInstanceId};
use keel_entity::Actor;
use std::fmt;

/// Errors from workflow storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataMapperError {
    /// A record does not exist.
    NotFound { kind: &'static str, id: String },
    /// A uniqueness rule rejected the write, e.g. a second running instance
    /// of a singleton workflow.
    Conflict { reason: String },
    /// A stored record could not be decoded.
    Corrupt { reason: String },
    /// The backing store failed.
    Storage { reason: String },
}

impl DataMapperError {
    pub(crate) fn not_found(kind: &'static str, id: impl fmt::Display) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}

impl DataMapperError {
    /// Returns true if retrying later could succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Storage { .. })
    }
}

impl fmt::Display for DataMapperError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { kind, id } => write!(f, "{kind} not found: {id}"),
            Self::Conflict { reason } => write!(f, "conflict: {reason}"),
            Self::Corrupt { reason } => write!(f, "corrupt record: {reason}"),
            Self::Storage { reason } => write!(f, "workflow storage failed: {reason}"),
        }
    }
}

impl std::error::Error for DataMapperError {}

/// Storage for everything the engine reads and writes about workflows.
///
/// All state shared between engine invocations goes through this trait, so
/// a pass paused in one process can be resumed by another.
#[async_trait]
pub trait WorkflowDataMapper: Send + Sync {
    /// Active workflows on an object type bound to an event.
    async fn get_active_workflows_for_event(
        &self,
        obj_type: &str,
        account_id: AccountId,
        event: EventKind,
    ) -> Result<Vec<WorkflowDefinition>, DataMapperError>;

    /// Active periodic workflows across all accounts.
    async fn get_active_periodic_workflows(
        &self,
    ) -> Result<Vec<WorkflowDefinition>, DataMapperError>;

    async fn get_workflow(
        &self,
        account_id: AccountId,
        workflow_id: WorkflowId,
    ) -> Result<WorkflowDefinition, DataMapperError>;

    /// Children of `parent` (roots when `None`) in sibling order.
    async fn get_actions(
        &self,
        account_id: AccountId,
        workflow_id: WorkflowId,
        parent: Option<ActionId>,
    ) -> Result<Vec<ActionNode>, DataMapperError>;

    /// Every action of a workflow, in no particular order.
    async fn get_workflow_actions(
        &self,
        account_id: AccountId,
        workflow_id: WorkflowId,
    ) -> Result<Vec<ActionNode>, DataMapperError>;

    async fn get_action(
        &self,
        account_id: AccountId,
        action_id: ActionId,
    ) -> Result<ActionNode, DataMapperError>;

    /// Creates a running instance.
    ///
    /// Stores that enforce singleton uniqueness return
    /// [`DataMapperError::Conflict`] when the workflow is singleton and a
    /// running instance already exists for the entity.
    async fn create_workflow_instance(
        &self,
        workflow: &WorkflowDefinition,
        entity_id: EntityId,
        actor: &Actor,
    ) -> Result<WorkflowInstance, DataMapperError>;

    async fn get_instances_for_entity(
        &self,
        workflow_id: WorkflowId,
        entity_id: EntityId,
    ) -> Result<Vec<WorkflowInstance>, DataMapperError>;

    async fn get_workflow_instance(
        &self,
        instance_id: WorkflowInstanceId,
    ) -> Result<WorkflowInstance, DataMapperError>;

    async fn update_instance_status(
        &self,
        instance_id: WorkflowInstanceId,
        status: InstanceStatus,
    ) -> Result<(), DataMapperError>;

    /// Records (or moves) the continuation for an instance and action.
    async fn schedule_action(
        &self,
        instance_id: WorkflowInstanceId,
        action_id: ActionId,
        resume_at: DateTime<Utc>,
    ) -> Result<(), DataMapperError>;

    async fn get_scheduled_action_time(
        &self,
        instance_id: WorkflowInstanceId,
        action_id: ActionId,
    ) -> Result<Option<DateTime<Utc>>, DataMapperError>;

    /// Removes a continuation. Removing a missing one is not an error.
    async fn delete_scheduled_action(
        &self,
        instance_id: WorkflowInstanceId,
        action_id: ActionId,
    ) -> Result<(), DataMapperError>;

    /// Continuations with `resume_at <= now`, oldest first.
    async fn get_due_continuations(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ScheduledContinuation>, DataMapperError>;

    async fn has_scheduled_actions(
        &self,
        instance_id: WorkflowInstanceId,
    ) -> Result<bool, DataMapperError>;

    /// Atomically records that a periodic workflow ran for an entity in a
    /// period. Returns `false` if it was already recorded.
    async fn claim_periodic_run(
        &self,
        workflow_id: WorkflowId,
        entity_id: EntityId,
        period_key: &str,
    ) -> Result<bool, DataMapperError>;

    /// Drops a claim whose run never started, so a later pass in the same
    /// period can take it again.
    async fn release_periodic_run(
        &self,
        workflow_id: WorkflowId,
        entity_id: EntityId,
        period_key: &str,
    ) -> Result<(), DataMapperError>;

    async fn mark_workflow_run(
        &self,
        workflow_id: WorkflowId,
        at: DateTime<Utc>,
    ) -> Result<(), DataMapperError>;
}
