use crate::action::{ActionKind, ActionNode};
use crate::executor::{ActionError, ActionExecutor, ActionOutcome};
use async_trait::async_trait;
use keel_core::WorkflowId;
use keel_entity::{Actor, Entity};

/// Asks the engine to start another workflow against the same entity.
///
/// Params: `workflow_id`. The engine applies the usual singleton and
/// condition checks to the launched workflow.
pub struct StartWorkflowExecutor;

#[async_trait]
impl ActionExecutor for StartWorkflowExecutor {
    async fn execute(
        &self,
        action: &ActionNode,
        _entity: &mut Entity,
        _actor: &Actor,
    ) -> Result<ActionOutcome, ActionError> {
        let kind = ActionKind::StartWorkflow;
        let raw = action
            .param_str("workflow_id")
            .ok_or_else(|| ActionError::invalid(kind, "missing workflow_id"))?;
        let workflow_id: WorkflowId = raw
            .parse()
            .map_err(|e| ActionError::invalid(kind, format!("bad workflow_id: {e}")))?;
        if workflow_id == action.workflow_id {
            return Err(ActionError::invalid(kind, "a workflow cannot start itself"));
        }
        Ok(ActionOutcome::Launch { workflow_id })
    }
}
