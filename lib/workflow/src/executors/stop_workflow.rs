use crate::action::ActionNode;
use crate::executor::{ActionError, ActionExecutor, ActionOutcome};
use async_trait::async_trait;
use keel_entity::{Actor, Entity};

/// Stops the running instance. The engine records the status change.
pub struct StopWorkflowExecutor;

#[async_trait]
impl ActionExecutor for StopWorkflowExecutor {
    async fn execute(
        &self,
        _action: &ActionNode,
        _entity: &mut Entity,
        _actor: &Actor,
    ) -> Result<ActionOutcome, ActionError> {
        Ok(ActionOutcome::Stop)
    }
}
