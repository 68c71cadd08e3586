use crate::action::{ActionKind, ActionNode};
use crate::executor::{ActionError, ActionExecutor, ActionOutcome};
use crate::merge::MergeFields;
use async_trait::async_trait;
use keel_entity::{Actor, Entity, EntityStore};
use std::sync::Arc;
use tracing::info;

const APPROVAL_TYPE: &str = "approval";

/// Opens an approval request for the entity.
///
/// Params: `approver_id` (merge fields allowed, e.g. `<%owner_id%>`) and an
/// optional `name`. Creates an `approval` entity with status `awaiting` that
/// references the entity as `obj_type:id`.
pub struct ApprovalExecutor {
    entities: Arc<dyn EntityStore>,
    merge: MergeFields,
}

impl ApprovalExecutor {
    #[must_use]
    pub fn new(entities: Arc<dyn EntityStore>, merge: MergeFields) -> Self {
        Self { entities, merge }
    }
}

#[async_trait]
impl ActionExecutor for ApprovalExecutor {
    async fn execute(
        &self,
        action: &ActionNode,
        entity: &mut Entity,
        actor: &Actor,
    ) -> Result<ActionOutcome, ActionError> {
        let kind = ActionKind::Approval;
        let approver = action
            .param_str("approver_id")
            .ok_or_else(|| ActionError::invalid(kind, "missing approver_id"))?;
        let approver = self.merge.render(approver, entity).await?;
        if approver.is_empty() {
            return Err(ActionError::invalid(kind, "approver_id rendered empty"));
        }
        let Some(entity_id) = entity.id else {
            return Err(ActionError::invalid(kind, "entity is not saved"));
        };

        let name = match action.param_str("name") {
            Some(name) => self.merge.render(name, entity).await?,
            None => format!("Approval requested for {} {entity_id}", entity.obj_type),
        };
        let mut approval = Entity::new(APPROVAL_TYPE, entity.account_id)
            .with_value("name", name)
            .with_value("obj_reference", format!("{}:{entity_id}", entity.obj_type))
            .with_value("owner_id", approver.clone())
            .with_value("requested_by", actor.user_id.to_string())
            .with_value("status", "awaiting");
        let approval_id = self.entities.save(&mut approval, actor).await?;

        info!(approval_id = %approval_id, approver = %approver, "approval requested");
        Ok(ActionOutcome::Succeeded)
    }
}
