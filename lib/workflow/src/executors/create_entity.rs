use crate::action::{ActionKind, ActionNode};
use crate::executor::{ActionError, ActionExecutor, ActionOutcome};
use crate::merge::MergeFields;
use async_trait::async_trait;
use keel_entity::{Actor, Entity, EntityError, EntityStore};
use std::sync::Arc;
use tracing::{debug, info};

/// Creates a new entity in the actor's account.
///
/// Params: `obj_type`; every other param whose name is a field of that type
/// becomes a field value, with merge fields rendered against the triggering
/// entity.
pub struct CreateEntityExecutor {
    entities: Arc<dyn EntityStore>,
    merge: MergeFields,
}

impl CreateEntityExecutor {
    #[must_use]
    pub fn new(entities: Arc<dyn EntityStore>, merge: MergeFields) -> Self {
        Self { entities, merge }
    }
}

#[async_trait]
impl ActionExecutor for CreateEntityExecutor {
    async fn execute(
        &self,
        action: &ActionNode,
        entity: &mut Entity,
        actor: &Actor,
    ) -> Result<ActionOutcome, ActionError> {
        let kind = ActionKind::CreateEntity;
        let obj_type = action
            .param_str("obj_type")
            .ok_or_else(|| ActionError::invalid(kind, "missing obj_type"))?;
        let definition = match self.entities.get_definition(obj_type).await {
            Ok(definition) => definition,
            Err(EntityError::UnknownObjectType { .. }) => {
                return Err(ActionError::invalid(kind, format!("unknown obj_type {obj_type}")));
            }
            Err(e) => return Err(e.into()),
        };

        let mut created = Entity::new(obj_type, actor.account_id);
        for (name, raw) in &action.params {
            if name == "obj_type" {
                continue;
            }
            if definition.field(name).is_none() {
                debug!(field = %name, obj_type, "skipping param with no matching field");
                continue;
            }
            let value = self.merge.render_value(raw, entity).await?;
            created.set_value(name, value);
        }

        let id = self.entities.save(&mut created, actor).await?;
        info!(obj_type, entity_id = %id, "workflow created entity");
        Ok(ActionOutcome::Succeeded)
    }
}
