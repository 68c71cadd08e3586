use crate::action::{ActionKind, ActionNode};
use crate::executor::{ActionError, ActionExecutor, ActionOutcome};
use crate::merge::MergeFields;
use async_trait::async_trait;
use keel_entity::{Actor, Entity, EntityQuery, EntityStore, QueryIndex};
use rand::seq::SliceRandom;
use std::sync::Arc;
use tracing::debug;

const USER_TYPE: &str = "user";

/// Assigns a field to a user picked at random from a pool, then saves.
///
/// Params: `field`, plus one pool: `team_id` (users whose `team_id` matches),
/// `group_id` (users whose `groups` contain it) or `users` (comma-separated
/// user IDs, merge fields allowed).
pub struct AssignExecutor {
    entities: Arc<dyn EntityStore>,
    index: Arc<dyn QueryIndex>,
    merge: MergeFields,
}

impl AssignExecutor {
    #[must_use]
    pub fn new(
        entities: Arc<dyn EntityStore>,
        index: Arc<dyn QueryIndex>,
        merge: MergeFields,
    ) -> Self {
        Self {
            entities,
            index,
            merge,
        }
    }

    async fn candidates(
        &self,
        action: &ActionNode,
        entity: &Entity,
    ) -> Result<Vec<String>, ActionError> {
        let membership = if let Some(team) = action.param_str("team_id") {
            Some(("team_id", team, false))
        } else {
            action.param_str("group_id").map(|g| ("groups", g, true))
        };

        if let Some((field, value, contains)) = membership {
            let mut query = EntityQuery::new(USER_TYPE, entity.account_id);
            let condition = query.where_field(field);
            if contains {
                condition.contains(value);
            } else {
                condition.equals(value);
            }
            let results = self.index.execute_query(&query).await?;
            return Ok(results
                .entities
                .iter()
                .filter_map(|u| u.id.map(|id| id.to_string()))
                .collect());
        }

        let Some(users) = action.param_str("users") else {
            return Err(ActionError::invalid(
                ActionKind::Assign,
                "one of team_id, group_id or users is required",
            ));
        };
        let users = self.merge.render(users, entity).await?;
        Ok(users
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect())
    }
}

#[async_trait]
impl ActionExecutor for AssignExecutor {
    async fn execute(
        &self,
        action: &ActionNode,
        entity: &mut Entity,
        actor: &Actor,
    ) -> Result<ActionOutcome, ActionError> {
        let field = action
            .param_str("field")
            .ok_or_else(|| ActionError::invalid(ActionKind::Assign, "missing field"))?;
        let candidates = self.candidates(action, entity).await?;
        let picked = {
            let mut rng = rand::thread_rng();
            candidates.choose(&mut rng).cloned()
        };
        let Some(picked) = picked else {
            return Err(ActionError::invalid(ActionKind::Assign, "no users to pick from"));
        };

        debug!(field, user = %picked, pool = candidates.len(), "assigning");
        entity.set_value(field, picked);
        self.entities.save(entity, actor).await?;
        Ok(ActionOutcome::Succeeded)
    }
}
