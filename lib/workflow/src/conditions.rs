//! Evaluates a workflow's stored conditions against an entity.

use crate::definition::{EventKind, WorkflowDefinition};
use keel_entity::{Entity, EntityError, EntityQuery, QueryIndex, Where, conditions_match};
use std::sync::Arc;

/// Checks stored conditions against the persisted state of an entity.
#[derive(Clone)]
pub struct ConditionEvaluator {
    index: Arc<dyn QueryIndex>,
}

impl ConditionEvaluator {
    #[must_use]
    pub fn new(index: Arc<dyn QueryIndex>) -> Self {
        Self { index }
    }

    /// Returns true if the entity satisfies the workflow's conditions.
    pub async fn matches(
        &self,
        workflow: &WorkflowDefinition,
        entity: &Entity,
    ) -> Result<bool, EntityError> {
        self.check(&workflow.conditions, entity).await
    }

    /// Evaluates a condition list. Saved entities are checked through the
    /// query index, so values come from storage rather than from memory.
    /// Unsaved entities are checked in memory.
    pub async fn check(&self, conditions: &[Where], entity: &Entity) -> Result<bool, EntityError> {
        if conditions.is_empty() {
            return Ok(true);
        }
        let Some(id) = entity.id else {
            return Ok(conditions_match(conditions, entity));
        };

        let mut query = EntityQuery::new(entity.obj_type.clone(), entity.account_id);
        query
            .for_entity(id)
            .include_archived(entity.archived)
            .extend_conditions(conditions.iter().cloned())
            .limit(1);
        let results = self.index.execute_query(&query).await?;
        Ok(results.total_count > 0)
    }

    /// For `only_on_conditions_unmet` workflows with conditions, on update,
    /// returns true only if a field named by a condition changed in this
    /// save. Always true otherwise.
    #[must_use]
    pub fn change_gate_open(
        &self,
        workflow: &WorkflowDefinition,
        entity: &Entity,
        event: EventKind,
    ) -> bool {
        if !workflow.only_on_conditions_unmet
            || event != EventKind::Update
            || workflow.conditions.is_empty()
        {
            return true;
        }
        workflow
            .conditions
            .iter()
            .any(|c| entity.field_changed(&c.field))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::{AccountId, UserId};
    use keel_entity::{MemoryEntityStore, Operator};

    fn workflow(account: AccountId) -> WorkflowDefinition {
        WorkflowDefinition::new(account, UserId::new(), "wf", "task")
            .on(EventKind::Update)
            .with_condition(Where::new("done", Operator::Equals, true))
    }

    #[tokio::test]
    async fn uses_persisted_values() {
        let account = AccountId::new();
        let store = Arc::new(MemoryEntityStore::new());
        let id = store.insert(Entity::new("task", account).with_value("done", false));
        let evaluator = ConditionEvaluator::new(store.clone());

        let mut entity = store.snapshot(id).unwrap();
        entity.set_value("done", true);
        assert!(
            !evaluator.matches(&workflow(account), &entity).await.unwrap(),
            "unsaved change is not visible"
        );

        store.insert(entity.clone());
        assert!(evaluator.matches(&workflow(account), &entity).await.unwrap());
    }

    #[tokio::test]
    async fn does_not_leak_to_other_entities() {
        let account = AccountId::new();
        let store = Arc::new(MemoryEntityStore::new());
        store.insert(Entity::new("task", account).with_value("done", true));
        let id = store.insert(Entity::new("task", account).with_value("done", false));
        let evaluator = ConditionEvaluator::new(store.clone());

        let wf = workflow(account).with_condition(Where::new("done", Operator::Equals, true).or());
        let entity = store.snapshot(id).unwrap();
        assert!(!evaluator.matches(&wf, &entity).await.unwrap());
    }

    #[tokio::test]
    async fn archived_entities_are_checked() {
        let account = AccountId::new();
        let store = Arc::new(MemoryEntityStore::new());
        let mut entity = Entity::new("task", account).with_value("done", true);
        entity.archived = true;
        let id = store.insert(entity);
        let evaluator = ConditionEvaluator::new(store.clone());

        let entity = store.snapshot(id).unwrap();
        assert!(evaluator.matches(&workflow(account), &entity).await.unwrap());
    }

    #[tokio::test]
    async fn no_conditions_always_match() {
        let store = Arc::new(MemoryEntityStore::new());
        store.set_unavailable(true);
        let evaluator = ConditionEvaluator::new(store);
        let account = AccountId::new();
        let wf = WorkflowDefinition::new(account, UserId::new(), "wf", "task");
        let entity = Entity::new("task", account);
        assert!(evaluator.matches(&wf, &entity).await.unwrap());
    }

    #[test]
    fn change_gate() {
        let account = AccountId::new();
        let evaluator = ConditionEvaluator::new(Arc::new(MemoryEntityStore::new()));
        let wf = workflow(account);

        let mut entity = Entity::new("task", account).with_value("done", true);
        assert!(evaluator.change_gate_open(&wf, &entity, EventKind::Update));

        entity.reset_dirty();
        entity.set_value("name", "renamed");
        assert!(!evaluator.change_gate_open(&wf, &entity, EventKind::Update));
        assert!(evaluator.change_gate_open(&wf, &entity, EventKind::Create));
        assert!(evaluator.change_gate_open(
            &workflow(account).fire_on_every_update(),
            &entity,
            EventKind::Update
        ));
    }

    #[test]
    fn change_gate_stays_open_without_conditions() {
        let account = AccountId::new();
        let evaluator = ConditionEvaluator::new(Arc::new(MemoryEntityStore::new()));
        let wf =
            WorkflowDefinition::new(account, UserId::new(), "wf", "task").on(EventKind::Update);
        assert!(wf.only_on_conditions_unmet);

        let mut entity = Entity::new("task", account).with_value("done", true);
        entity.reset_dirty();
        entity.set_value("name", "renamed");
        assert!(evaluator.change_gate_open(&wf, &entity, EventKind::Update));
    }
}
