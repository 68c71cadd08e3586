//! In-memory workflow storage.

use crate::action::ActionNode;
use crate::definition::{EventKind, WorkflowDefinition};
use crate::instance::{InstanceStatus, ScheduledContinuation, WorkflowInstance};
use crate::mapper::{DataMapperError, WorkflowDataMapper};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use keel_core::{AccountId, ActionId, EntityId, WorkflowId, WorkflowInstanceId};
use keel_entity::Actor;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Default)]
struct Inner {
    workflows: BTreeMap<WorkflowId, WorkflowDefinition>,
    actions: BTreeMap<ActionId, ActionNode>,
    instances: BTreeMap<WorkflowInstanceId, WorkflowInstance>,
    continuations: HashMap<(WorkflowInstanceId, ActionId), DateTime<Utc>>,
    periodic_runs: BTreeSet<(WorkflowId, EntityId, String)>,
    failures: HashMap<&'static str, usize>,
}

/// [`WorkflowDataMapper`] backed by process memory.
///
/// Enforces singleton uniqueness under its lock the same way the Postgres
/// mapper does with a partial unique index.
#[derive(Default)]
pub struct MemoryWorkflowStore {
    inner: Mutex<Inner>,
    unavailable: AtomicBool,
}

impl MemoryWorkflowStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_workflow(&self, workflow: WorkflowDefinition) {
        self.lock().workflows.insert(workflow.id, workflow);
    }

    pub fn add_action(&self, action: ActionNode) {
        self.lock().actions.insert(action.id, action);
    }

    /// All instances, in creation order.
    #[must_use]
    pub fn instances(&self) -> Vec<WorkflowInstance> {
        self.lock().instances.values().cloned().collect()
    }

    /// All pending continuations, ordered by resume time.
    #[must_use]
    pub fn continuations(&self) -> Vec<ScheduledContinuation> {
        let mut all: Vec<_> = self
            .lock()
            .continuations
            .iter()
            .map(|(&(instance_id, action_id), &resume_at)| ScheduledContinuation {
                instance_id,
                action_id,
                resume_at,
            })
            .collect();
        all.sort_by_key(|c| (c.resume_at, c.instance_id, c.action_id));
        all
    }

    /// Makes every operation fail with [`DataMapperError::Storage`] while set.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Makes the next `times` calls to the named mapper operation fail with
    /// [`DataMapperError::Storage`]. Covers `create_workflow_instance`,
    /// `update_instance_status` and `schedule_action`.
    pub fn fail_next(&self, operation: &'static str, times: usize) {
        self.lock().failures.insert(operation, times);
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn available(&self) -> Result<MutexGuard<'_, Inner>, DataMapperError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(DataMapperError::Storage {
                reason: "workflow store unavailable".to_string(),
            });
        }
        Ok(self.lock())
    }

    fn available_for(
        &self,
        operation: &'static str,
    ) -> Result<MutexGuard<'_, Inner>, DataMapperError> {
        let mut inner = self.available()?;
        if let Some(remaining) = inner.failures.get_mut(operation)
            && *remaining > 0
        {
            *remaining -= 1;
            return Err(DataMapperError::Storage {
                reason: format!("{operation} failed"),
            });
        }
        Ok(inner)
    }
}

fn sibling_order(actions: &mut [ActionNode]) {
    actions.sort_by_key(|a| (a.sort_order, a.id));
}

#[async_trait]
impl WorkflowDataMapper for MemoryWorkflowStore {
    async fn get_active_workflows_for_event(
        &self,
        obj_type: &str,
        account_id: AccountId,
        event: EventKind,
    ) -> Result<Vec<WorkflowDefinition>, DataMapperError> {
        Ok(self
            .available()?
            .workflows
            .values()
            .filter(|w| {
                w.active
                    && w.account_id == account_id
                    && w.obj_type == obj_type
                    && w.triggers_on(event)
            })
            .cloned()
            .collect())
    }

    async fn get_active_periodic_workflows(
        &self,
    ) -> Result<Vec<WorkflowDefinition>, DataMapperError> {
        Ok(self
            .available()?
            .workflows
            .values()
            .filter(|w| w.active && w.periodic.is_some())
            .cloned()
            .collect())
    }

    async fn get_workflow(
        &self,
        account_id: AccountId,
        workflow_id: WorkflowId,
    ) -> Result<WorkflowDefinition, DataMapperError> {
        self.available()?
            .workflows
            .get(&workflow_id)
            .filter(|w| w.account_id == account_id)
            .cloned()
            .ok_or_else(|| DataMapperError::not_found("workflow", workflow_id))
    }

    async fn get_actions(
        &self,
        account_id: AccountId,
        workflow_id: WorkflowId,
        parent: Option<ActionId>,
    ) -> Result<Vec<ActionNode>, DataMapperError> {
        let mut actions: Vec<ActionNode> = self
            .available()?
            .actions
            .values()
            .filter(|a| {
                a.account_id == account_id && a.workflow_id == workflow_id && a.parent_id == parent
            })
            .cloned()
            .collect();
        sibling_order(&mut actions);
        Ok(actions)
    }

    async fn get_workflow_actions(
        &self,
        account_id: AccountId,
        workflow_id: WorkflowId,
    ) -> Result<Vec<ActionNode>, DataMapperError> {
        Ok(self
            .available()?
            .actions
            .values()
            .filter(|a| a.account_id == account_id && a.workflow_id == workflow_id)
            .cloned()
            .collect())
    }

    async fn get_action(
        &self,
        account_id: AccountId,
        action_id: ActionId,
    ) -> Result<ActionNode, DataMapperError> {
        self.available()?
            .actions
            .get(&action_id)
            .filter(|a| a.account_id == account_id)
            .cloned()
            .ok_or_else(|| DataMapperError::not_found("action", action_id))
    }

    async fn create_workflow_instance(
        &self,
        workflow: &WorkflowDefinition,
        entity_id: EntityId,
        actor: &Actor,
    ) -> Result<WorkflowInstance, DataMapperError> {
        let mut inner = self.available_for("create_workflow_instance")?;
        if workflow.singleton
            && inner.instances.values().any(|i| {
                i.workflow_id == workflow.id && i.entity_id == entity_id && i.is_running()
            })
        {
            return Err(DataMapperError::Conflict {
                reason: format!(
                    "singleton workflow {} already running for {entity_id}",
                    workflow.id
                ),
            });
        }

        let instance = WorkflowInstance {
            id: WorkflowInstanceId::new(),
            workflow_id: workflow.id,
            entity_id,
            account_id: workflow.account_id,
            user_id: actor.user_id,
            status: InstanceStatus::Running,
            singleton: workflow.singleton,
            created_at: Utc::now(),
        };
        inner.instances.insert(instance.id, instance.clone());
        Ok(instance)
    }

    async fn get_instances_for_entity(
        &self,
        workflow_id: WorkflowId,
        entity_id: EntityId,
    ) -> Result<Vec<WorkflowInstance>, DataMapperError> {
        Ok(self
            .available()?
            .instances
            .values()
            .filter(|i| i.workflow_id == workflow_id && i.entity_id == entity_id)
            .cloned()
            .collect())
    }

    async fn get_workflow_instance(
        &self,
        instance_id: WorkflowInstanceId,
    ) -> Result<WorkflowInstance, DataMapperError> {
        self.available()?
            .instances
            .get(&instance_id)
            .cloned()
            .ok_or_else(|| DataMapperError::not_found("workflow instance", instance_id))
    }

    async fn update_instance_status(
        &self,
        instance_id: WorkflowInstanceId,
        status: InstanceStatus,
    ) -> Result<(), DataMapperError> {
        let mut inner = self.available_for("update_instance_status")?;
        let instance = inner
            .instances
            .get_mut(&instance_id)
            .ok_or_else(|| DataMapperError::not_found("workflow instance", instance_id))?;
        instance.status = status;
        Ok(())
    }

    async fn schedule_action(
        &self,
        instance_id: WorkflowInstanceId,
        action_id: ActionId,
        resume_at: DateTime<Utc>,
    ) -> Result<(), DataMapperError> {
        let mut inner = self.available_for("schedule_action")?;
        if !inner.instances.contains_key(&instance_id) {
            return Err(DataMapperError::not_found("workflow instance", instance_id));
        }
        inner
            .continuations
            .insert((instance_id, action_id), resume_at);
        Ok(())
    }

    async fn get_scheduled_action_time(
        &self,
        instance_id: WorkflowInstanceId,
        action_id: ActionId,
    ) -> Result<Option<DateTime<Utc>>, DataMapperError> {
        Ok(self
            .available()?
            .continuations
            .get(&(instance_id, action_id))
            .copied())
    }

    async fn delete_scheduled_action(
        &self,
        instance_id: WorkflowInstanceId,
        action_id: ActionId,
    ) -> Result<(), DataMapperError> {
        self.available()?
            .continuations
            .remove(&(instance_id, action_id));
        Ok(())
    }

    async fn get_due_continuations(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ScheduledContinuation>, DataMapperError> {
        self.available()?;
        Ok(self
            .continuations()
            .into_iter()
            .filter(|c| c.resume_at <= now)
            .collect())
    }

    async fn has_scheduled_actions(
        &self,
        instance_id: WorkflowInstanceId,
    ) -> Result<bool, DataMapperError> {
        Ok(self
            .available()?
            .continuations
            .keys()
            .any(|(id, _)| *id == instance_id))
    }

    async fn claim_periodic_run(
        &self,
        workflow_id: WorkflowId,
        entity_id: EntityId,
        period_key: &str,
    ) -> Result<bool, DataMapperError> {
        Ok(self
            .available()?
            .periodic_runs
            .insert((workflow_id, entity_id, period_key.to_string())))
    }

    async fn release_periodic_run(
        &self,
        workflow_id: WorkflowId,
        entity_id: EntityId,
        period_key: &str,
    ) -> Result<(), DataMapperError> {
        self.available()?
            .periodic_runs
            .remove(&(workflow_id, entity_id, period_key.to_string()));
        Ok(())
    }

    async fn mark_workflow_run(
        &self,
        workflow_id: WorkflowId,
        at: DateTime<Utc>,
    ) -> Result<(), DataMapperError> {
        let mut inner = self.available()?;
        let workflow = inner
            .workflows
            .get_mut(&workflow_id)
            .ok_or_else(|| DataMapperError::not_found("workflow", workflow_id))?;
        workflow.last_run = Some(at);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionKind;
    use chrono::Duration;
    use keel_core::UserId;

    fn setup() -> (MemoryWorkflowStore, WorkflowDefinition, Actor) {
        let account = AccountId::new();
        let user = UserId::new();
        let wf = WorkflowDefinition::new(account, user, "wf", "task").on(EventKind::Update);
        let store = MemoryWorkflowStore::new();
        store.add_workflow(wf.clone());
        (store, wf, Actor::new(user, account))
    }

    #[tokio::test]
    async fn event_lookup_filters_type_account_and_trigger() {
        let (store, wf, _) = setup();
        let mut inactive = wf.clone();
        inactive.id = WorkflowId::new();
        inactive.active = false;
        store.add_workflow(inactive);

        let found = store
            .get_active_workflows_for_event("task", wf.account_id, EventKind::Update)
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, wf.id);

        for (obj_type, account, event) in [
            ("note", wf.account_id, EventKind::Update),
            ("task", AccountId::new(), EventKind::Update),
            ("task", wf.account_id, EventKind::Create),
        ] {
            let found = store
                .get_active_workflows_for_event(obj_type, account, event)
                .await
                .unwrap();
            assert!(found.is_empty());
        }
    }

    #[tokio::test]
    async fn actions_by_parent_in_sibling_order() {
        let (store, wf, _) = setup();
        let root = ActionNode::new(&wf, ActionKind::UpdateField);
        let late = ActionNode::new(&wf, ActionKind::SendEmail)
            .child_of(root.id)
            .with_order(9);
        let early = ActionNode::new(&wf, ActionKind::Webhook)
            .child_of(root.id)
            .with_order(1);
        store.add_action(root.clone());
        store.add_action(late.clone());
        store.add_action(early.clone());

        let roots = store.get_actions(wf.account_id, wf.id, None).await.unwrap();
        assert_eq!(roots, vec![root.clone()]);
        let children = store
            .get_actions(wf.account_id, wf.id, Some(root.id))
            .await
            .unwrap();
        assert_eq!(
            children.iter().map(|a| a.id).collect::<Vec<_>>(),
            vec![early.id, late.id]
        );
    }

    #[tokio::test]
    async fn singleton_instances_conflict_while_running() {
        let (store, wf, actor) = setup();
        let wf = wf.singleton();
        let entity_id = EntityId::new();

        let first = store
            .create_workflow_instance(&wf, entity_id, &actor)
            .await
            .unwrap();
        assert!(first.singleton);
        let second = store.create_workflow_instance(&wf, entity_id, &actor).await;
        assert!(matches!(second, Err(DataMapperError::Conflict { .. })));

        store
            .update_instance_status(first.id, InstanceStatus::Completed)
            .await
            .unwrap();
        assert!(
            store
                .create_workflow_instance(&wf, entity_id, &actor)
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn continuations_lifecycle() {
        let (store, wf, actor) = setup();
        let instance = store
            .create_workflow_instance(&wf, EntityId::new(), &actor)
            .await
            .unwrap();
        let action_id = ActionId::new();
        let now = Utc::now();
        let later = now + Duration::hours(1);

        store
            .schedule_action(instance.id, action_id, later)
            .await
            .unwrap();
        assert_eq!(
            store
                .get_scheduled_action_time(instance.id, action_id)
                .await
                .unwrap(),
            Some(later)
        );
        assert!(store.has_scheduled_actions(instance.id).await.unwrap());
        assert!(store.get_due_continuations(now).await.unwrap().is_empty());
        assert_eq!(store.get_due_continuations(later).await.unwrap().len(), 1);

        store
            .delete_scheduled_action(instance.id, action_id)
            .await
            .unwrap();
        assert!(!store.has_scheduled_actions(instance.id).await.unwrap());
        store
            .delete_scheduled_action(instance.id, action_id)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn scheduling_for_unknown_instance_fails() {
        let store = MemoryWorkflowStore::new();
        let result = store
            .schedule_action(WorkflowInstanceId::new(), ActionId::new(), Utc::now())
            .await;
        assert!(matches!(result, Err(DataMapperError::NotFound { .. })));
    }

    #[tokio::test]
    async fn periodic_claims_are_once_per_key() {
        let (store, wf, _) = setup();
        let entity_id = EntityId::new();
        assert!(
            store
                .claim_periodic_run(wf.id, entity_id, "2026-10-16")
                .await
                .unwrap()
        );
        assert!(
            !store
                .claim_periodic_run(wf.id, entity_id, "2026-10-16")
                .await
                .unwrap()
        );
        assert!(
            store
                .claim_periodic_run(wf.id, entity_id, "2026-10-17")
                .await
                .unwrap()
        );

        store
            .release_periodic_run(wf.id, entity_id, "2026-10-16")
            .await
            .unwrap();
        assert!(
            store
                .claim_periodic_run(wf.id, entity_id, "2026-10-16")
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn injected_failures_run_out() {
        let (store, wf, actor) = setup();
        store.fail_next("create_workflow_instance", 1);
        let entity_id = EntityId::new();
        let first = store.create_workflow_instance(&wf, entity_id, &actor).await;
        assert!(matches!(first, Err(DataMapperError::Storage { .. })));
        assert!(store.create_workflow_instance(&wf, entity_id, &actor).await.is_ok());
    }

    #[tokio::test]
    async fn outage_fails_every_call() {
        let (store, wf, _) = setup();
        store.set_unavailable(true);
        let result = store.get_workflow(wf.account_id, wf.id).await;
        assert!(matches!(result, Err(DataMapperError::Storage { .. })));
    }
}
