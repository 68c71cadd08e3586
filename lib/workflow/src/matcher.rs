//! Finds the workflows bound to an entity event.

use crate::definition::{EventKind, WorkflowDefinition};
use crate::mapper::{DataMapperError, WorkflowDataMapper};
use keel_core::AccountId;
use std::sync::Arc;
use tracing::debug;

/// Looks up active workflows for an (object type, event) pair.
#[derive(Clone)]
pub struct WorkflowMatcher {
    mapper: Arc<dyn WorkflowDataMapper>,
}

impl WorkflowMatcher {
    #[must_use]
    pub fn new(mapper: Arc<dyn WorkflowDataMapper>) -> Self {
        Self { mapper }
    }

    /// Active workflows on `obj_type` in the account with the event's trigger
    /// flag set, in storage order.
    pub async fn get_active_workflows_for_event(
        &self,
        obj_type: &str,
        account_id: AccountId,
        event: EventKind,
    ) -> Result<Vec<WorkflowDefinition>, DataMapperError> {
        let workflows = self
            .mapper
            .get_active_workflows_for_event(obj_type, account_id, event)
            .await?;
        debug!(
            obj_type,
            account_id = %account_id,
            event = %event,
            matched = workflows.len(),
            "matched workflows for event"
        );
        Ok(workflows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryWorkflowStore;
    use keel_core::UserId;

    #[tokio::test]
    async fn returns_only_bound_workflows() {
        let account = AccountId::new();
        let store = Arc::new(MemoryWorkflowStore::new());
        let on_update = WorkflowDefinition::new(account, UserId::new(), "a", "task")
            .on(EventKind::Update);
        let on_create = WorkflowDefinition::new(account, UserId::new(), "b", "task")
            .on(EventKind::Create);
        store.add_workflow(on_update.clone());
        store.add_workflow(on_create);

        let matcher = WorkflowMatcher::new(store);
        let found = matcher
            .get_active_workflows_for_event("task", account, EventKind::Update)
            .await
            .unwrap();
        assert_eq!(found, vec![on_update]);
    }
}
