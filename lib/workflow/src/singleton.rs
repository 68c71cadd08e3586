//! At-most-one running instance per entity for singleton workflows.
//!
//! The check here and the instance insert that follows are separate calls, so
//! two concurrent triggers can both pass it. Stores that enforce uniqueness
//! reject the second insert with `DataMapperError::Conflict`, which the engine
//! treats the same as a skip.

use crate::definition::WorkflowDefinition;
use crate::mapper::{DataMapperError, WorkflowDataMapper};
use keel_core::EntityId;
use std::sync::Arc;

#[derive(Clone)]
pub struct SingletonGuard {
    mapper: Arc<dyn WorkflowDataMapper>,
}

impl SingletonGuard {
    #[must_use]
    pub fn new(mapper: Arc<dyn WorkflowDataMapper>) -> Self {
        Self { mapper }
    }

    /// True only if the workflow is singleton and an instance for the entity
    /// is still running.
    pub async fn should_skip(
        &self,
        workflow: &WorkflowDefinition,
        entity_id: EntityId,
    ) -> Result<bool, DataMapperError> {
        if !workflow.singleton {
            return Ok(false);
        }
        let instances = self
            .mapper
            .get_instances_for_entity(workflow.id, entity_id)
            .await?;
        Ok(instances.iter().any(|i| i.is_running()))
    }
}
