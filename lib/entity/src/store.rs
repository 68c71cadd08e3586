//! Storage traits for entities.

use crate::actor::Actor;
use crate::definition::EntityDefinition;
use crate::entity::Entity;
use crate::error::EntityError;
use crate::query::{EntityQuery, QueryResults};
use async_trait::async_trait;
use keel_core::{AccountId, EntityId};

/// Load and save access to entities.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Loads an entity by type and ID within an account.
    async fn get(
        &self,
        obj_type: &str,
        id: EntityId,
        account_id: AccountId,
    ) -> Result<Entity, EntityError>;

    /// Persists an entity, assigning an ID on first save.
    ///
    /// Change tracking is left untouched so that workflows triggered by this
    /// save can still see which fields changed.
    async fn save(&self, entity: &mut Entity, actor: &Actor) -> Result<EntityId, EntityError>;

    /// Returns the definition of an object type.
    async fn get_definition(&self, obj_type: &str) -> Result<EntityDefinition, EntityError>;
}

/// Filtering access to entities.
#[async_trait]
pub trait QueryIndex: Send + Sync {
    /// Runs a query against the current persisted state.
    async fn execute_query(&self, query: &EntityQuery) -> Result<QueryResults, EntityError>;
}
