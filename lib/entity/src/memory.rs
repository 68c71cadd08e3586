//! In-memory entity store.

use crate::actor::Actor;
use crate::definition::EntityDefinition;
use crate::entity::Entity;
use crate::error::EntityError;
use crate::query::{EntityQuery, QueryResults};
use crate::store::{EntityStore, QueryIndex};
use async_trait::async_trait;
use keel_core::{AccountId, EntityId};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Default)]
struct Inner {
    // BTreeMap keeps query results in creation order.
    entities: BTreeMap<EntityId, Entity>,
    definitions: HashMap<String, EntityDefinition>,
}

/// [`EntityStore`] and [`QueryIndex`] backed by process memory.
///
/// Used by tests and by embedders that do not need persistence. The store can
/// be switched unavailable to simulate a storage outage.
#[derive(Default)]
pub struct MemoryEntityStore {
    inner: Mutex<Inner>,
    unavailable: AtomicBool,
    saves: AtomicUsize,
}

impl MemoryEntityStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an object type definition.
    #[must_use]
    pub fn with_definition(self, definition: EntityDefinition) -> Self {
        self.lock()
            .definitions
            .insert(definition.obj_type.clone(), definition);
        self
    }

    /// Inserts an entity directly, assigning an ID if it has none.
    pub fn insert(&self, mut entity: Entity) -> EntityId {
        let id = *entity.id.get_or_insert_with(EntityId::new);
        entity.reset_dirty();
        self.lock().entities.insert(id, entity);
        id
    }

    /// Returns a stored entity regardless of account.
    #[must_use]
    pub fn snapshot(&self, id: EntityId) -> Option<Entity> {
        self.lock().entities.get(&id).cloned()
    }

    /// Returns every stored entity of a type.
    #[must_use]
    pub fn all_of_type(&self, obj_type: &str) -> Vec<Entity> {
        self.lock()
            .entities
            .values()
            .filter(|e| e.obj_type == obj_type)
            .cloned()
            .collect()
    }

    /// Number of successful [`EntityStore::save`] calls.
    #[must_use]
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Makes every operation fail with [`EntityError::Storage`] while set.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_available(&self) -> Result<(), EntityError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(EntityError::Storage {
                reason: "entity store unavailable".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl EntityStore for MemoryEntityStore {
    async fn get(
        &self,
        obj_type: &str,
        id: EntityId,
        account_id: AccountId,
    ) -> Result<Entity, EntityError> {
        self.check_available()?;
        self.lock()
            .entities
            .get(&id)
            .filter(|e| e.obj_type == obj_type && e.account_id == account_id)
            .cloned()
            .ok_or_else(|| EntityError::NotFound {
                obj_type: obj_type.to_string(),
                id,
            })
    }

    async fn save(&self, entity: &mut Entity, actor: &Actor) -> Result<EntityId, EntityError> {
        self.check_available()?;
        if entity.account_id != actor.account_id {
            return Err(EntityError::Storage {
                reason: format!(
                    "actor in {} cannot save entity owned by {}",
                    actor.account_id, entity.account_id
                ),
            });
        }
        let id = *entity.id.get_or_insert_with(EntityId::new);
        let mut stored = entity.clone();
        stored.reset_dirty();
        self.lock().entities.insert(id, stored);
        self.saves.fetch_add(1, Ordering::SeqCst);
        tracing::trace!(entity_id = %id, obj_type = %entity.obj_type, "entity saved");
        Ok(id)
    }

    async fn get_definition(&self, obj_type: &str) -> Result<EntityDefinition, EntityError> {
        self.check_available()?;
        self.lock()
            .definitions
            .get(obj_type)
            .cloned()
            .ok_or_else(|| EntityError::UnknownObjectType {
                obj_type: obj_type.to_string(),
            })
    }
}

#[async_trait]
impl QueryIndex for MemoryEntityStore {
    async fn execute_query(&self, query: &EntityQuery) -> Result<QueryResults, EntityError> {
        self.check_available()?;
        let matched: Vec<Entity> = self
            .lock()
            .entities
            .values()
            .filter(|e| query.matches(e))
            .cloned()
            .collect();
        let total_count = matched.len();
        let entities = match query.limit {
            Some(limit) => matched.into_iter().take(limit).collect(),
            None => matched,
        };
        Ok(QueryResults {
            total_count,
            entities,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::FieldType;
    use keel_core::UserId;

    fn actor(account: AccountId) -> Actor {
        Actor::new(UserId::new(), account)
    }

    #[tokio::test]
    async fn save_assigns_id_and_get_round_trips() {
        let account = AccountId::new();
        let store = MemoryEntityStore::new();
        let mut task = Entity::new("task", account).with_value("name", "Write report");

        let id = store.save(&mut task, &actor(account)).await.unwrap();
        assert_eq!(task.id, Some(id));
        assert!(task.field_changed("name"), "save keeps change tracking");

        let loaded = store.get("task", id, account).await.unwrap();
        assert_eq!(loaded.value_text("name"), "Write report");
        assert!(!loaded.field_changed("name"));
        assert_eq!(store.save_count(), 1);
    }

    #[tokio::test]
    async fn get_is_scoped_to_account_and_type() {
        let account = AccountId::new();
        let store = MemoryEntityStore::new();
        let id = store.insert(Entity::new("task", account));

        assert!(matches!(
            store.get("task", id, AccountId::new()).await,
            Err(EntityError::NotFound { .. })
        ));
        assert!(matches!(
            store.get("note", id, account).await,
            Err(EntityError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn save_rejects_foreign_account() {
        let store = MemoryEntityStore::new();
        let mut task = Entity::new("task", AccountId::new());
        let result = store.save(&mut task, &actor(AccountId::new())).await;
        assert!(matches!(result, Err(EntityError::Storage { .. })));
    }

    #[tokio::test]
    async fn query_counts_before_limit() {
        let account = AccountId::new();
        let store = MemoryEntityStore::new();
        for i in 0..3 {
            store.insert(Entity::new("task", account).with_value("done", i > 0));
        }

        let mut query = EntityQuery::new("task", account);
        query.where_field("done").equals(true).limit(1);
        let results = store.execute_query(&query).await.unwrap();
        assert_eq!(results.total_count, 2);
        assert_eq!(results.entities.len(), 1);
    }

    #[tokio::test]
    async fn query_for_single_entity() {
        let account = AccountId::new();
        let store = MemoryEntityStore::new();
        let first = store.insert(Entity::new("task", account).with_value("done", true));
        store.insert(Entity::new("task", account).with_value("done", true));

        let mut query = EntityQuery::new("task", account);
        query.for_entity(first).where_field("done").equals(true);
        let results = store.execute_query(&query).await.unwrap();
        assert_eq!(results.total_count, 1);
        assert_eq!(results.entities[0].id, Some(first));
    }

    #[tokio::test]
    async fn definitions_and_outage() {
        let store = MemoryEntityStore::new()
            .with_definition(EntityDefinition::new("task").with_field("name", FieldType::Text));
        assert!(store.get_definition("task").await.is_ok());
        assert!(matches!(
            store.get_definition("note").await,
            Err(EntityError::UnknownObjectType { .. })
        ));

        store.set_unavailable(true);
        assert!(matches!(
            store.get_definition("task").await,
            Err(EntityError::Storage { .. })
        ));
        store.set_unavailable(false);
        assert!(store.get_definition("task").await.is_ok());
    }
}
