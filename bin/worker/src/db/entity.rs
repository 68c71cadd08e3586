//! Postgres entity store and query index.

use super::{parse_id, parse_json};
use async_trait::async_trait;
use keel_core::{AccountId, EntityId};
use keel_entity::{
    Actor, Entity, EntityDefinition, EntityError, EntityQuery, EntityStore, Field, QueryIndex,
    QueryResults,
};
use serde_json::{Map, Value};
use sqlx::{FromRow, PgPool};
use tracing::trace;

fn storage(e: sqlx::Error) -> EntityError {
    EntityError::Storage {
        reason: e.to_string(),
    }
}

/// Row type for entity queries.
#[derive(FromRow)]
struct EntityRow {
    id: String,
    obj_type: String,
    account_id: String,
    archived: bool,
    field_values: Value,
}

impl EntityRow {
    fn try_into_entity(self) -> Result<Entity, sqlx::Error> {
        let id: EntityId = parse_id("entity id", &self.id)?;
        let account_id: AccountId = parse_id("account id", &self.account_id)?;
        let values: Map<String, Value> = parse_json("entity values", self.field_values)?;
        Ok(Entity::from_storage(
            id,
            self.obj_type,
            account_id,
            values,
            self.archived,
        ))
    }
}

/// Row type for definition lookups.
#[derive(FromRow)]
struct DefinitionRow {
    obj_type: String,
    fields: Value,
}

/// Entities stored as one JSONB field bag per row.
#[derive(Clone)]
pub struct PgEntityStore {
    pool: PgPool,
}

impl PgEntityStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EntityStore for PgEntityStore {
    async fn get(
        &self,
        obj_type: &str,
        id: EntityId,
        account_id: AccountId,
    ) -> Result<Entity, EntityError> {
        let row: Option<EntityRow> = sqlx::query_as(
            r#"
            SELECT id, obj_type, account_id, archived, field_values
            FROM entities
            WHERE id = $1 AND obj_type = $2 AND account_id = $3
            "#,
        )
        .bind(id.to_string())
        .bind(obj_type)
        .bind(account_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?;

        match row {
            Some(r) => r.try_into_entity().map_err(storage),
            None => Err(EntityError::NotFound {
                obj_type: obj_type.to_string(),
                id,
            }),
        }
    }

    async fn save(&self, entity: &mut Entity, actor: &Actor) -> Result<EntityId, EntityError> {
        if entity.account_id != actor.account_id {
            return Err(EntityError::Storage {
                reason: format!(
                    "actor in {} cannot save entity owned by {}",
                    actor.account_id, entity.account_id
                ),
            });
        }
        let id = *entity.id.get_or_insert_with(EntityId::new);

        sqlx::query(
            r#"
            INSERT INTO entities (id, obj_type, account_id, archived, field_values, updated_by)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE
            SET archived = EXCLUDED.archived,
                field_values = EXCLUDED.field_values,
                updated_by = EXCLUDED.updated_by,
                updated_at = NOW()
            "#,
        )
        .bind(id.to_string())
        .bind(&entity.obj_type)
        .bind(entity.account_id.to_string())
        .bind(entity.archived)
        .bind(Value::Object(entity.values().clone()))
        .bind(actor.user_id.to_string())
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        trace!(entity_id = %id, obj_type = %entity.obj_type, "entity saved");
        Ok(id)
    }

    async fn get_definition(&self, obj_type: &str) -> Result<EntityDefinition, EntityError> {
        let row: Option<DefinitionRow> = sqlx::query_as(
            r#"
            SELECT obj_type, fields
            FROM entity_definitions
            WHERE obj_type = $1
            "#,
        )
        .bind(obj_type)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?;

        let Some(row) = row else {
            return Err(EntityError::UnknownObjectType {
                obj_type: obj_type.to_string(),
            });
        };
        let fields: Vec<Field> = parse_json("entity fields", row.fields).map_err(storage)?;
        Ok(EntityDefinition {
            obj_type: row.obj_type,
            fields,
        })
    }
}

#[async_trait]
impl QueryIndex for PgEntityStore {
    /// Narrows by type, account, archive state and entity in SQL, then applies
    /// the field conditions with the same loose comparisons the in-memory
    /// index uses.
    async fn execute_query(&self, query: &EntityQuery) -> Result<QueryResults, EntityError> {
        let rows: Vec<EntityRow> = sqlx::query_as(
            r#"
            SELECT id, obj_type, account_id, archived, field_values
            FROM entities
            WHERE obj_type = $1
              AND account_id = $2
              AND ($3 OR NOT archived)
              AND ($4::TEXT IS NULL OR id = $4)
            ORDER BY id
            "#,
        )
        .bind(&query.obj_type)
        .bind(query.account_id.to_string())
        .bind(query.include_archived)
        .bind(query.entity_id.map(|id| id.to_string()))
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        let mut matched = Vec::new();
        for row in rows {
            let entity = row.try_into_entity().map_err(storage)?;
            if query.matches(&entity) {
                matched.push(entity);
            }
        }
        let total_count = matched.len();
        if let Some(limit) = query.limit {
            matched.truncate(limit);
        }
        Ok(QueryResults {
            total_count,
            entities: matched,
        })
    }
}
