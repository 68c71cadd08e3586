//! Postgres workflow data mapper.

use super::{decode_error, parse_id, parse_json};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use keel_core::{AccountId, ActionId, EntityId, WorkflowId, WorkflowInstanceId};
use keel_entity::{Actor, Where};
use keel_workflow::{
    ActionNode, Cadence, DataMapperError, EventKind, InstanceStatus, ScheduledContinuation,
    WorkflowDataMapper, WorkflowDefinition, WorkflowInstance,
};
use serde_json::{Map, Value};
use sqlx::{FromRow, PgPool};
use tracing::debug;

fn map_err(e: sqlx::Error) -> DataMapperError {
    match e {
        sqlx::Error::Decode(_) | sqlx::Error::ColumnDecode { .. } => DataMapperError::Corrupt {
            reason: e.to_string(),
        },
        sqlx::Error::Database(db) if db.is_unique_violation() => DataMapperError::Conflict {
            reason: db.message().to_string(),
        },
        other => DataMapperError::Storage {
            reason: other.to_string(),
        },
    }
}

fn not_found(kind: &'static str, id: impl ToString) -> DataMapperError {
    DataMapperError::NotFound {
        kind,
        id: id.to_string(),
    }
}

const WORKFLOW_COLUMNS: &str = "id, account_id, owner_id, name, obj_type, active, on_create, \
     on_update, on_delete, periodic, singleton, only_on_conditions_unmet, conditions, last_run";

const ACTION_COLUMNS: &str =
    "id, workflow_id, account_id, parent_id, name, type_name, params, sort_order";

const INSTANCE_COLUMNS: &str =
    "id, workflow_id, entity_id, account_id, user_id, status, singleton, created_at";

/// Row type for workflow queries.
#[derive(FromRow)]
struct WorkflowRow {
    id: String,
    account_id: String,
    owner_id: String,
    name: String,
    obj_type: String,
    active: bool,
    on_create: bool,
    on_update: bool,
    on_delete: bool,
    periodic: Option<String>,
    singleton: bool,
    only_on_conditions_unmet: bool,
    conditions: Value,
    last_run: Option<DateTime<Utc>>,
}

impl WorkflowRow {
    fn try_into_record(self) -> Result<WorkflowDefinition, sqlx::Error> {
        let periodic = self
            .periodic
            .map(|raw| {
                Cadence::from_str_value(&raw)
                    .ok_or_else(|| decode_error("cadence", &raw, "unknown cadence"))
            })
            .transpose()?;
        let conditions: Vec<Where> = parse_json("workflow conditions", self.conditions)?;

        Ok(WorkflowDefinition {
            id: parse_id("workflow id", &self.id)?,
            account_id: parse_id("account id", &self.account_id)?,
            owner_id: parse_id("user id", &self.owner_id)?,
            name: self.name,
            obj_type: self.obj_type,
            active: self.active,
            on_create: self.on_create,
            on_update: self.on_update,
            on_delete: self.on_delete,
            periodic,
            singleton: self.singleton,
            only_on_conditions_unmet: self.only_on_conditions_unmet,
            conditions,
            last_run: self.last_run,
        })
    }
}

/// Row type for action queries.
#[derive(FromRow)]
struct ActionRow {
    id: String,
    workflow_id: String,
    account_id: String,
    parent_id: Option<String>,
    name: String,
    type_name: String,
    params: Value,
    sort_order: i32,
}

impl ActionRow {
    fn try_into_record(self) -> Result<ActionNode, sqlx::Error> {
        let parent_id = self
            .parent_id
            .map(|raw| parse_id("parent action id", &raw))
            .transpose()?;
        let params: Map<String, Value> = parse_json("action params", self.params)?;

        Ok(ActionNode {
            id: parse_id("action id", &self.id)?,
            workflow_id: parse_id("workflow id", &self.workflow_id)?,
            account_id: parse_id("account id", &self.account_id)?,
            parent_id,
            name: self.name,
            type_name: self.type_name,
            params,
            sort_order: self.sort_order,
        })
    }
}

/// Row type for instance queries.
#[derive(FromRow)]
struct InstanceRow {
    id: String,
    workflow_id: String,
    entity_id: String,
    account_id: String,
    user_id: String,
    status: String,
    singleton: bool,
    created_at: DateTime<Utc>,
}

impl InstanceRow {
    fn try_into_record(self) -> Result<WorkflowInstance, sqlx::Error> {
        let status = InstanceStatus::from_str_value(&self.status)
            .ok_or_else(|| decode_error("instance status", &self.status, "unknown status"))?;

        Ok(WorkflowInstance {
            id: parse_id("instance id", &self.id)?,
            workflow_id: parse_id("workflow id", &self.workflow_id)?,
            entity_id: parse_id("entity id", &self.entity_id)?,
            account_id: parse_id("account id", &self.account_id)?,
            user_id: parse_id("user id", &self.user_id)?,
            status,
            singleton: self.singleton,
            created_at: self.created_at,
        })
    }
}

/// Row type for continuation queries.
#[derive(FromRow)]
struct ContinuationRow {
    instance_id: String,
    action_id: String,
    resume_at: DateTime<Utc>,
}

impl ContinuationRow {
    fn try_into_record(self) -> Result<ScheduledContinuation, sqlx::Error> {
        Ok(ScheduledContinuation {
            instance_id: parse_id("instance id", &self.instance_id)?,
            action_id: parse_id("action id", &self.action_id)?,
            resume_at: self.resume_at,
        })
    }
}

fn workflows(rows: Vec<WorkflowRow>) -> Result<Vec<WorkflowDefinition>, DataMapperError> {
    rows.into_iter()
        .map(|r| r.try_into_record().map_err(map_err))
        .collect()
}

fn actions(rows: Vec<ActionRow>) -> Result<Vec<ActionNode>, DataMapperError> {
    rows.into_iter()
        .map(|r| r.try_into_record().map_err(map_err))
        .collect()
}

/// Workflow definitions and execution state in Postgres.
///
/// Singleton exclusivity is enforced by a partial unique index, and periodic
/// dedup markers by the primary key of `workflow_periodic_runs`.
#[derive(Clone)]
pub struct PgWorkflowStore {
    pool: PgPool,
}

impl PgWorkflowStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WorkflowDataMapper for PgWorkflowStore {
    async fn get_active_workflows_for_event(
        &self,
        obj_type: &str,
        account_id: AccountId,
        event: EventKind,
    ) -> Result<Vec<WorkflowDefinition>, DataMapperError> {
        let rows: Vec<WorkflowRow> = sqlx::query_as(&format!(
            r#"
            SELECT {WORKFLOW_COLUMNS}
            FROM workflows
            WHERE obj_type = $1
              AND account_id = $2
              AND active
              AND CASE $3
                    WHEN 'create' THEN on_create
                    WHEN 'update' THEN on_update
                    WHEN 'delete' THEN on_delete
                    ELSE periodic IS NOT NULL
                  END
            ORDER BY id
            "#
        ))
        .bind(obj_type)
        .bind(account_id.to_string())
        .bind(event.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(map_err)?;

        workflows(rows)
    }

    async fn get_active_periodic_workflows(
        &self,
    ) -> Result<Vec<WorkflowDefinition>, DataMapperError> {
        let rows: Vec<WorkflowRow> = sqlx::query_as(&format!(
            r#"
            SELECT {WORKFLOW_COLUMNS}
            FROM workflows
            WHERE active AND periodic IS NOT NULL
            ORDER BY id
            "#
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(map_err)?;

        workflows(rows)
    }

    async fn get_workflow(
        &self,
        account_id: AccountId,
        workflow_id: WorkflowId,
    ) -> Result<WorkflowDefinition, DataMapperError> {
        let row: Option<WorkflowRow> = sqlx::query_as(&format!(
            r#"
            SELECT {WORKFLOW_COLUMNS}
            FROM workflows
            WHERE id = $1 AND account_id = $2
            "#
        ))
        .bind(workflow_id.to_string())
        .bind(account_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_err)?;

        match row {
            Some(r) => r.try_into_record().map_err(map_err),
            None => Err(not_found("workflow", workflow_id)),
        }
    }

    async fn get_actions(
        &self,
        account_id: AccountId,
        workflow_id: WorkflowId,
        parent: Option<ActionId>,
    ) -> Result<Vec<ActionNode>, DataMapperError> {
        let rows: Vec<ActionRow> = sqlx::query_as(&format!(
            r#"
            SELECT {ACTION_COLUMNS}
            FROM workflow_actions
            WHERE account_id = $1
              AND workflow_id = $2
              AND parent_id IS NOT DISTINCT FROM $3
            ORDER BY sort_order, id
            "#
        ))
        .bind(account_id.to_string())
        .bind(workflow_id.to_string())
        .bind(parent.map(|id| id.to_string()))
        .fetch_all(&self.pool)
        .await
        .map_err(map_err)?;

        actions(rows)
    }

    async fn get_workflow_actions(
        &self,
        account_id: AccountId,
        workflow_id: WorkflowId,
    ) -> Result<Vec<ActionNode>, DataMapperError> {
        let rows: Vec<ActionRow> = sqlx::query_as(&format!(
            r#"
            SELECT {ACTION_COLUMNS}
            FROM workflow_actions
            WHERE account_id = $1 AND workflow_id = $2
            "#
        ))
        .bind(account_id.to_string())
        .bind(workflow_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(map_err)?;

        actions(rows)
    }

    async fn get_action(
        &self,
        account_id: AccountId,
        action_id: ActionId,
    ) -> Result<ActionNode, DataMapperError> {
        let row: Option<ActionRow> = sqlx::query_as(&format!(
            r#"
            SELECT {ACTION_COLUMNS}
            FROM workflow_actions
            WHERE id = $1 AND account_id = $2
            "#
        ))
        .bind(action_id.to_string())
        .bind(account_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_err)?;

        match row {
            Some(r) => r.try_into_record().map_err(map_err),
            None => Err(not_found("action", action_id)),
        }
    }

    async fn create_workflow_instance(
        &self,
        workflow: &WorkflowDefinition,
        entity_id: EntityId,
        actor: &Actor,
    ) -> Result<WorkflowInstance, DataMapperError> {
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

        sqlx::query(
            r#"
            INSERT INTO workflow_instances
                (id, workflow_id, entity_id, account_id, user_id, status, singleton, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(instance.id.to_string())
        .bind(instance.workflow_id.to_string())
        .bind(instance.entity_id.to_string())
        .bind(instance.account_id.to_string())
        .bind(instance.user_id.to_string())
        .bind(instance.status.as_str())
        .bind(instance.singleton)
        .bind(instance.created_at)
        .execute(&self.pool)
        .await
        .map_err(map_err)?;

        Ok(instance)
    }

    async fn get_instances_for_entity(
        &self,
        workflow_id: WorkflowId,
        entity_id: EntityId,
    ) -> Result<Vec<WorkflowInstance>, DataMapperError> {
        let rows: Vec<InstanceRow> = sqlx::query_as(&format!(
            r#"
            SELECT {INSTANCE_COLUMNS}
            FROM workflow_instances
            WHERE workflow_id = $1 AND entity_id = $2
            ORDER BY created_at
            "#
        ))
        .bind(workflow_id.to_string())
        .bind(entity_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(map_err)?;

        rows.into_iter()
            .map(|r| r.try_into_record().map_err(map_err))
            .collect()
    }

    async fn get_workflow_instance(
        &self,
        instance_id: WorkflowInstanceId,
    ) -> Result<WorkflowInstance, DataMapperError> {
        let row: Option<InstanceRow> = sqlx::query_as(&format!(
            r#"
            SELECT {INSTANCE_COLUMNS}
            FROM workflow_instances
            WHERE id = $1
            "#
        ))
        .bind(instance_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_err)?;

        match row {
            Some(r) => r.try_into_record().map_err(map_err),
            None => Err(not_found("workflow instance", instance_id)),
        }
    }

    async fn update_instance_status(
        &self,
        instance_id: WorkflowInstanceId,
        status: InstanceStatus,
    ) -> Result<(), DataMapperError> {
        let result = sqlx::query(
            r#"
            UPDATE workflow_instances
            SET status = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(instance_id.to_string())
        .bind(status.as_str())
        .execute(&self.pool)
        .await
        .map_err(map_err)?;

        if result.rows_affected() == 0 {
            return Err(not_found("workflow instance", instance_id));
        }
        debug!(instance_id = %instance_id, status = %status, "instance status updated");
        Ok(())
    }

    async fn schedule_action(
        &self,
        instance_id: WorkflowInstanceId,
        action_id: ActionId,
        resume_at: DateTime<Utc>,
    ) -> Result<(), DataMapperError> {
        let result = sqlx::query(
            r#"
            INSERT INTO workflow_scheduled_actions (instance_id, action_id, resume_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (instance_id, action_id) DO UPDATE
            SET resume_at = EXCLUDED.resume_at
            "#,
        )
        .bind(instance_id.to_string())
        .bind(action_id.to_string())
        .bind(resume_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_foreign_key_violation() => {
                Err(not_found("workflow instance", instance_id))
            }
            Err(e) => Err(map_err(e)),
        }
    }

    async fn get_scheduled_action_time(
        &self,
        instance_id: WorkflowInstanceId,
        action_id: ActionId,
    ) -> Result<Option<DateTime<Utc>>, DataMapperError> {
        sqlx::query_scalar(
            r#"
            SELECT resume_at
            FROM workflow_scheduled_actions
            WHERE instance_id = $1 AND action_id = $2
            "#,
        )
        .bind(instance_id.to_string())
        .bind(action_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_err)
    }

    async fn delete_scheduled_action(
        &self,
        instance_id: WorkflowInstanceId,
        action_id: ActionId,
    ) -> Result<(), DataMapperError> {
        sqlx::query(
            r#"
            DELETE FROM workflow_scheduled_actions
            WHERE instance_id = $1 AND action_id = $2
            "#,
        )
        .bind(instance_id.to_string())
        .bind(action_id.to_string())
        .execute(&self.pool)
        .await
        .map_err(map_err)?;

        Ok(())
    }

    async fn get_due_continuations(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ScheduledContinuation>, DataMapperError> {
        let rows: Vec<ContinuationRow> = sqlx::query_as(
            r#"
            SELECT instance_id, action_id, resume_at
            FROM workflow_scheduled_actions
            WHERE resume_at <= $1
            ORDER BY resume_at, instance_id, action_id
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(map_err)?;

        rows.into_iter()
            .map(|r| r.try_into_record().map_err(map_err))
            .collect()
    }

    async fn has_scheduled_actions(
        &self,
        instance_id: WorkflowInstanceId,
    ) -> Result<bool, DataMapperError> {
        sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM workflow_scheduled_actions WHERE instance_id = $1
            )
            "#,
        )
        .bind(instance_id.to_string())
        .fetch_one(&self.pool)
        .await
        .map_err(map_err)
    }

    async fn claim_periodic_run(
        &self,
        workflow_id: WorkflowId,
        entity_id: EntityId,
        period_key: &str,
    ) -> Result<bool, DataMapperError> {
        let result = sqlx::query(
            r#"
            INSERT INTO workflow_periodic_runs (workflow_id, entity_id, period_key)
            VALUES ($1, $2, $3)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(workflow_id.to_string())
        .bind(entity_id.to_string())
        .bind(period_key)
        .execute(&self.pool)
        .await
        .map_err(map_err)?;

        Ok(result.rows_affected() == 1)
    }

    async fn release_periodic_run(
        &self,
        workflow_id: WorkflowId,
        entity_id: EntityId,
        period_key: &str,
    ) -> Result<(), DataMapperError> {
        sqlx::query(
            r#"
            DELETE FROM workflow_periodic_runs
            WHERE workflow_id = $1 AND entity_id = $2 AND period_key = $3
            "#,
        )
        .bind(workflow_id.to_string())
        .bind(entity_id.to_string())
        .bind(period_key)
        .execute(&self.pool)
        .await
        .map_err(map_err)?;
        Ok(())
    }

    async fn mark_workflow_run(
        &self,
        workflow_id: WorkflowId,
        at: DateTime<Utc>,
    ) -> Result<(), DataMapperError> {
        let result = sqlx::query("UPDATE workflows SET last_run = $2 WHERE id = $1")
            .bind(workflow_id.to_string())
            .bind(at)
            .execute(&self.pool)
            .await
            .map_err(map_err)?;

        if result.rows_affected() == 0 {
            return Err(not_found("workflow", workflow_id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::UserId;
    use serde_json::json;

    fn workflow_row(periodic: Option<&str>) -> WorkflowRow {
        WorkflowRow {
            id: WorkflowId::new().to_string(),
            account_id: AccountId::new().to_string(),
            owner_id: UserId::new().to_string(),
            name: "escalate".to_string(),
            obj_type: "task".to_string(),
            active: true,
            on_create: false,
            on_update: true,
            on_delete: false,
            periodic: periodic.map(str::to_string),
            singleton: true,
            only_on_conditions_unmet: false,
            conditions: json!([{"field": "done", "operator": "equals", "value": true}]),
            last_run: None,
        }
    }

    #[test]
    fn workflow_row_decodes() {
        let workflow = workflow_row(Some("daily")).try_into_record().unwrap();
        assert_eq!(workflow.periodic, Some(Cadence::Daily));
        assert_eq!(workflow.conditions.len(), 1);
        assert!(workflow.triggers_on(EventKind::Update));
    }

    #[test]
    fn unknown_cadence_is_corrupt() {
        let err = workflow_row(Some("fortnightly")).try_into_record().unwrap_err();
        assert!(matches!(map_err(err), DataMapperError::Corrupt { .. }));
    }

    #[test]
    fn action_row_decodes_parent_and_params() {
        let parent = ActionId::new();
        let row = ActionRow {
            id: ActionId::new().to_string(),
            workflow_id: WorkflowId::new().to_string(),
            account_id: AccountId::new().to_string(),
            parent_id: Some(parent.to_string()),
            name: "notify".to_string(),
            type_name: "webhook".to_string(),
            params: json!({"url": "https://hooks.example.com"}),
            sort_order: 2,
        };
        let action = row.try_into_record().unwrap();
        assert_eq!(action.parent_id, Some(parent));
        assert_eq!(action.param_str("url"), Some("https://hooks.example.com"));
    }

    #[test]
    fn instance_row_rejects_unknown_status() {
        let row = InstanceRow {
            id: WorkflowInstanceId::new().to_string(),
            workflow_id: WorkflowId::new().to_string(),
            entity_id: EntityId::new().to_string(),
            account_id: AccountId::new().to_string(),
            user_id: UserId::new().to_string(),
            status: "paused".to_string(),
            singleton: false,
            created_at: Utc::now(),
        };
        assert!(row.try_into_record().is_err());
    }
}
