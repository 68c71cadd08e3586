use crate::action::{ActionKind, ActionNode};
use crate::executor::{ActionError, ActionExecutor, ActionOutcome};
use crate::merge::MergeFields;
use async_trait::async_trait;
use keel_entity::{Actor, Entity, EntityError, EntityStore, FieldType};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// Sets one field and saves the entity.
///
/// Params: `update_field` (field name) and `update_value` (merge fields are
/// rendered in string values). `object_multi` fields get the value appended.
pub struct UpdateFieldExecutor {
    entities: Arc<dyn EntityStore>,
    merge: MergeFields,
}

impl UpdateFieldExecutor {
    #[must_use]
    pub fn new(entities: Arc<dyn EntityStore>, merge: MergeFields) -> Self {
        Self { entities, merge }
    }
}

/// Converts form-style strings to the field's storage type where possible.
fn coerce(field_type: &FieldType, value: Value) -> Value {
    let Value::String(s) = &value else {
        return value;
    };
    let s = s.trim().to_ascii_lowercase();
    match field_type {
        FieldType::Bool => match s.as_str() {
            "t" | "true" | "1" | "yes" => Value::Bool(true),
            "f" | "false" | "0" | "no" => Value::Bool(false),
            _ => value,
        },
        FieldType::Number => {
            if let Ok(n) = s.parse::<i64>() {
                Value::from(n)
            } else if let Ok(n) = s.parse::<f64>() {
                Value::from(n)
            } else {
                value
            }
        }
        _ => value,
    }
}

#[async_trait]
impl ActionExecutor for UpdateFieldExecutor {
    async fn execute(
        &self,
        action: &ActionNode,
        entity: &mut Entity,
        actor: &Actor,
    ) -> Result<ActionOutcome, ActionError> {
        let kind = ActionKind::UpdateField;
        let field = action
            .param_str("update_field")
            .ok_or_else(|| ActionError::invalid(kind, "missing update_field"))?;
        let raw = action.param("update_value").cloned().unwrap_or(Value::Null);

        let definition = match self.entities.get_definition(&entity.obj_type).await {
            Ok(definition) => definition,
            Err(EntityError::UnknownObjectType { obj_type }) => {
                return Err(ActionError::invalid(
                    kind,
                    format!("no definition for {obj_type}"),
                ));
            }
            Err(e) => return Err(e.into()),
        };
        let field_type = definition
            .field(field)
            .map(|f| f.field_type.clone())
            .ok_or_else(|| {
                ActionError::invalid(
                    kind,
                    format!("{} has no field {field}", entity.obj_type),
                )
            })?;

        let value = self.merge.render_value(&raw, entity).await?;
        let value = coerce(&field_type, value);
        debug!(field, value = %value, "updating field");
        if field_type.is_multi() {
            entity.add_multi_value(field, value);
        } else {
            entity.set_value(field, value);
        }

        self.entities.save(entity, actor).await?;
        Ok(ActionOutcome::Succeeded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Fixture, services};
    use serde_json::json;

    fn action(fx: &Fixture, field: &str, value: Value) -> ActionNode {
        fx.action(ActionKind::UpdateField)
            .with_param("update_field", field)
            .with_param("update_value", value)
    }

    #[tokio::test]
    async fn sets_and_saves() {
        let (fx, services) = services();
        let executor = UpdateFieldExecutor::new(services.entities, services.merge);
        let mut task = fx.saved(fx.task().with_value("name", "old"));

        let outcome = executor
            .execute(&action(&fx, "name", json!("renamed <%name%>")), &mut task, &fx.actor)
            .await
            .unwrap();

        assert_eq!(outcome, ActionOutcome::Succeeded);
        assert_eq!(task.value_text("name"), "renamed old");
        let stored = fx.entities.snapshot(task.id.unwrap()).unwrap();
        assert_eq!(stored.value_text("name"), "renamed old");
    }

    #[tokio::test]
    async fn coerces_to_field_type() {
        let (fx, services) = services();
        let executor = UpdateFieldExecutor::new(services.entities, services.merge);
        let mut task = fx.saved(fx.task());

        executor
            .execute(&action(&fx, "done", json!("t")), &mut task, &fx.actor)
            .await
            .unwrap();
        executor
            .execute(&action(&fx, "points", json!("5")), &mut task, &fx.actor)
            .await
            .unwrap();
        assert_eq!(task.get_value("done"), Some(&json!(true)));
        assert_eq!(task.get_value("points"), Some(&json!(5)));
    }

    #[tokio::test]
    async fn multi_fields_append() {
        let (fx, services) = services();
        let executor = UpdateFieldExecutor::new(services.entities, services.merge);
        let mut task = fx.saved(fx.task().with_value("members", json!(["usr_a"])));

        executor
            .execute(&action(&fx, "members", json!("usr_b")), &mut task, &fx.actor)
            .await
            .unwrap();
        assert_eq!(task.get_value("members"), Some(&json!(["usr_a", "usr_b"])));
    }

    #[tokio::test]
    async fn unknown_field_is_a_configuration_error() {
        let (fx, services) = services();
        let executor = UpdateFieldExecutor::new(services.entities, services.merge);
        let mut task = fx.saved(fx.task());

        let err = executor
            .execute(&action(&fx, "colour", json!("red")), &mut task, &fx.actor)
            .await
            .unwrap_err();
        assert_eq!(err.category(), "configuration");
        assert_eq!(fx.entities.save_count(), 0);
    }

    #[tokio::test]
    async fn save_failure_is_transient() {
        let (fx, services) = services();
        let executor = UpdateFieldExecutor::new(services.entities, services.merge);
        let mut task = fx.saved(fx.task());
        fx.entities.set_unavailable(true);

        let err = executor
            .execute(&action(&fx, "name", json!("x")), &mut task, &fx.actor)
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }
}
