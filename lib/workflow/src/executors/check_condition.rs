use crate::action::{ActionKind, ActionNode};
use crate::conditions::ConditionEvaluator;
use crate::executor::{ActionError, ActionExecutor, ActionOutcome};
use async_trait::async_trait;
use keel_entity::{Actor, Entity, Where};
use serde_json::Value;

/// Branches on a condition list: children run only if the entity matches.
///
/// Params: `conditions`, a list in the same shape as workflow conditions.
pub struct CheckConditionExecutor {
    evaluator: ConditionEvaluator,
}

impl CheckConditionExecutor {
    #[must_use]
    pub fn new(evaluator: ConditionEvaluator) -> Self {
        Self { evaluator }
    }
}

#[async_trait]
impl ActionExecutor for CheckConditionExecutor {
    async fn execute(
        &self,
        action: &ActionNode,
        entity: &mut Entity,
        _actor: &Actor,
    ) -> Result<ActionOutcome, ActionError> {
        let raw = action.param("conditions").cloned().unwrap_or(Value::Null);
        let conditions: Vec<Where> = match raw {
            Value::Null => Vec::new(),
            raw => serde_json::from_value(raw).map_err(|e| {
                ActionError::invalid(ActionKind::CheckCondition, format!("bad conditions: {e}"))
            })?,
        };

        if self.evaluator.check(&conditions, entity).await? {
            Ok(ActionOutcome::Succeeded)
        } else {
            Ok(ActionOutcome::Declined)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::services;
    use serde_json::json;

    #[tokio::test]
    async fn succeeds_or_declines() {
        let (fx, services) = services();
        let executor = CheckConditionExecutor::new(ConditionEvaluator::new(services.index));
        let mut task = fx.saved(fx.task().with_value("done", true));

        let matching = fx.action(ActionKind::CheckCondition).with_param(
            "conditions",
            json!([{"field": "done", "operator": "equals", "value": true}]),
        );
        let failing = fx.action(ActionKind::CheckCondition).with_param(
            "conditions",
            json!([{"field": "done", "operator": "equals", "value": false}]),
        );

        assert_eq!(
            executor.execute(&matching, &mut task, &fx.actor).await,
            Ok(ActionOutcome::Succeeded)
        );
        assert_eq!(
            executor.execute(&failing, &mut task, &fx.actor).await,
            Ok(ActionOutcome::Declined)
        );
    }

    #[tokio::test]
    async fn malformed_conditions_are_configuration_errors() {
        let (fx, services) = services();
        let executor = CheckConditionExecutor::new(ConditionEvaluator::new(services.index));
        let mut task = fx.saved(fx.task());
        let action = fx
            .action(ActionKind::CheckCondition)
            .with_param("conditions", json!([{"field": "done", "operator": "resembles"}]));

        let err = executor
            .execute(&action, &mut task, &fx.actor)
            .await
            .unwrap_err();
        assert_eq!(err.category(), "configuration");
    }
}
