use crate::action::{ActionKind, ActionNode};
use crate::executor::{ActionError, ActionExecutor, ActionOutcome};
use crate::merge::MergeFields;
use crate::outbound::{WebhookRequest, WebhookSender};
use async_trait::async_trait;
use keel_entity::{Actor, Entity};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::info;

const METHODS: [&str; 5] = ["GET", "POST", "PUT", "PATCH", "DELETE"];

/// Calls an HTTP endpoint about the entity.
///
/// Params: `url` (merge fields allowed), `method` (default `POST`) and
/// `payload` (any JSON; strings inside are rendered). Without a payload the
/// body carries the entity's ID, type and values. Non-2xx responses fail.
pub struct WebhookExecutor {
    webhooks: Arc<dyn WebhookSender>,
    merge: MergeFields,
}

impl WebhookExecutor {
    #[must_use]
    pub fn new(webhooks: Arc<dyn WebhookSender>, merge: MergeFields) -> Self {
        Self { webhooks, merge }
    }
}

#[async_trait]
impl ActionExecutor for WebhookExecutor {
    async fn execute(
        &self,
        action: &ActionNode,
        entity: &mut Entity,
        _actor: &Actor,
    ) -> Result<ActionOutcome, ActionError> {
        let kind = ActionKind::Webhook;
        let url = action
            .param_str("url")
            .ok_or_else(|| ActionError::invalid(kind, "missing url"))?;
        let url = self.merge.render(url, entity).await?;
        let method = action
            .param_str("method")
            .unwrap_or("POST")
            .to_ascii_uppercase();
        if !METHODS.contains(&method.as_str()) {
            return Err(ActionError::invalid(kind, format!("unsupported method {method}")));
        }

        let payload = match action.param("payload") {
            Some(payload) => self.merge.render_value(payload, entity).await?,
            None => json!({
                "entity_id": entity.id.map(|id| id.to_string()),
                "obj_type": entity.obj_type,
                "workflow_id": action.workflow_id.to_string(),
                "values": Value::Object(entity.values().clone()),
            }),
        };

        let request = WebhookRequest {
            method,
            url,
            payload,
        };
        let status = self
            .webhooks
            .send(&request)
            .await
            .map_err(|e| ActionError::Transport {
                reason: e.to_string(),
            })?;
        if !(200..300).contains(&status) {
            return Err(ActionError::Transport {
                reason: format!("{} {} returned {status}", request.method, request.url),
            });
        }

        info!(url = %request.url, status, "webhook delivered");
        Ok(ActionOutcome::Succeeded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::services;
    use std::sync::atomic::Ordering;

    #[tokio::test]
    async fn posts_rendered_payload() {
        let (fx, services) = services();
        let executor = WebhookExecutor::new(fx.webhooks.clone(), services.merge);
        let mut task = fx.saved(fx.task().with_value("name", "Report"));
        let action = fx
            .action(ActionKind::Webhook)
            .with_param("url", "https://hooks.example.com/<%id%>")
            .with_param("payload", json!({"text": "<%name%> changed"}));

        executor.execute(&action, &mut task, &fx.actor).await.unwrap();

        let requests = fx.webhooks.requests.lock().unwrap();
        assert_eq!(requests[0].method, "POST");
        assert_eq!(
            requests[0].url,
            format!("https://hooks.example.com/{}", task.id.unwrap())
        );
        assert_eq!(requests[0].payload, json!({"text": "Report changed"}));
    }

    #[tokio::test]
    async fn default_payload_describes_entity() {
        let (fx, services) = services();
        let executor = WebhookExecutor::new(fx.webhooks.clone(), services.merge);
        let mut task = fx.saved(fx.task().with_value("done", true));
        let action = fx
            .action(ActionKind::Webhook)
            .with_param("url", "https://hooks.example.com")
            .with_param("method", "put");

        executor.execute(&action, &mut task, &fx.actor).await.unwrap();

        let requests = fx.webhooks.requests.lock().unwrap();
        assert_eq!(requests[0].method, "PUT");
        assert_eq!(requests[0].payload["obj_type"], "task");
        assert_eq!(requests[0].payload["values"]["done"], true);
    }

    #[tokio::test]
    async fn non_success_status_fails() {
        let (fx, services) = services();
        let executor = WebhookExecutor::new(fx.webhooks.clone(), services.merge);
        fx.webhooks.status.store(503, Ordering::SeqCst);
        let mut task = fx.saved(fx.task());
        let action = fx
            .action(ActionKind::Webhook)
            .with_param("url", "https://hooks.example.com");

        let err = executor.execute(&action, &mut task, &fx.actor).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn rejects_unknown_method() {
        let (fx, services) = services();
        let executor = WebhookExecutor::new(fx.webhooks.clone(), services.merge);
        let mut task = fx.saved(fx.task());
        let action = fx
            .action(ActionKind::Webhook)
            .with_param("url", "https://hooks.example.com")
            .with_param("method", "TRACE");

        let err = executor.execute(&action, &mut task, &fx.actor).await.unwrap_err();
        assert_eq!(err.category(), "configuration");
        assert!(fx.webhooks.requests.lock().unwrap().is_empty());
    }
}
