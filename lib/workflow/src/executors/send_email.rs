use crate::action::{ActionKind, ActionNode};
use crate::executor::{ActionError, ActionExecutor, ActionOutcome};
use crate::merge::MergeFields;
use crate::outbound::{MailSender, OutgoingMail};
use async_trait::async_trait;
use keel_core::EntityId;
use keel_entity::{Actor, Entity, EntityError, EntityStore};
use std::sync::Arc;
use tracing::info;

const TEMPLATE_TYPE: &str = "email_template";

/// Sends an email about the entity.
///
/// Params: `to`, `cc`, `bcc` (comma separated, merge fields allowed, e.g.
/// `<%owner_id.email%>`), optional `from`, and either `subject` + `body` or a
/// `template_id` naming an `email_template` entity.
pub struct SendEmailExecutor {
    mail: Arc<dyn MailSender>,
    entities: Arc<dyn EntityStore>,
    merge: MergeFields,
}

impl SendEmailExecutor {
    #[must_use]
    pub fn new(mail: Arc<dyn MailSender>, entities: Arc<dyn EntityStore>, merge: MergeFields) -> Self {
        Self {
            mail,
            entities,
            merge,
        }
    }

    async fn recipients(
        &self,
        action: &ActionNode,
        key: &str,
        entity: &Entity,
    ) -> Result<Vec<String>, EntityError> {
        let Some(raw) = action.param_str(key) else {
            return Ok(Vec::new());
        };
        let rendered = self.merge.render(raw, entity).await?;
        Ok(rendered
            .split([',', ';'])
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect())
    }

    async fn subject_and_body(
        &self,
        action: &ActionNode,
        entity: &Entity,
    ) -> Result<(String, String), ActionError> {
        let kind = ActionKind::SendEmail;
        let Some(template_id) = action.param_str("template_id") else {
            return Ok((
                action.param_str("subject").unwrap_or_default().to_string(),
                action.param_str("body").unwrap_or_default().to_string(),
            ));
        };
        let template_id: EntityId = template_id
            .parse()
            .map_err(|e| ActionError::invalid(kind, format!("bad template_id: {e}")))?;
        let template = match self
            .entities
            .get(TEMPLATE_TYPE, template_id, entity.account_id)
            .await
        {
            Ok(template) => template,
            Err(EntityError::NotFound { .. }) => {
                return Err(ActionError::invalid(
                    kind,
                    format!("email template {template_id} not found"),
                ));
            }
            Err(e) => return Err(e.into()),
        };
        Ok((template.value_text("subject"), template.value_text("body")))
    }
}

#[async_trait]
impl ActionExecutor for SendEmailExecutor {
    async fn execute(
        &self,
        action: &ActionNode,
        entity: &mut Entity,
        _actor: &Actor,
    ) -> Result<ActionOutcome, ActionError> {
        let to = self.recipients(action, "to", entity).await?;
        if to.is_empty() {
            return Err(ActionError::invalid(ActionKind::SendEmail, "no recipients"));
        }
        let (subject, body) = self.subject_and_body(action, entity).await?;

        let from = match action.param_str("from") {
            Some(from) => Some(self.merge.render(from, entity).await?),
            None => None,
        };
        let mail = OutgoingMail {
            from,
            to,
            cc: self.recipients(action, "cc", entity).await?,
            bcc: self.recipients(action, "bcc", entity).await?,
            subject: self.merge.render(&subject, entity).await?,
            body: self.merge.render(&body, entity).await?,
        };

        self.mail
            .send(&mail)
            .await
            .map_err(|e| ActionError::Transport {
                reason: e.to_string(),
            })?;
        info!(to = ?mail.to, subject = %mail.subject, "workflow email sent");
        Ok(ActionOutcome::Succeeded)
    }
}
