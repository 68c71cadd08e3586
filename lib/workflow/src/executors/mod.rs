//! Built-in action executors.

mod approval;
mod assign;
mod check_condition;
mod create_entity;
mod send_email;
mod start_workflow;
mod stop_workflow;
mod update_field;
mod wait_condition;
mod webhook;

pub use approval::ApprovalExecutor;
pub use assign::AssignExecutor;
pub use check_condition::CheckConditionExecutor;
pub use create_entity::CreateEntityExecutor;
pub use send_email::SendEmailExecutor;
pub use start_workflow::StartWorkflowExecutor;
pub use stop_workflow::StopWorkflowExecutor;
pub use update_field::UpdateFieldExecutor;
pub use wait_condition::{WaitConditionExecutor, WaitUnit, resume_at};
pub use webhook::WebhookExecutor;

use crate::action::ActionKind;
use crate::conditions::ConditionEvaluator;
use crate::executor::ActionExecutorRegistry;
use crate::merge::MergeFields;
use crate::outbound::{MailSender, WebhookSender};
use keel_entity::{EntityStore, QueryIndex};
use std::sync::Arc;

/// Collaborators the built-in executors need.
#[derive(Clone)]
pub struct BuiltinServices {
    pub entities: Arc<dyn EntityStore>,
    pub index: Arc<dyn QueryIndex>,
    pub merge: MergeFields,
    /// Without a mail sender `send_email` stays unregistered.
    pub mail: Option<Arc<dyn MailSender>>,
    /// Without a webhook sender `webhook` stays unregistered.
    pub webhooks: Option<Arc<dyn WebhookSender>>,
}

impl ActionExecutorRegistry {
    /// Registry with every built-in executor whose collaborators are present.
    #[must_use]
    pub fn with_builtins(services: &BuiltinServices) -> Self {
        let BuiltinServices {
            entities,
            index,
            merge,
            mail,
            webhooks,
        } = services.clone();

        let mut registry = Self::new();
        registry
            .register(
                ActionKind::UpdateField,
                Arc::new(UpdateFieldExecutor::new(entities.clone(), merge.clone())),
            )
            .register(
                ActionKind::CheckCondition,
                Arc::new(CheckConditionExecutor::new(ConditionEvaluator::new(
                    index.clone(),
                ))),
            )
            .register(
                ActionKind::CreateEntity,
                Arc::new(CreateEntityExecutor::new(entities.clone(), merge.clone())),
            )
            .register(
                ActionKind::Assign,
                Arc::new(AssignExecutor::new(entities.clone(), index, merge.clone())),
            )
            .register(ActionKind::StartWorkflow, Arc::new(StartWorkflowExecutor))
            .register(ActionKind::StopWorkflow, Arc::new(StopWorkflowExecutor))
            .register(
                ActionKind::Approval,
                Arc::new(ApprovalExecutor::new(entities.clone(), merge.clone())),
            )
            .register(ActionKind::WaitCondition, Arc::new(WaitConditionExecutor));

        if let Some(mail) = mail {
            registry.register(
                ActionKind::SendEmail,
                Arc::new(SendEmailExecutor::new(mail, entities, merge.clone())),
            );
        }
        if let Some(webhooks) = webhooks {
            registry.register(
                ActionKind::Webhook,
                Arc::new(WebhookExecutor::new(webhooks, merge)),
            );
        }
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ActionError;
    use crate::testing::services;

    #[test]
    fn builtins_register_every_kind_with_collaborators() {
        let (_, services) = services();
        let registry = ActionExecutorRegistry::with_builtins(&services);
        assert_eq!(registry.kinds().count(), ActionKind::ALL.len());
    }

    #[test]
    fn missing_collaborators_leave_kinds_unimplemented() {
        let (_, mut services) = services();
        services.mail = None;
        services.webhooks = None;
        let registry = ActionExecutorRegistry::with_builtins(&services);

        for kind in [ActionKind::SendEmail, ActionKind::Webhook] {
            assert_eq!(
                registry.resolve(kind.as_str()).err(),
                Some(ActionError::NotImplemented { kind })
            );
        }
        assert!(registry.resolve("update_field").is_ok());
    }
}
