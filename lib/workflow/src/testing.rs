//! Shared test doubles.

use crate::action::{ActionKind, ActionNode};
use crate::definition::WorkflowDefinition;
use crate::executors::BuiltinServices;
use crate::merge::MergeFields;
use crate::outbound::{MailSender, OutgoingMail, TransportError, WebhookRequest, WebhookSender};
use async_trait::async_trait;
use keel_core::{AccountId, UserId};
use keel_entity::{Actor, Entity, EntityDefinition, FieldType, MemoryEntityStore};
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Default)]
pub(crate) struct RecordingMailSender {
    pub sent: Mutex<Vec<OutgoingMail>>,
    pub fail: AtomicBool,
}

#[async_trait]
impl MailSender for RecordingMailSender {
    async fn send(&self, mail: &OutgoingMail) -> Result<(), TransportError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(TransportError::Unavailable {
                reason: "smtp down".to_string(),
            });
        }
        self.sent.lock().unwrap().push(mail.clone());
        Ok(())
    }
}

pub(crate) struct RecordingWebhookSender {
    pub requests: Mutex<Vec<WebhookRequest>>,
    pub status: AtomicU16,
}

impl Default for RecordingWebhookSender {
    fn default() -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            status: AtomicU16::new(200),
        }
    }
}

#[async_trait]
impl WebhookSender for RecordingWebhookSender {
    async fn send(&self, request: &WebhookRequest) -> Result<u16, TransportError> {
        self.requests.lock().unwrap().push(request.clone());
        Ok(self.status.load(Ordering::SeqCst))
    }
}

pub(crate) struct Fixture {
    pub entities: Arc<MemoryEntityStore>,
    pub mail: Arc<RecordingMailSender>,
    pub webhooks: Arc<RecordingWebhookSender>,
    pub account: AccountId,
    pub actor: Actor,
}

impl Fixture {
    /// Stores a task and returns it as loaded from storage.
    pub fn saved(&self, entity: Entity) -> Entity {
        let id = self.entities.insert(entity);
        self.entities.snapshot(id).unwrap()
    }

    pub fn task(&self) -> Entity {
        Entity::new("task", self.account)
    }

    pub fn workflow(&self) -> WorkflowDefinition {
        WorkflowDefinition::new(self.account, self.actor.user_id, "wf", "task")
    }

    /// A root action on a throwaway workflow.
    pub fn action(&self, kind: ActionKind) -> ActionNode {
        ActionNode::new(&self.workflow(), kind)
    }
}

fn user_ref() -> FieldType {
    FieldType::Object {
        subtype: "user".to_string(),
    }
}

pub(crate) fn definitions() -> Vec<EntityDefinition> {
    vec![
        EntityDefinition::new("task")
            .with_field("name", FieldType::Text)
            .with_field("done", FieldType::Bool)
            .with_field("points", FieldType::Number)
            .with_field("due", FieldType::Date)
            .with_field("owner_id", user_ref())
            .with_field(
                "members",
                FieldType::ObjectMulti {
                    subtype: "user".to_string(),
                },
            ),
        EntityDefinition::new("user")
            .with_field("name", FieldType::Text)
            .with_field("email", FieldType::Text)
            .with_field("team_id", FieldType::Text)
            .with_field("groups", FieldType::Text),
        EntityDefinition::new("email_template")
            .with_field("subject", FieldType::Text)
            .with_field("body", FieldType::Text),
        EntityDefinition::new("approval")
            .with_field("name", FieldType::Text)
            .with_field("obj_reference", FieldType::Text)
            .with_field("owner_id", user_ref())
            .with_field("requested_by", user_ref())
            .with_field("status", FieldType::Text),
    ]
}

pub(crate) fn services() -> (Fixture, BuiltinServices) {
    let entities = Arc::new(
        definitions()
            .into_iter()
            .fold(MemoryEntityStore::new(), MemoryEntityStore::with_definition),
    );
    let mail = Arc::new(RecordingMailSender::default());
    let webhooks = Arc::new(RecordingWebhookSender::default());
    let account = AccountId::new();
    let fixture = Fixture {
        entities: entities.clone(),
        mail: mail.clone(),
        webhooks: webhooks.clone(),
        account,
        actor: Actor::new(UserId::new(), account),
    };
    let services = BuiltinServices {
        entities: entities.clone(),
        index: entities.clone(),
        merge: MergeFields::new(entities, "https://app.example.com"),
        mail: Some(mail),
        webhooks: Some(webhooks),
    };
    (fixture, services)
}
