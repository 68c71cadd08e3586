//! Workflow engine for keel.
//!
//! Workflows react to entity events (create, update, delete) or run on a
//! cadence. Each one filters entities with stored conditions and walks a
//! forest of actions against the entity.
//!
//! - **Definitions**: workflows, action forests and instances
//! - **Storage seam**: [`WorkflowDataMapper`] with an in-memory implementation
//! - **Executors**: one per action kind, looked up through a registry
//! - **Engine**: [`WorkflowService`] runs events, continuations and periodic passes

pub mod action;
pub mod conditions;
pub mod definition;
pub mod error;
pub mod executor;
pub mod executors;
pub mod instance;
pub mod mapper;
pub mod matcher;
pub mod memory;
pub mod merge;
pub mod outbound;
pub mod service;
pub mod singleton;

#[cfg(test)]
mod testing;

pub use action::{ActionForest, ActionKind, ActionNode};
pub use conditions::ConditionEvaluator;
pub use definition::{Cadence, EventKind, WorkflowDefinition};
pub use error::{ForestError, WorkflowError};
pub use executor::{ActionError, ActionExecutor, ActionExecutorRegistry, ActionOutcome};
pub use executors::BuiltinServices;
pub use instance::{InstanceStatus, ScheduledContinuation, WorkflowInstance};
pub use mapper::{DataMapperError, WorkflowDataMapper};
pub use matcher::WorkflowMatcher;
pub use memory::MemoryWorkflowStore;
pub use merge::MergeFields;
pub use outbound::{
    MailSender, OutgoingMail, TransportError, WebhookRequest, WebhookSender,
};
pub use service::{
    DEFAULT_MAX_LAUNCH_DEPTH, EventSummary, PeriodicSummary, ResumeSummary, SkipReason,
    StartOutcome, WalkReport, WorkflowService,
};
pub use singleton::SingletonGuard;
