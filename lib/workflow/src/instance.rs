//! Workflow instances and scheduled continuations.

use chrono::{DateTime, Utc};
use keel_core::{AccountId, ActionId, EntityId, UserId, WorkflowId, WorkflowInstanceId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a workflow instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Running,
    Completed,
    Stopped,
}

impl InstanceStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Stopped => "stopped",
        }
    }

    #[must_use]
    pub fn from_str_value(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "stopped" => Some(Self::Stopped),
            _ => None,
        }
    }

    /// Returns true if the instance will never run again.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One execution of a workflow against one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowInstance {
    pub id: WorkflowInstanceId,
    pub workflow_id: WorkflowId,
    pub entity_id: EntityId,
    pub account_id: AccountId,
    /// User the instance acts as, including on resume.
    pub user_id: UserId,
    pub status: InstanceStatus,
    /// Copied from the workflow so storage can enforce one running instance.
    pub singleton: bool,
    pub created_at: DateTime<Utc>,
}

impl WorkflowInstance {
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.status == InstanceStatus::Running
    }
}

/// A paused branch: resume the children of `action_id` for `instance_id` at
/// or after `resume_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledContinuation {
    pub instance_id: WorkflowInstanceId,
    pub action_id: ActionId,
    pub resume_at: DateTime<Utc>,
}
