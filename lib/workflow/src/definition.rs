//! Workflow definitions.
//!
//! A workflow binds an object type to trigger events, filters entities with
//! stored conditions, and owns a forest of actions. Definitions are authored
//! outside the engine and are read-only while it runs.

use chrono::{DateTime, Datelike, Utc};
use keel_core::{AccountId, UserId, WorkflowId};
use keel_entity::Where;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The entity event a workflow can be bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Create,
    Update,
    Delete,
    /// A time-based tick rather than an entity mutation.
    Periodic,
}

impl EventKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Periodic => "periodic",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            "periodic" => Ok(Self::Periodic),
            other => Err(format!("unknown event kind: {other}")),
        }
    }
}

/// How often a periodic workflow runs against each matching entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cadence {
    Hourly,
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl Cadence {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hourly => "hourly",
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
            Self::Yearly => "yearly",
        }
    }

    /// Parses a stored cadence name.
    #[must_use]
    pub fn from_str_value(s: &str) -> Option<Self> {
        match s {
            "hourly" => Some(Self::Hourly),
            "daily" => Some(Self::Daily),
            "weekly" => Some(Self::Weekly),
            "monthly" => Some(Self::Monthly),
            "yearly" => Some(Self::Yearly),
            _ => None,
        }
    }

    /// Key naming the period containing `at`, in UTC.
    ///
    /// Two instants share a key exactly when they fall in the same period, so
    /// the key works as a dedup marker for "already ran this period".
    #[must_use]
    pub fn period_key(&self, at: DateTime<Utc>) -> String {
        match self {
            Self::Hourly => at.format("%Y-%m-%dT%H").to_string(),
            Self::Daily => at.format("%Y-%m-%d").to_string(),
            Self::Weekly => {
                let week = at.iso_week();
                format!("{}-W{:02}", week.year(), week.week())
            }
            Self::Monthly => at.format("%Y-%m").to_string(),
            Self::Yearly => at.format("%Y").to_string(),
        }
    }
}

fn default_only_on_conditions_unmet() -> bool {
    true
}

/// A stored workflow rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub id: WorkflowId,
    pub account_id: AccountId,
    /// User that periodic runs act as.
    pub owner_id: UserId,
    pub name: String,
    /// Object type the workflow watches.
    pub obj_type: String,
    pub active: bool,
    pub on_create: bool,
    pub on_update: bool,
    pub on_delete: bool,
    /// Set for time-triggered workflows.
    pub periodic: Option<Cadence>,
    /// At most one running instance per entity.
    pub singleton: bool,
    /// On update, fire only when a field used by a condition changed in this
    /// save. Keeps a workflow from re-firing on every save once its
    /// conditions hold. On by default; ignored when there are no conditions.
    #[serde(default = "default_only_on_conditions_unmet")]
    pub only_on_conditions_unmet: bool,
    pub conditions: Vec<Where>,
    /// Last time a periodic pass ran this workflow.
    pub last_run: Option<DateTime<Utc>>,
}

impl WorkflowDefinition {
    /// Creates an active workflow with no triggers, conditions or flags.
    #[must_use]
    pub fn new(
        account_id: AccountId,
        owner_id: UserId,
        name: impl Into<String>,
        obj_type: impl Into<String>,
    ) -> Self {
        Self {
            id: WorkflowId::new(),
            account_id,
            owner_id,
            name: name.into(),
            obj_type: obj_type.into(),
            active: true,
            on_create: false,
            on_update: false,
            on_delete: false,
            periodic: None,
            singleton: false,
            only_on_conditions_unmet: true,
            conditions: Vec::new(),
            last_run: None,
        }
    }

    /// Binds the workflow to an entity event.
    #[must_use]
    pub fn on(mut self, event: EventKind) -> Self {
        match event {
            EventKind::Create => self.on_create = true,
            EventKind::Update => self.on_update = true,
            EventKind::Delete => self.on_delete = true,
            EventKind::Periodic => self.periodic = Some(self.periodic.unwrap_or(Cadence::Daily)),
        }
        self
    }

    /// Makes the workflow periodic.
    #[must_use]
    pub fn every(mut self, cadence: Cadence) -> Self {
        self.periodic = Some(cadence);
        self
    }

    #[must_use]
    pub fn with_condition(mut self, condition: Where) -> Self {
        self.conditions.push(condition);
        self
    }

    #[must_use]
    pub fn singleton(mut self) -> Self {
        self.singleton = true;
        self
    }

    /// Fires on every update whose entity meets the conditions, even if no
    /// condition field changed.
    #[must_use]
    pub fn fire_on_every_update(mut self) -> Self {
        self.only_on_conditions_unmet = false;
        self
    }

    /// Returns true if the workflow is bound to the event.
    #[must_use]
    pub fn triggers_on(&self, event: EventKind) -> bool {
        match event {
            EventKind::Create => self.on_create,
            EventKind::Update => self.on_update,
            EventKind::Delete => self.on_delete,
            EventKind::Periodic => self.periodic.is_some(),
        }
    }
}
