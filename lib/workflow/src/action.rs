//! Action nodes and the per-workflow action forest.

use crate::definition::WorkflowDefinition;
use crate::error::ForestError;
use keel_core::{AccountId, ActionId, WorkflowId};
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;

/// The closed set of action types the engine knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    UpdateField,
    CheckCondition,
    SendEmail,
    CreateEntity,
    Assign,
    StartWorkflow,
    StopWorkflow,
    Approval,
    Webhook,
    WaitCondition,
}

impl ActionKind {
    pub const ALL: [Self; 10] = [
        Self::UpdateField,
        Self::CheckCondition,
        Self::SendEmail,
        Self::CreateEntity,
        Self::Assign,
        Self::StartWorkflow,
        Self::StopWorkflow,
        Self::Approval,
        Self::Webhook,
        Self::WaitCondition,
    ];

    /// Stored type name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UpdateField => "update_field",
            Self::CheckCondition => "check_condition",
            Self::SendEmail => "send_email",
            Self::CreateEntity => "create_entity",
            Self::Assign => "assign",
            Self::StartWorkflow => "start_workflow",
            Self::StopWorkflow => "stop_workflow",
            Self::Approval => "approval",
            Self::Webhook => "webhook",
            Self::WaitCondition => "wait_condition",
        }
    }

    /// Parses a stored type name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == name)
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One node in a workflow's action forest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionNode {
    pub id: ActionId,
    pub workflow_id: WorkflowId,
    pub account_id: AccountId,
    /// `None` for root actions.
    pub parent_id: Option<ActionId>,
    pub name: String,
    /// Stored type name; resolved through the executor registry.
    pub type_name: String,
    /// Type-specific parameters.
    pub params: Map<String, Value>,
    /// Position among siblings, ascending.
    pub sort_order: i32,
}

impl ActionNode {
    /// Creates a root action of a known kind for a workflow.
    #[must_use]
    pub fn new(workflow: &WorkflowDefinition, kind: ActionKind) -> Self {
        Self::with_type_name(workflow, kind.as_str())
    }

    /// Creates a root action with an arbitrary stored type name.
    #[must_use]
    pub fn with_type_name(workflow: &WorkflowDefinition, type_name: impl Into<String>) -> Self {
        let type_name = type_name.into();
        Self {
            id: ActionId::new(),
            workflow_id: workflow.id,
            account_id: workflow.account_id,
            parent_id: None,
            name: type_name.clone(),
            type_name,
            params: Map::new(),
            sort_order: 0,
        }
    }

    #[must_use]
    pub fn child_of(mut self, parent: ActionId) -> Self {
        self.parent_id = Some(parent);
        self
    }

    #[must_use]
    pub fn with_param(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }

    #[must_use]
    pub fn with_order(mut self, sort_order: i32) -> Self {
        self.sort_order = sort_order;
        self
    }

    /// Returns a parameter.
    #[must_use]
    pub fn param(&self, key: &str) -> Option<&Value> {
        self.params.get(key)
    }

    /// Returns a non-empty string parameter. Numbers are not coerced.
    #[must_use]
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// A workflow's actions, loaded once and indexed by ID.
///
/// Children are kept per parent in sibling order (`sort_order`, then ID, which
/// is creation order).
#[derive(Debug, Clone)]
pub struct ActionForest {
    workflow_id: WorkflowId,
    nodes: HashMap<ActionId, ActionNode>,
    roots: Vec<ActionId>,
    children: HashMap<ActionId, Vec<ActionId>>,
}

impl ActionForest {
    /// Builds the forest for one workflow.
    ///
    /// # Errors
    ///
    /// Returns an error if an action belongs to another workflow, IDs repeat, a
    /// parent is missing, or parent links form a cycle.
    pub fn build(workflow_id: WorkflowId, actions: Vec<ActionNode>) -> Result<Self, ForestError> {
        let mut nodes = HashMap::with_capacity(actions.len());
        for action in actions {
            if action.workflow_id != workflow_id {
                return Err(ForestError::ForeignAction {
                    action_id: action.id,
                    workflow_id: action.workflow_id,
                });
            }
            let id = action.id;
            if nodes.insert(id, action).is_some() {
                return Err(ForestError::DuplicateAction { action_id: id });
            }
        }

        let mut graph: DiGraph<ActionId, ()> = DiGraph::new();
        let index: HashMap<ActionId, NodeIndex> =
            nodes.keys().map(|id| (*id, graph.add_node(*id))).collect();

        let mut roots = Vec::new();
        let mut children: HashMap<ActionId, Vec<ActionId>> = HashMap::new();
        for node in nodes.values() {
            match node.parent_id {
                None => roots.push(node.id),
                Some(parent_id) => {
                    let Some(parent_index) = index.get(&parent_id) else {
                        return Err(ForestError::MissingParent {
                            action_id: node.id,
                            parent_id,
                        });
                    };
                    graph.add_edge(*parent_index, index[&node.id], ());
                    children.entry(parent_id).or_default().push(node.id);
                }
            }
        }

        if petgraph::algo::is_cyclic_directed(&graph) {
            return Err(ForestError::CycleDetected);
        }

        let sibling_key = |id: &ActionId| (nodes[id].sort_order, *id);
        roots.sort_by_key(sibling_key);
        for siblings in children.values_mut() {
            siblings.sort_by_key(sibling_key);
        }

        Ok(Self {
            workflow_id,
            nodes,
            roots,
            children,
        })
    }

    #[must_use]
    pub fn workflow_id(&self) -> WorkflowId {
        self.workflow_id
    }

    #[must_use]
    pub fn get(&self, id: ActionId) -> Option<&ActionNode> {
        self.nodes.get(&id)
    }

    /// Root actions in sibling order.
    #[must_use]
    pub fn roots(&self) -> &[ActionId] {
        &self.roots
    }

    /// Direct children of an action in sibling order.
    #[must_use]
    pub fn children(&self, id: ActionId) -> &[ActionId] {
        self.children.get(&id).map_or(&[], Vec::as_slice)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
