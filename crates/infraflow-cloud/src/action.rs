//! Action types for cloud resource management

use crate::error::{NodeFailure, PartialApplyError};
use infraflow_core::NodeAddress;
use serde::{Deserialize, Serialize};

/// Represents a planned action for a single graph node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    /// Unique identifier for the action (e.g. "create-bucket.forms")
    pub id: String,

    /// Type of action to perform
    pub action_type: ActionType,

    /// Node the action applies to
    pub address: NodeAddress,

    /// Description of the action
    pub description: String,

    /// Actions that must succeed before this one may start
    pub depends_on: Vec<String>,

    /// Attribute-level diff against observed state
    pub changes: Vec<AttributeChange>,
}

impl Action {
    pub fn new(action_type: ActionType, address: NodeAddress) -> Self {
        let description = match action_type {
            ActionType::Create if address.is_data() => format!("read {}", address),
            ActionType::Update if address.is_data() => format!("re-read {}", address),
            ActionType::Delete if address.is_data() => format!("forget {}", address),
            ActionType::Create => format!("create {}", address),
            ActionType::Update => format!("update {} in place", address),
            ActionType::Replace => format!("replace {}", address),
            ActionType::Delete => format!("destroy {}", address),
            ActionType::NoOp => format!("{} is up to date", address),
        };
        Self {
            id: Self::id_for(action_type, &address),
            action_type,
            address,
            description,
            depends_on: Vec::new(),
            changes: Vec::new(),
        }
    }

    pub fn id_for(action_type: ActionType, address: &NodeAddress) -> String {
        format!("{}-{}", action_type, address)
    }

    /// Attributes whose change forces replacement
    pub fn replacement_reasons(&self) -> Vec<&str> {
        self.changes
            .iter()
            .filter(|c| c.forces_replacement)
            .map(|c| c.name.as_str())
            .collect()
    }
}

/// Type of action to perform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    /// Create a new resource
    Create,
    /// Update an existing resource in place
    Update,
    /// Destroy and re-create a resource
    Replace,
    /// Delete a resource
    Delete,
    /// No changes needed
    NoOp,
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionType::Create => write!(f, "create"),
            ActionType::Update => write!(f, "update"),
            ActionType::Replace => write!(f, "replace"),
            ActionType::Delete => write!(f, "delete"),
            ActionType::NoOp => write!(f, "no-op"),
        }
    }
}

/// A single attribute difference
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeChange {
    pub name: String,

    /// Value recorded in observed state
    pub before: Option<serde_json::Value>,

    /// Desired value; `None` with `unknown = false` means the attribute is removed
    pub after: Option<serde_json::Value>,

    /// Value is only known after apply
    pub unknown: bool,

    pub forces_replacement: bool,
}

/// Result of applying actions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyResult {
    /// Successfully applied actions
    pub succeeded: Vec<ActionResult>,

    /// Failed actions
    pub failed: Vec<ActionResult>,

    /// Actions not attempted because a dependency failed or apply was cancelled
    pub skipped: Vec<ActionResult>,

    /// Whether the apply was cancelled by the user
    pub cancelled: bool,

    /// Total execution time in milliseconds
    pub duration_ms: u64,
}

impl ApplyResult {
    pub fn new() -> Self {
        Self {
            succeeded: Vec::new(),
            failed: Vec::new(),
            skipped: Vec::new(),
            cancelled: false,
            duration_ms: 0,
        }
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty() && !self.cancelled
    }

    pub fn add_success(&mut self, action: &Action, message: String) {
        self.succeeded.push(ActionResult::from_action(action, true, message, None));
    }

    pub fn add_failure(&mut self, action: &Action, error: String) {
        self.failed
            .push(ActionResult::from_action(action, false, String::new(), Some(error)));
    }

    pub fn add_skipped(&mut self, action: &Action, reason: String) {
        self.skipped
            .push(ActionResult::from_action(action, false, reason, None));
    }

    /// Find the result recorded for a node, whatever its outcome
    pub fn outcome_of(&self, address: &NodeAddress) -> Option<&ActionResult> {
        self.succeeded
            .iter()
            .chain(self.failed.iter())
            .chain(self.skipped.iter())
            .find(|r| &r.address == address)
    }

    /// Turn a partially failed apply into an error
    pub fn into_result(self) -> std::result::Result<Self, PartialApplyError> {
        if self.is_success() {
            return Ok(self);
        }
        Err(PartialApplyError {
            succeeded: self.succeeded.iter().map(|r| r.address.to_string()).collect(),
            failed: self
                .failed
                .iter()
                .map(|r| NodeFailure {
                    address: r.address.to_string(),
                    action: r.action_type.to_string(),
                    error: r.error.clone().unwrap_or_default(),
                })
                .collect(),
            skipped: self.skipped.iter().map(|r| r.address.to_string()).collect(),
            cancelled: self.cancelled,
        })
    }
}

impl Default for ApplyResult {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of a single action
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResult {
    /// ID of the action
    pub action_id: String,

    /// Node the action applied to
    pub address: NodeAddress,

    pub action_type: ActionType,

    /// Whether the action succeeded
    pub success: bool,

    /// Success message, or the reason an action was skipped
    pub message: String,

    /// Error message if failed
    pub error: Option<String>,
}

impl ActionResult {
    fn from_action(action: &Action, success: bool, message: String, error: Option<String>) -> Self {
        Self {
            action_id: action.id.clone(),
            address: action.address.clone(),
            action_type: action.action_type,
            success,
            message,
            error,
        }
    }
}

/// Plan containing all actions to be applied, in execution order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    /// List of actions to perform
    pub actions: Vec<Action>,

    /// Whether the plan has any changes
    pub has_changes: bool,
}

impl Plan {
    pub fn new(actions: Vec<Action>) -> Self {
        let has_changes = actions.iter().any(|a| a.action_type != ActionType::NoOp);
        Self {
            actions,
            has_changes,
        }
    }

    pub fn empty() -> Self {
        Self {
            actions: Vec::new(),
            has_changes: false,
        }
    }

    /// Get actions by type
    pub fn actions_by_type(&self, action_type: ActionType) -> Vec<&Action> {
        self.actions
            .iter()
            .filter(|a| a.action_type == action_type)
            .collect()
    }

    /// Get the action planned for a node
    pub fn action_for(&self, address: &NodeAddress) -> Option<&Action> {
        self.actions.iter().find(|a| &a.address == address)
    }

    /// Position of a node's action in execution order
    pub fn position(&self, address: &NodeAddress) -> Option<usize> {
        self.actions.iter().position(|a| &a.address == address)
    }

    /// Summary of the plan
    pub fn summary(&self) -> PlanSummary {
        PlanSummary {
            create: self.actions_by_type(ActionType::Create).len(),
            update: self.actions_by_type(ActionType::Update).len(),
            replace: self.actions_by_type(ActionType::Replace).len(),
            delete: self.actions_by_type(ActionType::Delete).len(),
            no_change: self.actions_by_type(ActionType::NoOp).len(),
        }
    }
}

/// Summary of planned actions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanSummary {
    pub create: usize,
    pub update: usize,
    pub replace: usize,
    pub delete: usize,
    pub no_change: usize,
}

impl std::fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} to create, {} to update, {} to replace, {} to delete, {} unchanged",
            self.create, self.update, self.replace, self.delete, self.no_change
        )
    }
}
