//! Approval workflow definitions: triggers and step chains
//!
//! A workflow is long-lived configuration owned by administrators. It is
//! bound to one entity kind and fires when *all* of its triggers match
//! the submitted field changes. Steps execute in `step_number` order
//! unless a step is marked parallel.

use crate::{RoleId, StepId, UserId, WorkflowId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Field-name to value snapshot of an entity, before or after a mutation
pub type FieldValues = serde_json::Map<String, Value>;

/// The closed set of business entities guarded by approval policies
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Invoice,
    Payment,
    Budget,
    Contract,
    ServiceCost,
    Asset,
    CostCenter,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Invoice => "invoice",
            Self::Payment => "payment",
            Self::Budget => "budget",
            Self::Contract => "contract",
            Self::ServiceCost => "service_cost",
            Self::Asset => "asset",
            Self::CostCenter => "cost_center",
        };
        write!(f, "{}", s)
    }
}

/// A reference to one guarded entity instance
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub id: String,
    pub name: String,
}

impl EntityRef {
    pub fn new(kind: EntityKind, id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
            name: name.into(),
        }
    }
}

/// What class of condition a trigger expresses
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    /// Absolute comparison against a field of the new values
    AmountThreshold,
    /// Percent delta between old and new value of a field
    PercentageChange,
    /// Match on the acting user's role
    UserRole,
    /// General comparison against any entity field
    EntityField,
    /// Match on when the mutation happens (e.g. after hours)
    TimeBased,
}

/// Comparison operator for a trigger predicate
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerOp {
    Gt,
    Gte,
    Lt,
    Lte,
    Eq,
    Neq,
    Contains,
    Between,
}

/// A single predicate over entity field changes.
///
/// Stateless; evaluated against old/new value snapshots. All triggers in
/// a workflow's set must match for the workflow to fire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ApprovalTrigger {
    pub id: String,
    pub kind: TriggerKind,
    /// The field read from the new values (falling back to old values)
    pub field: String,
    pub op: TriggerOp,
    pub value: Value,
    /// Upper bound for `Between`; unused by other operators
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary_value: Option<Value>,
    pub description: String,
}

impl ApprovalTrigger {
    pub fn new(kind: TriggerKind, field: impl Into<String>, op: TriggerOp, value: Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            field: field.into(),
            op,
            value,
            secondary_value: None,
            description: String::new(),
        }
    }

    /// Shorthand for the common amount-threshold trigger
    pub fn amount_threshold(field: impl Into<String>, op: TriggerOp, value: f64) -> Self {
        Self::new(TriggerKind::AmountThreshold, field, op, Value::from(value))
    }

    pub fn with_secondary(mut self, value: Value) -> Self {
        self.secondary_value = Some(value);
        self
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = desc.into();
        self
    }
}

/// One stage of an approval chain.
///
/// A step is resolved when `required_approvals` distinct eligible
/// approvers have approved it, or when its skip / auto-approve
/// conditions match, or when any approver rejects it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ApprovalStep {
    pub id: StepId,
    /// 1-based position in the chain; defines execution order
    pub step_number: u32,
    pub name: String,
    pub description: String,
    /// Roles whose members may approve this step
    pub approver_roles: Vec<RoleId>,
    /// Users who may approve this step regardless of role
    pub approver_users: Vec<UserId>,
    /// Distinct approvals needed before the step resolves
    pub required_approvals: u32,
    /// Parallel steps may be approved before earlier steps resolve
    pub is_parallel: bool,
    /// Soft deadline for the step, in hours
    pub time_limit_hours: i64,
    /// Who an overdue step is handed to
    pub escalation_users: Vec<UserId>,
    /// Hours of inactivity before the step escalates; 0 disables
    pub escalate_after_hours: i64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skip_conditions: Vec<ApprovalTrigger>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub auto_approve_conditions: Vec<ApprovalTrigger>,
}

impl ApprovalStep {
    pub fn new(step_number: u32, name: impl Into<String>) -> Self {
        Self {
            id: StepId::generate(),
            step_number,
            name: name.into(),
            description: String::new(),
            approver_roles: Vec::new(),
            approver_users: Vec::new(),
            required_approvals: 1,
            is_parallel: false,
            time_limit_hours: 24,
            escalation_users: Vec::new(),
            escalate_after_hours: 0,
            skip_conditions: Vec::new(),
            auto_approve_conditions: Vec::new(),
        }
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = desc.into();
        self
    }

    pub fn with_approver_role(mut self, role: RoleId) -> Self {
        self.approver_roles.push(role);
        self
    }

    pub fn with_approver_user(mut self, user: UserId) -> Self {
        self.approver_users.push(user);
        self
    }

    pub fn with_required_approvals(mut self, count: u32) -> Self {
        self.required_approvals = count;
        self
    }

    pub fn parallel(mut self) -> Self {
        self.is_parallel = true;
        self
    }

    pub fn with_time_limit_hours(mut self, hours: i64) -> Self {
        self.time_limit_hours = hours;
        self
    }

    pub fn with_escalation(mut self, users: Vec<UserId>, after_hours: i64) -> Self {
        self.escalation_users = users;
        self.escalate_after_hours = after_hours;
        self
    }

    pub fn with_skip_condition(mut self, trigger: ApprovalTrigger) -> Self {
        self.skip_conditions.push(trigger);
        self
    }

    pub fn with_auto_approve_condition(mut self, trigger: ApprovalTrigger) -> Self {
        self.auto_approve_conditions.push(trigger);
        self
    }
}

/// A named approval policy bound to one entity kind.
///
/// Read-mostly configuration shared by the trigger evaluator and the
/// engine. Inactive workflows never fire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ApprovalWorkflow {
    pub id: WorkflowId,
    pub name: String,
    pub description: String,
    pub entity_kind: EntityKind,
    /// All must match for the workflow to fire; empty always matches
    pub triggers: Vec<ApprovalTrigger>,
    /// Ordered by `step_number`, contiguous from 1
    pub steps: Vec<ApprovalStep>,
    pub is_active: bool,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ApprovalWorkflow {
    pub fn new(name: impl Into<String>, entity_kind: EntityKind, created_by: UserId) -> Self {
        let now = Utc::now();
        Self {
            id: WorkflowId::generate(),
            name: name.into(),
            description: String::new(),
            entity_kind,
            triggers: Vec::new(),
            steps: Vec::new(),
            is_active: true,
            created_by,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = desc.into();
        self
    }

    pub fn with_trigger(mut self, trigger: ApprovalTrigger) -> Self {
        self.triggers.push(trigger);
        self
    }

    pub fn with_step(mut self, step: ApprovalStep) -> Self {
        self.steps.push(step);
        self
    }

    /// Look up a step by its 1-based number
    pub fn step(&self, step_number: u32) -> Option<&ApprovalStep> {
        self.steps.iter().find(|s| s.step_number == step_number)
    }

    pub fn step_count(&self) -> u32 {
        self.steps.len() as u32
    }
}
