//! Approval requests: one workflow execution per entity mutation
//!
//! A request is opened by the engine when a workflow fires. Its step
//! approvals are pre-created atomically with the request, one per
//! workflow step, so the chain's shape is fixed for the request's
//! lifetime. Only the engine mutates a request; terminal states are
//! immutable thereafter.

use crate::{
    ApprovalWorkflow, EntityRef, EscalationId, FieldValues, RequestId, StepId, UserId, WorkflowId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Overall status of an approval request.
///
/// `Escalated` is not terminal — it annotates a pending request with at
/// least one unresolved escalation and reverts to `Pending` when the
/// escalation is acknowledged or the stalled step resolves.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Approved,
    Rejected,
    Cancelled,
    Escalated,
}

impl RequestStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Approved | Self::Rejected | Self::Cancelled)
    }

    /// Open requests are those still awaiting resolution
    pub fn is_open(&self) -> bool {
        !self.is_terminal()
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
            Self::Escalated => "escalated",
        };
        write!(f, "{}", s)
    }
}

/// Urgency of a request, for approver work queues
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

/// Status of one step within a request
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Approved,
    Rejected,
    Skipped,
}

impl StepStatus {
    pub fn is_resolved(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// Per-step approval record, pre-created when the request opens
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StepApproval {
    pub step_id: StepId,
    pub step_number: u32,
    pub status: StepStatus,
    /// Distinct approvers recorded so far; the step resolves once this
    /// reaches the step's `required_approvals`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub approved_by: Vec<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    /// Minutes from the step becoming actionable to its resolution
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_to_approve_minutes: Option<i64>,
}

impl StepApproval {
    pub fn pending(step_id: StepId, step_number: u32) -> Self {
        Self {
            step_id,
            step_number,
            status: StepStatus::Pending,
            approved_by: Vec::new(),
            approved_at: None,
            comment: None,
            time_to_approve_minutes: None,
        }
    }
}

/// A comment left on a request during review
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ApprovalComment {
    pub id: String,
    pub user_id: UserId,
    pub user_name: String,
    pub comment: String,
    pub timestamp: DateTime<Utc>,
    /// Internal comments are hidden from the requester
    pub is_internal: bool,
}

impl ApprovalComment {
    pub fn new(user_id: UserId, comment: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id,
            user_name: String::new(),
            comment: comment.into(),
            timestamp: Utc::now(),
            is_internal: false,
        }
    }

    pub fn internal(mut self) -> Self {
        self.is_internal = true;
        self
    }

    pub fn with_user_name(mut self, name: impl Into<String>) -> Self {
        self.user_name = name.into();
        self
    }
}

/// Record of one escalation of an overdue step
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ApprovalEscalation {
    pub id: EscalationId,
    pub step_number: u32,
    pub escalated_to: Vec<UserId>,
    pub escalated_at: DateTime<Utc>,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
}

impl ApprovalEscalation {
    pub fn open(
        step_number: u32,
        escalated_to: Vec<UserId>,
        at: DateTime<Utc>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            id: EscalationId::generate(),
            step_number,
            escalated_to,
            escalated_at: at,
            reason: reason.into(),
            resolved_at: None,
            resolution: None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved_at.is_some()
    }
}

/// One execution of an approval workflow against one entity mutation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: RequestId,
    pub workflow_id: WorkflowId,
    pub entity: EntityRef,
    pub requested_by: UserId,
    pub requested_at: DateTime<Utc>,
    /// Lowest-numbered pending step, or `total_steps + 1` once fully
    /// approved
    pub current_step: u32,
    /// When `current_step` became current; escalation timers run from
    /// here
    pub step_entered_at: DateTime<Utc>,
    pub status: RequestStatus,
    pub priority: Priority,
    pub description: String,
    pub changes_summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_values: Option<FieldValues>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_values: Option<FieldValues>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub comments: Vec<ApprovalComment>,
    pub step_approvals: Vec<StepApproval>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub escalations: Vec<ApprovalEscalation>,
    pub due_date: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub total_steps: u32,
}

impl ApprovalRequest {
    /// Open a request against a workflow. Step approvals are created
    /// here, atomically with the request, one per workflow step.
    pub fn open(
        workflow: &ApprovalWorkflow,
        entity: EntityRef,
        requested_by: UserId,
        due_date: DateTime<Utc>,
    ) -> Self {
        let now = Utc::now();
        let step_approvals = workflow
            .steps
            .iter()
            .map(|s| StepApproval::pending(s.id.clone(), s.step_number))
            .collect();

        Self {
            id: RequestId::generate(),
            workflow_id: workflow.id.clone(),
            entity,
            requested_by,
            requested_at: now,
            current_step: 1,
            step_entered_at: now,
            status: RequestStatus::Pending,
            priority: Priority::default(),
            description: String::new(),
            changes_summary: String::new(),
            old_values: None,
            new_values: None,
            attachments: Vec::new(),
            comments: Vec::new(),
            step_approvals,
            escalations: Vec::new(),
            due_date,
            completed_at: None,
            total_steps: workflow.step_count(),
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = desc.into();
        self
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.changes_summary = summary.into();
        self
    }

    pub fn with_values(mut self, old: Option<FieldValues>, new: Option<FieldValues>) -> Self {
        self.old_values = old;
        self.new_values = new;
        self
    }

    pub fn with_attachments(mut self, attachments: Vec<String>) -> Self {
        self.attachments = attachments;
        self
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn step_approval(&self, step_number: u32) -> Option<&StepApproval> {
        self.step_approvals
            .iter()
            .find(|s| s.step_number == step_number)
    }

    pub fn step_approval_mut(&mut self, step_number: u32) -> Option<&mut StepApproval> {
        self.step_approvals
            .iter_mut()
            .find(|s| s.step_number == step_number)
    }

    /// The lowest-numbered step still pending, if any
    pub fn lowest_pending_step(&self) -> Option<u32> {
        self.step_approvals
            .iter()
            .filter(|s| s.status == StepStatus::Pending)
            .map(|s| s.step_number)
            .min()
    }

    pub fn all_steps_resolved(&self) -> bool {
        self.step_approvals.iter().all(|s| s.status.is_resolved())
    }

    pub fn any_step_rejected(&self) -> bool {
        self.step_approvals
            .iter()
            .any(|s| s.status == StepStatus::Rejected)
    }

    /// Whether the given step has an escalation that nobody has
    /// acknowledged or resolved yet
    pub fn has_unresolved_escalation(&self, step_number: u32) -> bool {
        self.escalations
            .iter()
            .any(|e| e.step_number == step_number && !e.is_resolved())
    }

    pub fn unresolved_escalation_count(&self) -> usize {
        self.escalations.iter().filter(|e| !e.is_resolved()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ApprovalStep, EntityKind};

    fn two_step_workflow() -> ApprovalWorkflow {
        ApprovalWorkflow::new("Two Step", EntityKind::Invoice, UserId::new("admin"))
            .with_step(ApprovalStep::new(1, "Review"))
            .with_step(ApprovalStep::new(2, "Sign-off"))
    }

    #[test]
    fn test_open_precreates_step_approvals() {
        let wf = two_step_workflow();
        let request = ApprovalRequest::open(
            &wf,
            EntityRef::new(EntityKind::Invoice, "inv-1", "Invoice"),
            UserId::new("u1"),
            Utc::now() + chrono::Duration::days(7),
        );

        assert_eq!(request.step_approvals.len() as u32, wf.step_count());
        assert_eq!(request.current_step, 1);
        assert_eq!(request.status, RequestStatus::Pending);
        assert!(request
            .step_approvals
            .iter()
            .all(|s| s.status == StepStatus::Pending));
    }

    #[test]
    fn test_lowest_pending_step() {
        let wf = two_step_workflow();
        let mut request = ApprovalRequest::open(
            &wf,
            EntityRef::new(EntityKind::Invoice, "inv-1", "Invoice"),
            UserId::new("u1"),
            Utc::now(),
        );

        assert_eq!(request.lowest_pending_step(), Some(1));

        request.step_approval_mut(1).unwrap().status = StepStatus::Approved;
        assert_eq!(request.lowest_pending_step(), Some(2));

        request.step_approval_mut(2).unwrap().status = StepStatus::Skipped;
        assert_eq!(request.lowest_pending_step(), None);
        assert!(request.all_steps_resolved());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(RequestStatus::Approved.is_terminal());
        assert!(RequestStatus::Rejected.is_terminal());
        assert!(RequestStatus::Cancelled.is_terminal());
        assert!(!RequestStatus::Pending.is_terminal());
        assert!(!RequestStatus::Escalated.is_terminal());
        assert!(RequestStatus::Escalated.is_open());
    }

    #[test]
    fn test_escalation_lifecycle() {
        let mut esc = ApprovalEscalation::open(
            1,
            vec![UserId::new("mgr")],
            Utc::now(),
            "Step overdue by 2 hours",
        );
        assert!(!esc.is_resolved());

        esc.resolved_at = Some(Utc::now());
        esc.resolution = Some("Step approved".into());
        assert!(esc.is_resolved());
    }
}
