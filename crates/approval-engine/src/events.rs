//! Approval events: the "notification is due" signal
//!
//! The engine decides *that* something happened; delivery (email, UI
//! banner) is external. Events are broadcast best-effort — a send with
//! no subscribers is not an error, and event delivery never gates a
//! state transition.

use approval_types::{EntityRef, EscalationId, RequestId, UserId, WorkflowId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Something the governance layer wants the outside world to hear about
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ApprovalEvent {
    /// A workflow fired and a request now awaits approval
    ApprovalRequested {
        request_id: RequestId,
        workflow_id: WorkflowId,
        entity: EntityRef,
    },

    /// No workflow applied; the mutation was auto-approved and logged
    AutoApproved { entity: EntityRef },

    StepApproved {
        request_id: RequestId,
        step_number: u32,
        approver: UserId,
    },

    StepRejected {
        request_id: RequestId,
        step_number: u32,
        approver: UserId,
    },

    /// A step's skip conditions matched; it was bypassed without
    /// human action
    StepSkipped {
        request_id: RequestId,
        step_number: u32,
    },

    /// A step's auto-approve conditions matched
    StepAutoApproved {
        request_id: RequestId,
        step_number: u32,
    },

    RequestApproved { request_id: RequestId },

    RequestRejected { request_id: RequestId },

    RequestCancelled { request_id: RequestId },

    /// An overdue step was handed to its fallback approvers
    RequestEscalated {
        request_id: RequestId,
        step_number: u32,
        escalated_to: Vec<UserId>,
    },

    EscalationAcknowledged {
        request_id: RequestId,
        escalation_id: EscalationId,
    },
}

/// An event plus when it was emitted
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ApprovalEventEnvelope {
    pub event: ApprovalEvent,
    pub emitted_at: DateTime<Utc>,
}

impl ApprovalEventEnvelope {
    pub fn new(event: ApprovalEvent) -> Self {
        Self {
            event,
            emitted_at: Utc::now(),
        }
    }
}
