//! Error taxonomy for the governance layer
//!
//! All engine errors are returned as typed results; nothing is thrown
//! past the public API boundary.

use crate::{EscalationId, RequestId, RequestStatus, UserId, WorkflowId};

/// Errors surfaced by approval operations
#[derive(Debug, thiserror::Error)]
pub enum ApprovalError {
    #[error("approval request not found: {0}")]
    RequestNotFound(RequestId),

    #[error("workflow not found: {0}")]
    WorkflowNotFound(WorkflowId),

    #[error("step {step} does not exist on request {request}")]
    StepNotFound { request: RequestId, step: u32 },

    #[error("request {request} is {status} and can no longer change")]
    InvalidState {
        request: RequestId,
        status: RequestStatus,
    },

    #[error("user {user} is not an eligible approver for step {step}")]
    Unauthorized { user: UserId, step: u32 },

    #[error("step {attempted} cannot be acted on while step {current} is pending")]
    WrongStep { attempted: u32, current: u32 },

    #[error("escalation not found: {0}")]
    EscalationNotFound(EscalationId),

    #[error("workflow configuration invalid: {0}")]
    Configuration(String),

    #[error("audit write failed: {0}")]
    AuditWrite(String),
}

/// Result type alias for approval operations
pub type ApprovalResult<T> = Result<T, ApprovalError>;
