//! Domain Types for HerdOps Governance
//!
//! Every mutating action on a guarded business entity flows through the
//! approval engine, and every state change leaves an audit entry. The
//! types in this crate are the shared vocabulary of that flow:
//!
//! - **AuditEntry**: the immutable record of one state-changing operation.
//!   Written once, never updated, never deleted.
//! - **ApprovalWorkflow**: a named policy bound to one entity kind — a set
//!   of trigger conditions and an ordered chain of approval steps.
//! - **ApprovalTrigger**: a single predicate over entity field changes
//!   that decides whether a workflow (or a step skip / auto-approval)
//!   applies.
//! - **ApprovalRequest**: one execution of a workflow against one entity
//!   mutation, tracking per-step approvals, comments, and escalations.
//! - **ComplianceReport / RiskAlert**: derived read models computed from
//!   the audit trail; informational, never authoritative.
//!
//! # Design Principles
//!
//! 1. The audit trail is append-only. A state transition and its audit
//!    entry commit together or not at all.
//! 2. Entity kinds and trigger fields are typed, not stringly looked up.
//! 3. Terminal request states are immutable thereafter.

#![deny(unsafe_code)]

mod audit;
mod errors;
mod ids;
mod report;
mod request;
mod workflow;

pub use audit::*;
pub use errors::*;
pub use ids::*;
pub use report::*;
pub use request::*;
pub use workflow::*;
