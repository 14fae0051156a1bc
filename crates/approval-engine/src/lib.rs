//! Approval Workflow Engine
//!
//! The engine decides, for any mutating action on a guarded business
//! entity, whether approval is required, routes the action through a
//! multi-step chain of human approvers, and escalates stalled steps on
//! a timer. Every state change writes exactly one audit entry — the
//! transition and its trail record commit together or not at all.
//!
//! # Key Concepts
//!
//! - **TriggerEvaluator**: pure predicate evaluation over old/new field
//!   snapshots. Decides whether workflows fire and whether steps skip
//!   or auto-approve.
//! - **WorkflowRegistry**: the active set of workflow definitions,
//!   indexed by entity kind.
//! - **ApprovalEngine**: the request state machine. `submit` opens
//!   requests, `approve_step`/`reject_step` advance them,
//!   `cancel` aborts them.
//! - **EscalationScheduler**: periodic background scan that escalates
//!   overdue steps to their fallback approvers.
//!
//! # Concurrency
//!
//! Mutating operations are serialized per request via a per-request
//! lock; operations on different requests proceed in parallel. Role
//! resolution and event delivery happen outside the critical section.

#![deny(unsafe_code)]

mod engine;
mod escalation;
mod events;
mod registry;
mod roles;
mod trigger;

pub use engine::*;
pub use escalation::*;
pub use events::*;
pub use registry::*;
pub use roles::*;
pub use trigger::*;
