//! Compliance & Risk Read Models
//!
//! Stateless views over the audit trail and engine state:
//!
//! - **RiskMonitor** derives alerts from audit-entry patterns —
//!   clusters of denied actions, mutations that dodged a required
//!   workflow — and tracks their acknowledgment.
//! - **ComplianceReporter** aggregates point-in-time reports for a
//!   window and filter set.
//!
//! Neither component mutates engine state, and neither ever aborts the
//! engine: incomplete source data degrades to partial results carrying
//! a data-quality note.

#![deny(unsafe_code)]

mod report;
mod risk;

pub use report::*;
pub use risk::*;

use approval_types::AlertId;

/// Errors surfaced by the compliance layer
#[derive(Debug, thiserror::Error)]
pub enum ComplianceError {
    #[error("risk alert not found: {0}")]
    AlertNotFound(AlertId),
}
