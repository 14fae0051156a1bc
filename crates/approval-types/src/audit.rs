//! Audit trail entries: the immutable compliance record
//!
//! One entry per state-changing operation. Entries are created once and
//! never mutated or deleted; the retention period is advisory metadata
//! for external archival, not enforced here.

use crate::{AuditEntryId, EntityKind, EntityRef, FieldValues, RequestId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// How risky a recorded action is judged to be
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        };
        write!(f, "{}", s)
    }
}

/// Outcome of the approval decision attached to an audit entry
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalOutcome {
    Pending,
    Approved,
    Rejected,
}

/// Who performed the recorded action
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Actor {
    pub id: UserId,
    pub name: String,
    pub role: String,
}

impl Actor {
    pub fn new(id: UserId) -> Self {
        Self {
            id,
            name: String::new(),
            role: String::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = role.into();
        self
    }
}

/// Where the recorded action came from
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestContext {
    pub origin_address: String,
    pub user_agent: String,
    pub session_id: String,
}

impl RequestContext {
    pub fn new(origin_address: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            origin_address: origin_address.into(),
            user_agent: String::new(),
            session_id: session_id.into(),
        }
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }
}

/// One immutable record of a state-changing operation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: AuditEntryId,
    pub timestamp: DateTime<Utc>,
    pub actor: Actor,
    /// Action verb, e.g. `CREATE_INVOICE` or `APPROVE_STEP`
    pub action: String,
    pub entity: EntityRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_values: Option<FieldValues>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_values: Option<FieldValues>,
    pub changes_summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<RequestContext>,
    pub risk_level: RiskLevel,
    pub approval_required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_outcome: Option<ApprovalOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_by: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
    /// The request this entry belongs to, when one is open
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<RequestId>,
    /// Tags marking the entry relevant to regulatory reporting
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub compliance_flags: Vec<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

impl AuditEntry {
    /// Start a new entry for an action on an entity. The ID and
    /// timestamp are fixed at construction.
    pub fn record(actor: Actor, action: impl Into<String>, entity: EntityRef) -> Self {
        Self {
            id: AuditEntryId::generate(),
            timestamp: Utc::now(),
            actor,
            action: action.into(),
            entity,
            old_values: None,
            new_values: None,
            changes_summary: String::new(),
            context: None,
            risk_level: RiskLevel::Low,
            approval_required: false,
            approval_outcome: None,
            approved_by: None,
            approved_at: None,
            rejection_reason: None,
            request_id: None,
            compliance_flags: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_values(mut self, old: Option<FieldValues>, new: Option<FieldValues>) -> Self {
        self.old_values = old;
        self.new_values = new;
        self
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.changes_summary = summary.into();
        self
    }

    pub fn with_context(mut self, context: RequestContext) -> Self {
        self.context = Some(context);
        self
    }

    pub fn with_risk_level(mut self, level: RiskLevel) -> Self {
        self.risk_level = level;
        self
    }

    pub fn approval_required(mut self, outcome: ApprovalOutcome) -> Self {
        self.approval_required = true;
        self.approval_outcome = Some(outcome);
        self
    }

    pub fn auto_approved(mut self) -> Self {
        self.approval_required = false;
        self.approval_outcome = Some(ApprovalOutcome::Approved);
        self
    }

    pub fn approved_by(mut self, user: UserId, at: DateTime<Utc>) -> Self {
        self.approved_by = Some(user);
        self.approved_at = Some(at);
        self
    }

    pub fn rejected(mut self, reason: impl Into<String>) -> Self {
        self.approval_outcome = Some(ApprovalOutcome::Rejected);
        self.rejection_reason = Some(reason.into());
        self
    }

    pub fn for_request(mut self, request_id: RequestId) -> Self {
        self.request_id = Some(request_id);
        self
    }

    pub fn with_compliance_flag(mut self, flag: impl Into<String>) -> Self {
        self.compliance_flags.push(flag.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Filters for querying the audit trail.
///
/// All filters are conjunctive; `limit`/`offset` paginate the filtered
/// result.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AuditQuery {
    pub entity_kind: Option<EntityKind>,
    pub entity_id: Option<String>,
    pub actor: Option<UserId>,
    pub action: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub risk_level: Option<RiskLevel>,
    pub approval_required: Option<bool>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl AuditQuery {
    pub fn for_entity(kind: EntityKind, id: impl Into<String>) -> Self {
        Self {
            entity_kind: Some(kind),
            entity_id: Some(id.into()),
            ..Self::default()
        }
    }

    pub fn for_actor(actor: UserId) -> Self {
        Self {
            actor: Some(actor),
            ..Self::default()
        }
    }

    pub fn since(mut self, from: DateTime<Utc>) -> Self {
        self.from = Some(from);
        self
    }

    pub fn until(mut self, to: DateTime<Utc>) -> Self {
        self.to = Some(to);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }
}

/// One page of audit query results
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditPage {
    pub entries: Vec<AuditEntry>,
    /// Total matches before pagination
    pub total: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snapshot(value: serde_json::Value) -> FieldValues {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_entry_builder() {
        let entry = AuditEntry::record(
            Actor::new(UserId::new("u1"))
                .with_name("Dr. Ahmed Hassan")
                .with_role("Finance Manager"),
            "CREATE_INVOICE",
            EntityRef::new(EntityKind::Invoice, "inv-1", "Equipment Invoice"),
        )
        .with_values(None, Some(snapshot(json!({"amount": 125000}))))
        .with_summary("Created new invoice")
        .with_risk_level(RiskLevel::Medium)
        .approval_required(ApprovalOutcome::Pending)
        .with_compliance_flag("high_amount");

        assert!(entry.approval_required);
        assert_eq!(entry.approval_outcome, Some(ApprovalOutcome::Pending));
        assert_eq!(entry.compliance_flags, vec!["high_amount"]);
        assert!(entry.old_values.is_none());
    }

    #[test]
    fn test_risk_level_ordering() {
        assert!(RiskLevel::Critical > RiskLevel::High);
        assert!(RiskLevel::Medium > RiskLevel::Low);
    }

    #[test]
    fn test_auto_approved_entry() {
        let entry = AuditEntry::record(
            Actor::new(UserId::new("u2")),
            "UPDATE_BUDGET",
            EntityRef::new(EntityKind::Budget, "b-1", "Q2 Budget"),
        )
        .auto_approved();

        assert!(!entry.approval_required);
        assert_eq!(entry.approval_outcome, Some(ApprovalOutcome::Approved));
    }
}
