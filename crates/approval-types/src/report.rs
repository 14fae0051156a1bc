//! Derived read models: compliance reports and risk alerts
//!
//! Computed on demand from the audit trail and engine state. Neither is
//! authoritative data and nothing else references them.

use crate::{AlertId, EntityRef, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// What a compliance report covers
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportType {
    AuditTrail,
    ApprovalSummary,
    RiskAssessment,
    UserActivity,
}

/// The time window a report aggregates over
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReportPeriod {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl ReportPeriod {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// The trailing N days up to now
    pub fn last_days(days: i64) -> Self {
        let end = Utc::now();
        Self {
            start: end - chrono::Duration::days(days),
            end,
        }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at <= self.end
    }
}

/// Whether the data behind a report was fully available.
///
/// Reporting never aborts the engine; incomplete source queries degrade
/// to a partial report carrying a note.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "quality", content = "note")]
pub enum DataQuality {
    Complete,
    Partial(String),
}

/// Aggregated counts for one report window
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub total_entries: usize,
    pub critical_actions: usize,
    pub pending_approvals: usize,
    pub compliance_violations: usize,
    /// Mean step resolution time in minutes, over resolved steps
    pub average_approval_time_minutes: f64,
}

/// A point-in-time compliance report
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ComplianceReport {
    pub id: String,
    pub report_type: ReportType,
    pub generated_at: DateTime<Utc>,
    pub generated_by: UserId,
    pub period: ReportPeriod,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub filters: HashMap<String, String>,
    pub summary: ReportSummary,
    /// Advisory archival horizon in days; not enforced here
    pub retention_period_days: i64,
    pub data_quality: DataQuality,
}

/// What pattern a risk alert flags
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    UnusualActivity,
    FailedLogin,
    PrivilegeEscalation,
    DataAccess,
    /// An entity was mutated without a required workflow firing
    ApprovalBypass,
}

/// Severity of a risk alert
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Low,
    Medium,
    High,
    Critical,
}

/// An informational alert derived from audit-entry patterns.
///
/// Requires explicit human acknowledgment; never acted on
/// automatically.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RiskAlert {
    pub id: AlertId,
    pub kind: AlertKind,
    pub severity: AlertSeverity,
    pub user_id: UserId,
    pub user_name: String,
    pub description: String,
    pub detected_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity: Option<EntityRef>,
    /// 0-100 composite score
    pub risk_score: u32,
    pub triggers: Vec<String>,
    pub recommended_actions: Vec<String>,
    pub is_acknowledged: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acknowledged_by: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acknowledged_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub investigation_notes: Option<String>,
}

impl RiskAlert {
    pub fn new(
        kind: AlertKind,
        severity: AlertSeverity,
        user_id: UserId,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: AlertId::generate(),
            kind,
            severity,
            user_id,
            user_name: String::new(),
            description: description.into(),
            detected_at: Utc::now(),
            entity: None,
            risk_score: 0,
            triggers: Vec::new(),
            recommended_actions: Vec::new(),
            is_acknowledged: false,
            acknowledged_by: None,
            acknowledged_at: None,
            investigation_notes: None,
        }
    }

    pub fn with_entity(mut self, entity: EntityRef) -> Self {
        self.entity = Some(entity);
        self
    }

    pub fn with_score(mut self, score: u32) -> Self {
        self.risk_score = score.min(100);
        self
    }

    pub fn with_trigger(mut self, trigger: impl Into<String>) -> Self {
        self.triggers.push(trigger.into());
        self
    }

    pub fn with_recommended_action(mut self, action: impl Into<String>) -> Self {
        self.recommended_actions.push(action.into());
        self
    }

    /// Record a human acknowledgment
    pub fn acknowledge(&mut self, by: UserId, notes: Option<String>) {
        self.is_acknowledged = true;
        self.acknowledged_by = Some(by);
        self.acknowledged_at = Some(Utc::now());
        self.investigation_notes = notes;
    }
}
