//! Risk monitor: derives alerts from audit-entry patterns
//!
//! Detection is a pure read over the trail; the only state the monitor
//! holds is the alert list itself, so acknowledgments survive between
//! scans and repeated scans never duplicate an open alert.

use crate::ComplianceError;
use approval_types::{
    AlertId, AlertKind, AlertSeverity, AuditQuery, DataQuality, RiskAlert, UserId,
};
use approval_engine::WorkflowRegistry;
use audit_ledger::AuditStore;
use chrono::{Duration, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Compliance flag the engine stamps on denied approval attempts
const UNAUTHORIZED_FLAG: &str = "unauthorized_attempt";

/// Monitor tuning knobs
#[derive(Clone, Debug)]
pub struct RiskMonitorConfig {
    /// Denied actions by one actor within the window before an alert
    pub failure_threshold: usize,
    /// Detection window in hours
    pub window_hours: i64,
}

impl Default for RiskMonitorConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            window_hours: 24,
        }
    }
}

/// Result of one detection scan
#[derive(Clone, Debug)]
pub struct ScanOutcome {
    pub new_alerts: Vec<RiskAlert>,
    pub data_quality: DataQuality,
}

/// Derives risk alerts from the audit trail
pub struct RiskMonitor {
    audit: Arc<dyn AuditStore>,
    registry: Arc<WorkflowRegistry>,
    alerts: RwLock<Vec<RiskAlert>>,
    config: RiskMonitorConfig,
}

impl RiskMonitor {
    pub fn new(
        audit: Arc<dyn AuditStore>,
        registry: Arc<WorkflowRegistry>,
        config: RiskMonitorConfig,
    ) -> Self {
        Self {
            audit,
            registry,
            alerts: RwLock::new(Vec::new()),
            config,
        }
    }

    /// Run every detector over the trailing window. New alerts are
    /// retained for acknowledgment; patterns already covered by an
    /// unacknowledged alert are not re-raised.
    pub fn scan(&self) -> ScanOutcome {
        let since = Utc::now() - Duration::hours(self.config.window_hours);
        let query = AuditQuery::default().since(since);

        let page = match self.audit.query(&query) {
            Ok(page) => page,
            Err(error) => {
                tracing::warn!(error = %error, "Risk scan degraded: audit query failed");
                return ScanOutcome {
                    new_alerts: Vec::new(),
                    data_quality: DataQuality::Partial(format!(
                        "audit trail unavailable: {}",
                        error
                    )),
                };
            }
        };

        let mut new_alerts = Vec::new();
        new_alerts.extend(self.detect_denied_clusters(&page.entries));
        new_alerts.extend(self.detect_approval_bypass(&page.entries));

        self.alerts.write().extend(new_alerts.clone());
        ScanOutcome {
            new_alerts,
            data_quality: DataQuality::Complete,
        }
    }

    /// Flag actors with `failure_threshold`+ denied actions in the
    /// window
    fn detect_denied_clusters(&self, entries: &[approval_types::AuditEntry]) -> Vec<RiskAlert> {
        let mut denied_by_actor: HashMap<UserId, usize> = HashMap::new();
        for entry in entries {
            if entry
                .compliance_flags
                .iter()
                .any(|f| f == UNAUTHORIZED_FLAG)
            {
                *denied_by_actor.entry(entry.actor.id.clone()).or_insert(0) += 1;
            }
        }

        denied_by_actor
            .into_iter()
            .filter(|(_, count)| *count >= self.config.failure_threshold)
            .filter(|(actor, _)| !self.has_open_alert(AlertKind::UnusualActivity, actor, None))
            .map(|(actor, count)| {
                let severity = if count >= self.config.failure_threshold * 2 {
                    AlertSeverity::High
                } else {
                    AlertSeverity::Medium
                };
                RiskAlert::new(
                    AlertKind::UnusualActivity,
                    severity,
                    actor.clone(),
                    format!(
                        "{} denied actions by {} within {}h",
                        count, actor, self.config.window_hours
                    ),
                )
                .with_score((30 + 20 * count as u32).min(100))
                .with_trigger("denied_action_threshold")
                .with_recommended_action("Review the actor's recent activity")
                .with_recommended_action("Confirm role assignments with the identity system")
            })
            .collect()
    }

    /// Flag mutations recorded without approval although an active
    /// workflow's triggers match their snapshots
    fn detect_approval_bypass(&self, entries: &[approval_types::AuditEntry]) -> Vec<RiskAlert> {
        let mut seen_entities = std::collections::HashSet::new();
        entries
            .iter()
            .filter(|entry| !entry.approval_required)
            .filter(|entry| {
                !self
                    .registry
                    .find_applicable(
                        entry.entity.kind,
                        entry.old_values.as_ref(),
                        entry.new_values.as_ref(),
                    )
                    .is_empty()
            })
            .filter(|entry| {
                !self.has_open_alert(
                    AlertKind::ApprovalBypass,
                    &entry.actor.id,
                    Some(&entry.entity.id),
                )
            })
            .filter(|entry| seen_entities.insert(entry.entity.id.clone()))
            .map(|entry| {
                RiskAlert::new(
                    AlertKind::ApprovalBypass,
                    AlertSeverity::High,
                    entry.actor.id.clone(),
                    format!(
                        "{} on {} '{}' recorded without required approval",
                        entry.action, entry.entity.kind, entry.entity.name
                    ),
                )
                .with_entity(entry.entity.clone())
                .with_score(85)
                .with_trigger("approval_bypass")
                .with_recommended_action("Freeze the entity pending review")
                .with_recommended_action("Re-run the mutation through the approval engine")
            })
            .collect()
    }

    fn has_open_alert(&self, kind: AlertKind, user: &UserId, entity_id: Option<&str>) -> bool {
        self.alerts.read().iter().any(|alert| {
            alert.kind == kind
                && !alert.is_acknowledged
                && alert.user_id == *user
                && match entity_id {
                    Some(id) => alert.entity.as_ref().map(|e| e.id.as_str()) == Some(id),
                    None => true,
                }
        })
    }

    /// All alerts, acknowledged or not
    pub fn alerts(&self) -> Vec<RiskAlert> {
        self.alerts.read().clone()
    }

    pub fn unacknowledged(&self) -> Vec<RiskAlert> {
        self.alerts
            .read()
            .iter()
            .filter(|a| !a.is_acknowledged)
            .cloned()
            .collect()
    }

    /// Record a human acknowledgment of an alert
    pub fn acknowledge(
        &self,
        id: &AlertId,
        by: UserId,
        notes: Option<String>,
    ) -> Result<RiskAlert, ComplianceError> {
        let mut alerts = self.alerts.write();
        let alert = alerts
            .iter_mut()
            .find(|a| a.id == *id)
            .ok_or_else(|| ComplianceError::AlertNotFound(id.clone()))?;
        alert.acknowledge(by, notes);
        Ok(alert.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approval_types::{
        Actor, ApprovalStep, ApprovalTrigger, ApprovalWorkflow, AuditEntry, EntityKind, EntityRef,
        RiskLevel, TriggerOp,
    };
    use audit_ledger::InMemoryAuditLedger;
    use serde_json::json;

    fn fixture() -> (Arc<InMemoryAuditLedger>, Arc<WorkflowRegistry>, RiskMonitor) {
        let audit = Arc::new(InMemoryAuditLedger::new());
        let registry = Arc::new(WorkflowRegistry::new());
        let workflow = ApprovalWorkflow::new(
            "High Value Invoice",
            EntityKind::Invoice,
            UserId::new("admin"),
        )
        .with_trigger(ApprovalTrigger::amount_threshold(
            "amount",
            TriggerOp::Gte,
            100_000.0,
        ))
        .with_step(ApprovalStep::new(1, "Review").with_approver_user(UserId::new("fm-1")));
        registry.register(workflow).unwrap();

        let monitor = RiskMonitor::new(
            audit.clone(),
            registry.clone(),
            RiskMonitorConfig::default(),
        );
        (audit, registry, monitor)
    }

    fn denied_entry(actor: &str) -> AuditEntry {
        AuditEntry::record(
            Actor::new(UserId::new(actor)),
            "APPROVE_STEP_DENIED",
            EntityRef::new(EntityKind::Invoice, "inv-1", "Invoice"),
        )
        .with_risk_level(RiskLevel::High)
        .with_compliance_flag(UNAUTHORIZED_FLAG)
    }

    fn bypass_entry(entity_id: &str, amount: i64) -> AuditEntry {
        AuditEntry::record(
            Actor::new(UserId::new("u9")),
            "UPDATE_INVOICE",
            EntityRef::new(EntityKind::Invoice, entity_id, "Invoice"),
        )
        .with_values(None, json!({"amount": amount}).as_object().cloned())
    }

    #[test]
    fn test_denied_cluster_raises_alert() {
        let (audit, _registry, monitor) = fixture();
        for _ in 0..3 {
            audit.append(denied_entry("u5")).unwrap();
        }

        let outcome = monitor.scan();
        assert_eq!(outcome.data_quality, DataQuality::Complete);
        assert_eq!(outcome.new_alerts.len(), 1);
        let alert = &outcome.new_alerts[0];
        assert_eq!(alert.kind, AlertKind::UnusualActivity);
        assert_eq!(alert.user_id, UserId::new("u5"));
        assert!(alert.risk_score >= 30);

        // Re-scan does not duplicate the open alert
        assert!(monitor.scan().new_alerts.is_empty());
    }

    #[test]
    fn test_below_threshold_is_quiet() {
        let (audit, _registry, monitor) = fixture();
        audit.append(denied_entry("u5")).unwrap();
        audit.append(denied_entry("u5")).unwrap();

        assert!(monitor.scan().new_alerts.is_empty());
    }

    #[test]
    fn test_approval_bypass_detected() {
        let (audit, _registry, monitor) = fixture();
        // 125k matches the registered trigger but was recorded as not
        // requiring approval
        audit.append(bypass_entry("inv-7", 125_000)).unwrap();
        // 50k legitimately needs no approval
        audit.append(bypass_entry("inv-8", 50_000)).unwrap();

        let outcome = monitor.scan();
        assert_eq!(outcome.new_alerts.len(), 1);
        let alert = &outcome.new_alerts[0];
        assert_eq!(alert.kind, AlertKind::ApprovalBypass);
        assert_eq!(alert.entity.as_ref().unwrap().id, "inv-7");
        assert_eq!(alert.severity, AlertSeverity::High);
    }

    #[test]
    fn test_acknowledge_reopens_detection() {
        let (audit, _registry, monitor) = fixture();
        audit.append(bypass_entry("inv-7", 125_000)).unwrap();

        let alert_id = monitor.scan().new_alerts[0].id.clone();
        assert!(monitor.scan().new_alerts.is_empty());

        let acked = monitor
            .acknowledge(&alert_id, UserId::new("sec-1"), Some("reviewed".into()))
            .unwrap();
        assert!(acked.is_acknowledged);
        assert!(monitor.unacknowledged().is_empty());

        // The entry is still in the window, and with the previous alert
        // acknowledged the pattern is flagged again
        assert_eq!(monitor.scan().new_alerts.len(), 1);
    }

    #[test]
    fn test_acknowledge_unknown_alert() {
        let (_audit, _registry, monitor) = fixture();
        let result = monitor.acknowledge(&AlertId::new("missing"), UserId::new("sec-1"), None);
        assert!(matches!(result, Err(ComplianceError::AlertNotFound(_))));
    }
}
