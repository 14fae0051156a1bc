//! Workflow registry: the active set of approval policies
//!
//! Read-mostly configuration. Registration validates the step chain
//! once so the engine can assume well-formed workflows afterwards.

use crate::TriggerEvaluator;
use approval_types::{
    ApprovalError, ApprovalResult, ApprovalWorkflow, EntityKind, FieldValues, WorkflowId,
};
use parking_lot::RwLock;

/// Holds workflow definitions, indexed by entity kind
pub struct WorkflowRegistry {
    workflows: RwLock<Vec<ApprovalWorkflow>>,
    evaluator: TriggerEvaluator,
}

impl WorkflowRegistry {
    pub fn new() -> Self {
        Self {
            workflows: RwLock::new(Vec::new()),
            evaluator: TriggerEvaluator::new(),
        }
    }

    /// Register a workflow after validating its step chain
    pub fn register(&self, workflow: ApprovalWorkflow) -> ApprovalResult<()> {
        Self::validate(&workflow)?;

        let mut workflows = self.workflows.write();
        if workflows.iter().any(|w| w.id == workflow.id) {
            return Err(ApprovalError::Configuration(format!(
                "workflow '{}' already registered",
                workflow.id
            )));
        }

        tracing::info!(
            workflow_id = %workflow.id,
            entity_kind = %workflow.entity_kind,
            steps = workflow.steps.len(),
            "Workflow registered"
        );
        workflows.push(workflow);
        Ok(())
    }

    /// Replace an existing definition; bumps `updated_at`
    pub fn update(&self, mut workflow: ApprovalWorkflow) -> ApprovalResult<()> {
        Self::validate(&workflow)?;

        let mut workflows = self.workflows.write();
        let slot = workflows
            .iter_mut()
            .find(|w| w.id == workflow.id)
            .ok_or_else(|| ApprovalError::WorkflowNotFound(workflow.id.clone()))?;

        workflow.updated_at = chrono::Utc::now();
        *slot = workflow;
        Ok(())
    }

    /// Deactivate without deleting; in-flight requests keep their
    /// definition, new submissions no longer fire it
    pub fn deactivate(&self, id: &WorkflowId) -> ApprovalResult<()> {
        let mut workflows = self.workflows.write();
        let workflow = workflows
            .iter_mut()
            .find(|w| w.id == *id)
            .ok_or_else(|| ApprovalError::WorkflowNotFound(id.clone()))?;

        workflow.is_active = false;
        workflow.updated_at = chrono::Utc::now();
        Ok(())
    }

    pub fn get(&self, id: &WorkflowId) -> Option<ApprovalWorkflow> {
        self.workflows.read().iter().find(|w| w.id == *id).cloned()
    }

    /// All definitions for an entity kind, active or not
    pub fn workflows_for(&self, kind: EntityKind) -> Vec<ApprovalWorkflow> {
        self.workflows
            .read()
            .iter()
            .filter(|w| w.entity_kind == kind)
            .cloned()
            .collect()
    }

    /// Every active workflow for the kind whose triggers all match, in
    /// registration order. Multiple applicable workflows are legal; the
    /// engine opens one request per workflow.
    pub fn find_applicable(
        &self,
        kind: EntityKind,
        old: Option<&FieldValues>,
        new: Option<&FieldValues>,
    ) -> Vec<ApprovalWorkflow> {
        self.workflows
            .read()
            .iter()
            .filter(|w| w.is_active && w.entity_kind == kind)
            .filter(|w| self.evaluator.matches(&w.triggers, old, new))
            .cloned()
            .collect()
    }

    fn validate(workflow: &ApprovalWorkflow) -> ApprovalResult<()> {
        if workflow.steps.is_empty() {
            return Err(ApprovalError::Configuration(format!(
                "workflow '{}' has no steps",
                workflow.name
            )));
        }

        let mut numbers: Vec<u32> = workflow.steps.iter().map(|s| s.step_number).collect();
        numbers.sort_unstable();
        let contiguous = numbers
            .iter()
            .enumerate()
            .all(|(i, &n)| n == (i + 1) as u32);
        if !contiguous {
            return Err(ApprovalError::Configuration(format!(
                "workflow '{}' step numbers must be contiguous from 1",
                workflow.name
            )));
        }

        if let Some(step) = workflow.steps.iter().find(|s| s.required_approvals == 0) {
            return Err(ApprovalError::Configuration(format!(
                "step {} of workflow '{}' requires zero approvals",
                step.step_number, workflow.name
            )));
        }

        Ok(())
    }
}

impl Default for WorkflowRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approval_types::{ApprovalStep, ApprovalTrigger, TriggerOp, UserId};
    use serde_json::json;

    fn high_value_workflow(name: &str) -> ApprovalWorkflow {
        ApprovalWorkflow::new(name, EntityKind::Invoice, UserId::new("admin"))
            .with_trigger(ApprovalTrigger::amount_threshold(
                "amount",
                TriggerOp::Gte,
                100_000.0,
            ))
            .with_step(ApprovalStep::new(1, "Finance Manager Review"))
    }

    fn snapshot(value: serde_json::Value) -> FieldValues {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_register_and_find_applicable() {
        let registry = WorkflowRegistry::new();
        registry.register(high_value_workflow("High Value")).unwrap();

        let new = snapshot(json!({"amount": 125000}));
        let applicable = registry.find_applicable(EntityKind::Invoice, None, Some(&new));
        assert_eq!(applicable.len(), 1);

        let low = snapshot(json!({"amount": 50000}));
        assert!(registry
            .find_applicable(EntityKind::Invoice, None, Some(&low))
            .is_empty());
    }

    #[test]
    fn test_registration_order_preserved() {
        let registry = WorkflowRegistry::new();
        registry.register(high_value_workflow("First")).unwrap();
        registry.register(high_value_workflow("Second")).unwrap();

        let new = snapshot(json!({"amount": 200000}));
        let applicable = registry.find_applicable(EntityKind::Invoice, None, Some(&new));
        assert_eq!(applicable.len(), 2);
        assert_eq!(applicable[0].name, "First");
        assert_eq!(applicable[1].name, "Second");
    }

    #[test]
    fn test_inactive_workflow_never_fires() {
        let registry = WorkflowRegistry::new();
        let workflow = high_value_workflow("High Value");
        let id = workflow.id.clone();
        registry.register(workflow).unwrap();
        registry.deactivate(&id).unwrap();

        let new = snapshot(json!({"amount": 200000}));
        assert!(registry
            .find_applicable(EntityKind::Invoice, None, Some(&new))
            .is_empty());
        // Still retrievable for in-flight requests
        assert!(registry.get(&id).is_some());
    }

    #[test]
    fn test_wrong_entity_kind_does_not_fire() {
        let registry = WorkflowRegistry::new();
        registry.register(high_value_workflow("High Value")).unwrap();

        let new = snapshot(json!({"amount": 200000}));
        assert!(registry
            .find_applicable(EntityKind::Budget, None, Some(&new))
            .is_empty());
    }

    #[test]
    fn test_validation_rejects_bad_chains() {
        let registry = WorkflowRegistry::new();

        let empty = ApprovalWorkflow::new("Empty", EntityKind::Invoice, UserId::new("admin"));
        assert!(matches!(
            registry.register(empty),
            Err(ApprovalError::Configuration(_))
        ));

        let gapped = ApprovalWorkflow::new("Gapped", EntityKind::Invoice, UserId::new("admin"))
            .with_step(ApprovalStep::new(1, "Review"))
            .with_step(ApprovalStep::new(3, "Sign-off"));
        assert!(matches!(
            registry.register(gapped),
            Err(ApprovalError::Configuration(_))
        ));

        let zero_approvals =
            ApprovalWorkflow::new("Zero", EntityKind::Invoice, UserId::new("admin"))
                .with_step(ApprovalStep::new(1, "Review").with_required_approvals(0));
        assert!(matches!(
            registry.register(zero_approvals),
            Err(ApprovalError::Configuration(_))
        ));
    }

    #[test]
    fn test_update_bumps_timestamp() {
        let registry = WorkflowRegistry::new();
        let workflow = high_value_workflow("High Value");
        let id = workflow.id.clone();
        let created = workflow.updated_at;
        registry.register(workflow.clone()).unwrap();

        let mut edited = workflow;
        edited.name = "High Value v2".into();
        registry.update(edited).unwrap();

        let stored = registry.get(&id).unwrap();
        assert_eq!(stored.name, "High Value v2");
        assert!(stored.updated_at >= created);
    }
}
