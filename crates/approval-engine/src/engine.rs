//! The approval request state machine
//!
//! `submit` decides whether workflows fire and opens requests;
//! `approve_step` / `reject_step` advance them; `cancel` aborts them.
//! Every mutating operation commits its state transition together with
//! its audit entry — if the trail cannot be written, the transition
//! does not happen.
//!
//! Mutations are serialized per request: each request lives behind its
//! own lock, and the transition is computed on a working copy that is
//! only written back after the audit append succeeds. Role resolution
//! and event emission stay outside the critical section.

use crate::{
    ApprovalEvent, ApprovalEventEnvelope, RoleResolver, TriggerEvaluator, WorkflowRegistry,
};
use approval_types::{
    Actor, ApprovalComment, ApprovalError, ApprovalEscalation, ApprovalOutcome, ApprovalRequest,
    ApprovalResult, ApprovalStep, ApprovalWorkflow, AuditEntry, AuditEntryId, EntityRef,
    EscalationId, FieldValues, Priority, RequestContext, RequestId, RequestStatus, RiskLevel,
    StepStatus, UserId,
};
use audit_ledger::AuditStore;
use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Engine tuning knobs
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Days until a freshly opened request is due
    pub due_window_days: i64,
    /// Buffered capacity of the event broadcast channel
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            due_window_days: 7,
            event_capacity: 256,
        }
    }
}

/// One entity mutation submitted for approval screening
#[derive(Clone, Debug)]
pub struct EntityMutation {
    pub entity: EntityRef,
    pub actor: Actor,
    /// Action verb recorded in the trail, e.g. `UPDATE_INVOICE`
    pub action: String,
    pub old_values: Option<FieldValues>,
    pub new_values: Option<FieldValues>,
    pub changes_summary: String,
    pub context: Option<RequestContext>,
    pub priority: Priority,
    pub attachments: Vec<String>,
}

impl EntityMutation {
    pub fn new(entity: EntityRef, actor: Actor, action: impl Into<String>) -> Self {
        Self {
            entity,
            actor,
            action: action.into(),
            old_values: None,
            new_values: None,
            changes_summary: String::new(),
            context: None,
            priority: Priority::default(),
            attachments: Vec::new(),
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

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_attachments(mut self, attachments: Vec<String>) -> Self {
        self.attachments = attachments;
        self
    }
}

/// What `submit` decided
#[derive(Clone, Debug)]
pub enum SubmissionOutcome {
    /// No workflow applied; the mutation was logged and may proceed
    AutoApproved { audit_entry: AuditEntryId },
    /// One request per applicable workflow now awaits approval; the
    /// caller must defer the mutation until every request resolves
    PendingApproval { requests: Vec<ApprovalRequest> },
}

impl SubmissionOutcome {
    pub fn requires_approval(&self) -> bool {
        matches!(self, Self::PendingApproval { .. })
    }

    pub fn requests(&self) -> &[ApprovalRequest] {
        match self {
            Self::PendingApproval { requests } => requests,
            Self::AutoApproved { .. } => &[],
        }
    }
}

/// Auxiliary step transitions produced while advancing a request
enum StepTransition {
    Skipped { step: u32 },
    AutoApproved { step: u32 },
}

/// The approval workflow state machine
pub struct ApprovalEngine {
    registry: Arc<WorkflowRegistry>,
    audit: Arc<dyn AuditStore>,
    roles: Arc<dyn RoleResolver>,
    evaluator: TriggerEvaluator,
    requests: RwLock<HashMap<RequestId, Arc<Mutex<ApprovalRequest>>>>,
    event_tx: broadcast::Sender<ApprovalEventEnvelope>,
    config: EngineConfig,
}

impl ApprovalEngine {
    pub fn new(
        registry: Arc<WorkflowRegistry>,
        audit: Arc<dyn AuditStore>,
        roles: Arc<dyn RoleResolver>,
    ) -> Self {
        let config = EngineConfig::default();
        let (event_tx, _) = broadcast::channel(config.event_capacity);
        Self {
            registry,
            audit,
            roles,
            evaluator: TriggerEvaluator::new(),
            requests: RwLock::new(HashMap::new()),
            event_tx,
            config,
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        let (event_tx, _) = broadcast::channel(config.event_capacity);
        self.event_tx = event_tx;
        self.config = config;
        self
    }

    /// Subscribe to approval events. Delivery is best-effort; missing
    /// a notification never blocks a state transition.
    pub fn subscribe(&self) -> broadcast::Receiver<ApprovalEventEnvelope> {
        self.event_tx.subscribe()
    }

    // ── Submission ───────────────────────────────────────────────────

    /// Screen an entity mutation against the registered workflows.
    ///
    /// When no workflow applies the mutation is auto-approved: a single
    /// audit entry is written and no request opens. Otherwise one
    /// request opens per applicable workflow and the caller must wait
    /// for all of them.
    pub fn submit(&self, mutation: EntityMutation) -> ApprovalResult<SubmissionOutcome> {
        let applicable = self.registry.find_applicable(
            mutation.entity.kind,
            mutation.old_values.as_ref(),
            mutation.new_values.as_ref(),
        );

        if applicable.is_empty() {
            let entry = AuditEntry::record(
                mutation.actor.clone(),
                mutation.action.clone(),
                mutation.entity.clone(),
            )
            .with_values(mutation.old_values.clone(), mutation.new_values.clone())
            .with_summary(mutation.changes_summary.clone())
            .with_risk_level(RiskLevel::Low)
            .auto_approved();
            let entry = match mutation.context.clone() {
                Some(context) => entry.with_context(context),
                None => entry,
            };

            let audit_entry = self.append(entry)?;
            tracing::debug!(
                entity_id = %mutation.entity.id,
                action = %mutation.action,
                "No workflow applies; auto-approved"
            );
            self.emit(ApprovalEvent::AutoApproved {
                entity: mutation.entity,
            });
            return Ok(SubmissionOutcome::AutoApproved { audit_entry });
        }

        let now = Utc::now();
        let due_date = now + Duration::days(self.config.due_window_days);
        let mut opened = Vec::with_capacity(applicable.len());

        for workflow in applicable {
            let request = ApprovalRequest::open(
                &workflow,
                mutation.entity.clone(),
                mutation.actor.id.clone(),
                due_date,
            )
            .with_priority(mutation.priority)
            .with_description(workflow.description.clone())
            .with_summary(mutation.changes_summary.clone())
            .with_values(mutation.old_values.clone(), mutation.new_values.clone())
            .with_attachments(mutation.attachments.clone());

            let entry = AuditEntry::record(
                mutation.actor.clone(),
                mutation.action.clone(),
                mutation.entity.clone(),
            )
            .with_values(mutation.old_values.clone(), mutation.new_values.clone())
            .with_summary(mutation.changes_summary.clone())
            .with_risk_level(risk_for_priority(mutation.priority))
            .approval_required(ApprovalOutcome::Pending)
            .for_request(request.id.clone());
            let entry = match mutation.context.clone() {
                Some(context) => entry.with_context(context),
                None => entry,
            };

            // Request and trail entry commit together
            self.append(entry)?;
            self.requests
                .write()
                .insert(request.id.clone(), Arc::new(Mutex::new(request.clone())));

            tracing::info!(
                request_id = %request.id,
                workflow_id = %workflow.id,
                entity_id = %request.entity.id,
                "Approval request opened"
            );
            self.emit(ApprovalEvent::ApprovalRequested {
                request_id: request.id.clone(),
                workflow_id: workflow.id.clone(),
                entity: request.entity.clone(),
            });
            opened.push(request);
        }

        Ok(SubmissionOutcome::PendingApproval { requests: opened })
    }

    // ── Step resolution ──────────────────────────────────────────────

    /// Record one approval vote on a step.
    ///
    /// Duplicate votes from the same approver are no-ops. The step
    /// resolves once `required_approvals` distinct votes are in, after
    /// which the request advances: skip and auto-approve conditions are
    /// evaluated for following steps, and the request finalizes once
    /// every step is resolved.
    pub fn approve_step(
        &self,
        request_id: &RequestId,
        step_number: u32,
        approver: &UserId,
        comment: Option<String>,
    ) -> ApprovalResult<ApprovalRequest> {
        let handle = self.handle(request_id)?;
        let (workflow, step_def) = self.step_definition(&handle, request_id, step_number)?;

        // Eligibility resolves against the identity system outside the
        // request lock.
        if !self.eligible(&step_def, approver) {
            self.record_denied_attempt(&handle, request_id, step_number, approver);
            return Err(ApprovalError::Unauthorized {
                user: approver.clone(),
                step: step_number,
            });
        }

        let now = Utc::now();
        let mut events = Vec::new();

        let committed = {
            let mut current = handle.lock();
            if current.is_terminal() {
                return Err(ApprovalError::InvalidState {
                    request: request_id.clone(),
                    status: current.status,
                });
            }
            let mut updated = current.clone();
            let approval = updated
                .step_approval(step_number)
                .ok_or(ApprovalError::StepNotFound {
                    request: request_id.clone(),
                    step: step_number,
                })?;

            match approval.status {
                StepStatus::Pending => {}
                // A vote after the step already resolved (threshold met
                // by others, skipped, or a late duplicate) changes
                // nothing.
                StepStatus::Approved | StepStatus::Skipped => return Ok(current.clone()),
                StepStatus::Rejected => {
                    return Err(ApprovalError::InvalidState {
                        request: request_id.clone(),
                        status: current.status,
                    })
                }
            }
            if approval.approved_by.contains(approver) {
                // Idempotent duplicate; no state change, no audit entry
                return Ok(current.clone());
            }
            if !step_def.is_parallel && step_number != current.current_step {
                return Err(ApprovalError::WrongStep {
                    attempted: step_number,
                    current: current.current_step,
                });
            }

            let minutes = minutes_in_step(&updated, step_number, now);
            let mut threshold_met = false;
            if let Some(approval) = updated.step_approval_mut(step_number) {
                approval.approved_by.push(approver.clone());
                if let Some(text) = &comment {
                    approval.comment = Some(text.clone());
                }
                threshold_met = approval.approved_by.len() as u32 >= step_def.required_approvals;
                if threshold_met {
                    approval.status = StepStatus::Approved;
                    approval.approved_at = Some(now);
                    approval.time_to_approve_minutes = Some(minutes);
                }
            }
            if let Some(text) = comment.clone() {
                updated
                    .comments
                    .push(ApprovalComment::new(approver.clone(), text));
            }

            let mut transitions = Vec::new();
            if threshold_met {
                resolve_step_escalations(&mut updated, step_number, now, "step approved");
                self.advance(&mut updated, &workflow, now, &mut transitions);
            }

            let entry = self
                .request_entry(&updated, Actor::new(approver.clone()), "APPROVE_STEP")
                .with_summary(format!(
                    "Step {} ({}) approved by {}",
                    step_number, step_def.name, approver
                ));
            let entry = if updated.status == RequestStatus::Approved {
                entry
                    .approval_required(ApprovalOutcome::Approved)
                    .approved_by(approver.clone(), now)
            } else {
                entry.approval_required(ApprovalOutcome::Pending)
            };
            self.append(entry)?;
            self.append_transition_entries(&updated, &transitions)?;

            events.push(ApprovalEvent::StepApproved {
                request_id: request_id.clone(),
                step_number,
                approver: approver.clone(),
            });
            for transition in &transitions {
                events.push(match transition {
                    StepTransition::Skipped { step } => ApprovalEvent::StepSkipped {
                        request_id: request_id.clone(),
                        step_number: *step,
                    },
                    StepTransition::AutoApproved { step } => ApprovalEvent::StepAutoApproved {
                        request_id: request_id.clone(),
                        step_number: *step,
                    },
                });
            }
            if updated.status == RequestStatus::Approved {
                events.push(ApprovalEvent::RequestApproved {
                    request_id: request_id.clone(),
                });
            }

            *current = updated.clone();
            updated
        };

        for event in events {
            self.emit(event);
        }
        Ok(committed)
    }

    /// Reject a step. Rejection at any step is terminal for the whole
    /// request; earlier approvals are kept for the record, later steps
    /// never execute.
    pub fn reject_step(
        &self,
        request_id: &RequestId,
        step_number: u32,
        approver: &UserId,
        reason: impl Into<String>,
    ) -> ApprovalResult<ApprovalRequest> {
        let reason = reason.into();
        let handle = self.handle(request_id)?;
        let (_, step_def) = self.step_definition(&handle, request_id, step_number)?;

        if !self.eligible(&step_def, approver) {
            self.record_denied_attempt(&handle, request_id, step_number, approver);
            return Err(ApprovalError::Unauthorized {
                user: approver.clone(),
                step: step_number,
            });
        }

        let now = Utc::now();
        let committed = {
            let mut current = handle.lock();
            if current.is_terminal() {
                return Err(ApprovalError::InvalidState {
                    request: request_id.clone(),
                    status: current.status,
                });
            }
            let mut updated = current.clone();
            let status = updated
                .step_approval(step_number)
                .ok_or(ApprovalError::StepNotFound {
                    request: request_id.clone(),
                    step: step_number,
                })?
                .status;
            if status.is_resolved() {
                return Err(ApprovalError::InvalidState {
                    request: request_id.clone(),
                    status: current.status,
                });
            }
            if !step_def.is_parallel && step_number != current.current_step {
                return Err(ApprovalError::WrongStep {
                    attempted: step_number,
                    current: current.current_step,
                });
            }

            let minutes = minutes_in_step(&updated, step_number, now);
            if let Some(approval) = updated.step_approval_mut(step_number) {
                approval.status = StepStatus::Rejected;
                approval.approved_by.push(approver.clone());
                approval.approved_at = Some(now);
                approval.comment = Some(reason.clone());
                approval.time_to_approve_minutes = Some(minutes);
            }

            updated.status = RequestStatus::Rejected;
            updated.completed_at = Some(now);
            resolve_all_escalations(&mut updated, now, "request rejected");

            let entry = self
                .request_entry(&updated, Actor::new(approver.clone()), "REJECT_STEP")
                .with_summary(format!(
                    "Step {} ({}) rejected by {}: {}",
                    step_number, step_def.name, approver, reason
                ))
                .with_risk_level(RiskLevel::Medium)
                .approval_required(ApprovalOutcome::Rejected)
                .rejected(reason.clone());
            self.append(entry)?;

            *current = updated.clone();
            updated
        };

        tracing::info!(
            request_id = %request_id,
            step = step_number,
            "Request rejected"
        );
        self.emit(ApprovalEvent::StepRejected {
            request_id: request_id.clone(),
            step_number,
            approver: approver.clone(),
        });
        self.emit(ApprovalEvent::RequestRejected {
            request_id: request_id.clone(),
        });
        Ok(committed)
    }

    /// Abort an open request. Racing against a concurrent final
    /// approval is safe: whichever commits first wins and the loser
    /// sees `InvalidState`.
    pub fn cancel(
        &self,
        request_id: &RequestId,
        actor: &UserId,
        reason: impl Into<String>,
    ) -> ApprovalResult<ApprovalRequest> {
        let reason = reason.into();
        let handle = self.handle(request_id)?;
        let now = Utc::now();

        let committed = {
            let mut current = handle.lock();
            if current.is_terminal() {
                return Err(ApprovalError::InvalidState {
                    request: request_id.clone(),
                    status: current.status,
                });
            }

            let mut updated = current.clone();
            updated.status = RequestStatus::Cancelled;
            updated.completed_at = Some(now);
            resolve_all_escalations(&mut updated, now, "request cancelled");

            let entry = self
                .request_entry(&updated, Actor::new(actor.clone()), "CANCEL_REQUEST")
                .with_summary(format!("Request cancelled by {}: {}", actor, reason));
            self.append(entry)?;

            *current = updated.clone();
            updated
        };

        self.emit(ApprovalEvent::RequestCancelled {
            request_id: request_id.clone(),
        });
        Ok(committed)
    }

    /// Attach a review comment to an open request
    pub fn add_comment(
        &self,
        request_id: &RequestId,
        comment: ApprovalComment,
    ) -> ApprovalResult<ApprovalRequest> {
        let handle = self.handle(request_id)?;

        let committed = {
            let mut current = handle.lock();
            if current.is_terminal() {
                return Err(ApprovalError::InvalidState {
                    request: request_id.clone(),
                    status: current.status,
                });
            }

            let mut updated = current.clone();
            let entry = self
                .request_entry(
                    &updated,
                    Actor::new(comment.user_id.clone()),
                    "ADD_COMMENT",
                )
                .with_summary(format!("Comment added by {}", comment.user_id));
            updated.comments.push(comment);

            self.append(entry)?;
            *current = updated.clone();
            updated
        };

        Ok(committed)
    }

    /// Acknowledge an escalation, returning an `escalated` request to
    /// plain `pending`. The stalled step itself stays open.
    pub fn acknowledge_escalation(
        &self,
        request_id: &RequestId,
        escalation_id: &EscalationId,
        user: &UserId,
        notes: Option<String>,
    ) -> ApprovalResult<ApprovalRequest> {
        let handle = self.handle(request_id)?;
        let now = Utc::now();

        let committed = {
            let mut current = handle.lock();
            let mut updated = current.clone();
            let escalation = updated
                .escalations
                .iter_mut()
                .find(|e| e.id == *escalation_id)
                .ok_or_else(|| ApprovalError::EscalationNotFound(escalation_id.clone()))?;

            if escalation.is_resolved() {
                return Ok(current.clone());
            }
            escalation.resolved_at = Some(now);
            escalation.resolution =
                Some(notes.unwrap_or_else(|| format!("acknowledged by {}", user)));

            if updated.status == RequestStatus::Escalated
                && updated.unresolved_escalation_count() == 0
            {
                updated.status = RequestStatus::Pending;
            }

            let entry = self
                .request_entry(&updated, Actor::new(user.clone()), "ACKNOWLEDGE_ESCALATION")
                .with_summary(format!("Escalation acknowledged by {}", user));
            self.append(entry)?;

            *current = updated.clone();
            updated
        };

        self.emit(ApprovalEvent::EscalationAcknowledged {
            request_id: request_id.clone(),
            escalation_id: escalation_id.clone(),
        });
        Ok(committed)
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn get(&self, request_id: &RequestId) -> ApprovalResult<ApprovalRequest> {
        Ok(self.handle(request_id)?.lock().clone())
    }

    /// Every request the engine holds, for administrative views and
    /// reporting
    pub fn requests(&self) -> Vec<ApprovalRequest> {
        self.requests
            .read()
            .values()
            .map(|handle| handle.lock().clone())
            .collect()
    }

    /// Open requests, optionally narrowed to those whose current step
    /// the given user may approve
    pub fn pending(&self, user: Option<&UserId>) -> Vec<ApprovalRequest> {
        let open: Vec<ApprovalRequest> = self
            .requests
            .read()
            .values()
            .map(|handle| handle.lock().clone())
            .filter(|r| r.status.is_open())
            .collect();

        let mut result: Vec<ApprovalRequest> = match user {
            None => open,
            Some(user) => open
                .into_iter()
                .filter(|request| {
                    self.registry
                        .get(&request.workflow_id)
                        .and_then(|w| w.step(request.current_step).cloned())
                        .map(|step| self.eligible(&step, user))
                        .unwrap_or(false)
                })
                .collect(),
        };
        result.sort_by(|a, b| a.requested_at.cmp(&b.requested_at));
        result
    }

    // ── Escalation scan ──────────────────────────────────────────────

    /// Scan open requests for overdue current steps and escalate them.
    ///
    /// Called by the escalation scheduler; `now` is injected so the
    /// scan is deterministic. A step with an unresolved escalation is
    /// never escalated twice. Returns how many escalations opened.
    pub fn scan_for_escalations(&self, now: DateTime<Utc>) -> usize {
        let handles: Vec<(RequestId, Arc<Mutex<ApprovalRequest>>)> = self
            .requests
            .read()
            .iter()
            .map(|(id, handle)| (id.clone(), handle.clone()))
            .collect();

        let mut escalated = 0;
        for (request_id, handle) in handles {
            let mut events = Vec::new();
            {
                let mut current = handle.lock();
                if current.is_terminal() {
                    continue;
                }
                let Some(step_def) = self
                    .registry
                    .get(&current.workflow_id)
                    .and_then(|w| w.step(current.current_step).cloned())
                else {
                    continue;
                };
                if step_def.escalate_after_hours <= 0 {
                    continue;
                }
                let overdue =
                    now - current.step_entered_at >= Duration::hours(step_def.escalate_after_hours);
                if !overdue || current.has_unresolved_escalation(current.current_step) {
                    continue;
                }

                let mut updated = current.clone();
                let escalation = ApprovalEscalation::open(
                    updated.current_step,
                    step_def.escalation_users.clone(),
                    now,
                    format!(
                        "Step {} ({}) exceeded {}h without resolution",
                        updated.current_step, step_def.name, step_def.escalate_after_hours
                    ),
                );
                let escalated_to = escalation.escalated_to.clone();
                updated.escalations.push(escalation);
                updated.status = RequestStatus::Escalated;

                let entry = self
                    .request_entry(&updated, system_actor(), "ESCALATE_STEP")
                    .with_summary(format!(
                        "Step {} escalated after {}h",
                        updated.current_step, step_def.escalate_after_hours
                    ))
                    .with_risk_level(RiskLevel::Medium);
                if let Err(error) = self.append(entry) {
                    tracing::error!(
                        request_id = %request_id,
                        error = %error,
                        "Escalation not committed: audit write failed"
                    );
                    continue;
                }

                events.push(ApprovalEvent::RequestEscalated {
                    request_id: request_id.clone(),
                    step_number: updated.current_step,
                    escalated_to,
                });
                *current = updated;
                escalated += 1;
            }
            for event in events {
                self.emit(event);
            }
        }

        escalated
    }

    // ── Internal helpers ─────────────────────────────────────────────

    fn handle(&self, request_id: &RequestId) -> ApprovalResult<Arc<Mutex<ApprovalRequest>>> {
        self.requests
            .read()
            .get(request_id)
            .cloned()
            .ok_or_else(|| ApprovalError::RequestNotFound(request_id.clone()))
    }

    fn step_definition(
        &self,
        handle: &Arc<Mutex<ApprovalRequest>>,
        request_id: &RequestId,
        step_number: u32,
    ) -> ApprovalResult<(ApprovalWorkflow, ApprovalStep)> {
        let workflow_id = handle.lock().workflow_id.clone();
        let workflow = self
            .registry
            .get(&workflow_id)
            .ok_or(ApprovalError::WorkflowNotFound(workflow_id))?;
        let step = workflow
            .step(step_number)
            .cloned()
            .ok_or(ApprovalError::StepNotFound {
                request: request_id.clone(),
                step: step_number,
            })?;
        Ok((workflow, step))
    }

    fn eligible(&self, step: &ApprovalStep, user: &UserId) -> bool {
        step.approver_users.contains(user)
            || step
                .approver_roles
                .iter()
                .any(|role| self.roles.has_role(user, role))
    }

    /// Advance past resolved steps: evaluate skip and auto-approve
    /// conditions for each next pending step, then either settle on a
    /// new current step or finalize the request.
    fn advance(
        &self,
        request: &mut ApprovalRequest,
        workflow: &ApprovalWorkflow,
        now: DateTime<Utc>,
        transitions: &mut Vec<StepTransition>,
    ) {
        loop {
            let Some(next) = request.lowest_pending_step() else {
                request.current_step = request.total_steps + 1;
                request.status = RequestStatus::Approved;
                request.completed_at = Some(now);
                resolve_all_escalations(request, now, "request finalized");
                return;
            };

            let Some(step_def) = workflow.step(next) else {
                // Definition drifted under an in-flight request; stop
                // advancing rather than guessing.
                tracing::warn!(
                    request_id = %request.id,
                    step = next,
                    "Step definition missing during advance"
                );
                break;
            };

            if !step_def.skip_conditions.is_empty()
                && self.evaluator.matches(
                    &step_def.skip_conditions,
                    request.old_values.as_ref(),
                    request.new_values.as_ref(),
                )
            {
                if let Some(approval) = request.step_approval_mut(next) {
                    approval.status = StepStatus::Skipped;
                    approval.approved_at = Some(now);
                }
                resolve_step_escalations(request, next, now, "step skipped");
                transitions.push(StepTransition::Skipped { step: next });
                continue;
            }

            if !step_def.auto_approve_conditions.is_empty()
                && self.evaluator.matches(
                    &step_def.auto_approve_conditions,
                    request.old_values.as_ref(),
                    request.new_values.as_ref(),
                )
            {
                if let Some(approval) = request.step_approval_mut(next) {
                    approval.status = StepStatus::Approved;
                    approval.approved_at = Some(now);
                    approval.time_to_approve_minutes = Some(0);
                }
                resolve_step_escalations(request, next, now, "step auto-approved");
                transitions.push(StepTransition::AutoApproved { step: next });
                continue;
            }

            if next != request.current_step {
                request.current_step = next;
                request.step_entered_at = now;
            }
            request.status = if request.unresolved_escalation_count() > 0 {
                RequestStatus::Escalated
            } else {
                RequestStatus::Pending
            };
            break;
        }
    }

    fn request_entry(
        &self,
        request: &ApprovalRequest,
        actor: Actor,
        action: &str,
    ) -> AuditEntry {
        AuditEntry::record(actor, action, request.entity.clone()).for_request(request.id.clone())
    }

    fn append_transition_entries(
        &self,
        request: &ApprovalRequest,
        transitions: &[StepTransition],
    ) -> ApprovalResult<()> {
        for transition in transitions {
            let (action, step, summary) = match transition {
                StepTransition::Skipped { step } => (
                    "SKIP_STEP",
                    *step,
                    format!("Step {} skipped: skip conditions matched", step),
                ),
                StepTransition::AutoApproved { step } => (
                    "AUTO_APPROVE_STEP",
                    *step,
                    format!("Step {} auto-approved: conditions matched", step),
                ),
            };
            let entry = self
                .request_entry(request, system_actor(), action)
                .with_summary(summary)
                .with_metadata("step_number", step.to_string());
            self.append(entry)?;
        }
        Ok(())
    }

    /// A denied approval attempt is a risk signal, not a state
    /// transition; its trail entry is best-effort.
    fn record_denied_attempt(
        &self,
        handle: &Arc<Mutex<ApprovalRequest>>,
        request_id: &RequestId,
        step_number: u32,
        user: &UserId,
    ) {
        let entity = handle.lock().entity.clone();
        let entry = AuditEntry::record(Actor::new(user.clone()), "APPROVE_STEP_DENIED", entity)
            .for_request(request_id.clone())
            .with_summary(format!(
                "{} attempted to act on step {} without eligibility",
                user, step_number
            ))
            .with_risk_level(RiskLevel::High)
            .with_compliance_flag("unauthorized_attempt");

        if let Err(error) = self.audit.append(entry) {
            tracing::warn!(error = %error, "Denied-attempt audit entry not written");
        }
    }

    fn append(&self, entry: AuditEntry) -> ApprovalResult<AuditEntryId> {
        self.audit
            .append(entry)
            .map_err(|e| ApprovalError::AuditWrite(e.to_string()))
    }

    fn emit(&self, event: ApprovalEvent) {
        let _ = self.event_tx.send(ApprovalEventEnvelope::new(event));
    }
}

fn system_actor() -> Actor {
    Actor::new(UserId::new("system")).with_name("approval engine")
}

fn risk_for_priority(priority: Priority) -> RiskLevel {
    match priority {
        Priority::Low | Priority::Medium => RiskLevel::Medium,
        Priority::High | Priority::Urgent => RiskLevel::High,
    }
}

/// Minutes the step sat actionable. Parallel steps resolved before
/// becoming current are measured from the request opening.
fn minutes_in_step(request: &ApprovalRequest, step_number: u32, now: DateTime<Utc>) -> i64 {
    let since = if step_number == request.current_step {
        request.step_entered_at
    } else {
        request.requested_at
    };
    (now - since).num_minutes().max(0)
}

fn resolve_step_escalations(
    request: &mut ApprovalRequest,
    step_number: u32,
    now: DateTime<Utc>,
    note: &str,
) {
    for escalation in request
        .escalations
        .iter_mut()
        .filter(|e| e.step_number == step_number && !e.is_resolved())
    {
        escalation.resolved_at = Some(now);
        escalation.resolution = Some(note.to_string());
    }
}

fn resolve_all_escalations(request: &mut ApprovalRequest, now: DateTime<Utc>, note: &str) {
    for escalation in request.escalations.iter_mut().filter(|e| !e.is_resolved()) {
        escalation.resolved_at = Some(now);
        escalation.resolution = Some(note.to_string());
    }
}
