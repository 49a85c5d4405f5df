//! The execution engine
//!
//! `advance()` from the outside is two entry points here: [`Executor::start`]
//! seeds the worklist from the trigger node when an instance is created, and
//! [`Executor::resume`] seeds it from a just-resolved action's node. Stepping
//! itself is pure — the [`Stepper`] walks the graph, mutates the in-memory
//! instance, and reports what must be persisted (actions to open, side
//! effects, audit material); the executor then writes it all through the
//! store.
//!
//! Suspension is durable: reaching an approval node leaves the node id in
//! the instance frontier and opens a `pending` action row. Nothing blocks
//! in memory — resumption is a fresh invocation keyed by that row.

use crate::clock::Clock;
use crate::effects::{EffectSink, SideEffect};
use crate::EngineResult;
use chrono::Duration;
use greenlight_rules::Rule;
use greenlight_store::WorkflowStorage;
use greenlight_types::{
    ActionId, ActionStatus, AuditEvent, Branch, Decision, DefinitionId, DefinitionStatus,
    InstanceStatus, NodeId, NodeKind, SlaPolicy, TenantId, UserId, Violation, WorkflowAction,
    WorkflowDefinition, WorkflowError, WorkflowInstance,
};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;

/// The workflow executor.
///
/// Stateless apart from its injected collaborators; every invocation
/// loads the instance row, steps, and persists. Safe to share across
/// request handlers and the sweeper.
pub struct Executor<S: ?Sized, E: ?Sized> {
    store: Arc<S>,
    effects: Arc<E>,
    clock: Arc<dyn Clock>,
}

impl<S: ?Sized, E: ?Sized> Clone for Executor<S, E> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            effects: Arc::clone(&self.effects),
            clock: Arc::clone(&self.clock),
        }
    }
}

/// Result of a decide call: `applied` is false when the caller lost the
/// race on an already-resolved action.
#[derive(Debug)]
pub struct DecideOutcome {
    pub applied: bool,
    pub action: WorkflowAction,
    pub instance: Option<WorkflowInstance>,
}

/// Result of a stateless dry run
#[derive(Clone, Debug, Serialize)]
pub struct Simulation {
    pub status: InstanceStatus,
    pub steps: Vec<SimulatedStep>,
    pub approvals: Vec<SimulatedApproval>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One node visited during a (dry) run
#[derive(Clone, Debug, Serialize)]
pub struct SimulatedStep {
    pub node_id: NodeId,
    pub label: String,
    pub node_type: &'static str,
}

/// An approval node where execution would suspend
#[derive(Clone, Debug, Serialize)]
pub struct SimulatedApproval {
    pub node_id: NodeId,
    pub approver_role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sla: Option<SlaPolicy>,
}

impl<S, E> Executor<S, E>
where
    S: WorkflowStorage + ?Sized,
    E: EffectSink + ?Sized,
{
    pub fn new(store: Arc<S>, effects: Arc<E>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            effects,
            clock,
        }
    }

    /// Create an instance of a published definition and advance it until
    /// every branch is suspended or terminated.
    pub async fn start(
        &self,
        tenant_id: &TenantId,
        definition_id: &DefinitionId,
        created_by: UserId,
        trigger_payload: serde_json::Value,
    ) -> EngineResult<WorkflowInstance> {
        let definition = self
            .store
            .get_definition(tenant_id, definition_id)
            .await?
            .ok_or_else(|| WorkflowError::DefinitionNotFound(definition_id.clone()))?;

        if definition.status != DefinitionStatus::Published {
            return Err(WorkflowError::NotPublished(definition_id.clone()).into());
        }
        let trigger = definition
            .trigger_node()
            .ok_or_else(|| WorkflowError::Invalid(vec![Violation::NoTriggerNode]))?;

        let mut instance = WorkflowInstance::new(
            definition.id.clone(),
            tenant_id.clone(),
            created_by.clone(),
            trigger_payload,
        );
        self.store.create_instance(instance.clone()).await?;

        self.audit(
            AuditEvent::new(
                tenant_id.clone(),
                "workflow_instance",
                instance.id.0.clone(),
                "instance_started",
            )
            .with_actor(created_by)
            .with_details(serde_json::json!({
                "definition_id": definition.id.0.clone(),
                "definition_version": definition.version,
            })),
        )
        .await;

        tracing::info!(
            instance_id = %instance.id,
            definition_id = %definition.id,
            "workflow instance started"
        );

        let seeds = vec![trigger.id.clone()];
        self.run(&definition, &mut instance, seeds, None).await?;
        Ok(instance)
    }

    /// Resume an instance after one of its actions left `pending`.
    ///
    /// The caller must already have won the store's conditional
    /// transition; `action` carries the resolved state. Invoking this
    /// twice for the same resolution is harmless — a terminal instance
    /// is returned unchanged and an already-traversed branch re-parks
    /// without effect.
    pub async fn resume(&self, action: &WorkflowAction) -> EngineResult<WorkflowInstance> {
        let tenant_id = &action.tenant_id;
        let mut instance = self
            .store
            .get_instance(tenant_id, &action.instance_id)
            .await?
            .ok_or_else(|| WorkflowError::InstanceNotFound(action.instance_id.clone()))?;

        if !instance.is_running() {
            // Terminal while the decision was in flight (sibling branch
            // rejected, operator froze it). Nothing to advance.
            return Ok(instance);
        }

        let definition = self
            .store
            .get_definition(tenant_id, &instance.definition_id)
            .await?
            .ok_or_else(|| WorkflowError::DefinitionNotFound(instance.definition_id.clone()))?;

        tracing::info!(
            instance_id = %instance.id,
            node_id = %action.node_id,
            status = %action.status,
            "resuming workflow instance"
        );

        instance.leave(&action.node_id);
        let seeds = vec![action.node_id.clone()];
        self.run(
            &definition,
            &mut instance,
            seeds,
            Some((action.node_id.clone(), action.status)),
        )
        .await?;
        Ok(instance)
    }

    /// Apply a decision to a pending action: the guarded conditional
    /// update followed by a resume when this caller won.
    pub async fn decide(
        &self,
        tenant_id: &TenantId,
        action_id: &ActionId,
        decision: Decision,
        decided_by: &UserId,
        reason: Option<String>,
    ) -> EngineResult<DecideOutcome> {
        let action = self
            .store
            .get_action(tenant_id, action_id)
            .await?
            .ok_or_else(|| WorkflowError::ActionNotFound(action_id.clone()))?;

        let now = self.clock.now();
        let won = self
            .store
            .resolve_action(
                tenant_id,
                action_id,
                decision.to_status(),
                Some(decided_by),
                reason.as_deref(),
                now,
            )
            .await?;

        if !won {
            // Lost the race; report the already-applied state as a no-op.
            let current = self
                .store
                .get_action(tenant_id, action_id)
                .await?
                .ok_or_else(|| WorkflowError::ActionNotFound(action_id.clone()))?;
            tracing::debug!(action_id = %action_id, "decision lost the race; no-op");
            return Ok(DecideOutcome {
                applied: false,
                action: current,
                instance: None,
            });
        }

        let mut event = AuditEvent::new(
            tenant_id.clone(),
            "workflow_action",
            action_id.0.clone(),
            "action_decided",
        )
        .with_actor(decided_by.clone())
        .with_details(serde_json::json!({
            "instance_id": action.instance_id.0.clone(),
            "node_id": action.node_id.0.clone(),
            "decision": decision.to_string(),
        }));
        if let Some(reason) = &reason {
            event = event.with_reason(reason.clone());
        }
        self.audit(event).await;

        let mut resolved = action;
        resolved.resolve(
            decision.to_status(),
            Some(decided_by.clone()),
            reason,
            now,
        );
        let instance = self.resume(&resolved).await?;
        Ok(DecideOutcome {
            applied: true,
            action: resolved,
            instance: Some(instance),
        })
    }

    /// Stateless dry run of a (possibly unsaved) definition: step the
    /// graph against the payload without persisting anything and report
    /// the visited steps plus the approvals where execution would
    /// suspend.
    pub fn dry_run(
        &self,
        definition: &WorkflowDefinition,
        trigger_payload: serde_json::Value,
    ) -> EngineResult<Simulation> {
        let violations = definition.validate();
        if !violations.is_empty() {
            return Err(WorkflowError::Invalid(violations).into());
        }
        let trigger = definition
            .trigger_node()
            .ok_or_else(|| WorkflowError::Invalid(vec![Violation::NoTriggerNode]))?;

        let mut instance = WorkflowInstance::new(
            definition.id.clone(),
            definition.tenant_id.clone(),
            definition.created_by.clone(),
            trigger_payload,
        );
        let outcome = Stepper::new(
            definition,
            &mut instance,
            vec![trigger.id.clone()],
            None,
        )
        .run();

        Ok(Simulation {
            status: instance.status,
            steps: outcome.trace,
            approvals: outcome
                .opened
                .into_iter()
                .map(|open| SimulatedApproval {
                    node_id: open.node_id,
                    approver_role: open.approver_role,
                    sla: open.sla,
                })
                .collect(),
            error: instance.error,
        })
    }

    // ── Internal ─────────────────────────────────────────────────────

    /// Step the graph, then persist everything the step produced.
    async fn run(
        &self,
        definition: &WorkflowDefinition,
        instance: &mut WorkflowInstance,
        seeds: Vec<NodeId>,
        resolved: Option<(NodeId, ActionStatus)>,
    ) -> EngineResult<()> {
        let tenant_id = instance.tenant_id.clone();
        let outcome = Stepper::new(definition, instance, seeds, resolved).run();
        let now = self.clock.now();

        self.store.update_instance(instance).await?;

        for open in &outcome.opened {
            let mut action = WorkflowAction::pending(
                instance.id.clone(),
                tenant_id.clone(),
                open.node_id.clone(),
                open.approver_role.clone(),
                now,
            );
            if let Some(sla) = open.sla {
                let deadline = now + Duration::days(i64::from(sla.auto_approve_days));
                action = action.with_sla(sla, deadline);
            }
            self.store.create_action(action.clone()).await?;

            self.audit(
                AuditEvent::new(
                    tenant_id.clone(),
                    "workflow_action",
                    action.id.0.clone(),
                    "action_opened",
                )
                .with_details(serde_json::json!({
                    "instance_id": instance.id.0.clone(),
                    "node_id": action.node_id.0.clone(),
                    "assignee_role": action.assignee_role.clone(),
                    "escalate_at": action.escalate_at,
                })),
            )
            .await;

            tracing::info!(
                instance_id = %instance.id,
                node_id = %action.node_id,
                assignee_role = %action.assignee_role,
                "approval action opened; branch suspended"
            );
        }

        if outcome.rejected {
            self.supersede_pending(instance, now).await?;
            self.audit(AuditEvent::new(
                tenant_id.clone(),
                "workflow_instance",
                instance.id.0.clone(),
                "instance_rejected",
            ))
            .await;
            tracing::info!(instance_id = %instance.id, "workflow instance rejected");
        }

        if let Some((node_id, detail)) = &outcome.failure {
            self.audit(
                AuditEvent::new(
                    tenant_id.clone(),
                    "workflow_instance",
                    instance.id.0.clone(),
                    "instance_error",
                )
                .with_reason(detail.clone())
                .with_details(serde_json::json!({"node_id": node_id.0.clone()})),
            )
            .await;
            tracing::error!(
                instance_id = %instance.id,
                node_id = %node_id,
                detail = %detail,
                "workflow execution failed; instance frozen for inspection"
            );
        }

        if outcome.completed {
            self.audit(AuditEvent::new(
                tenant_id.clone(),
                "workflow_instance",
                instance.id.0.clone(),
                "instance_completed",
            ))
            .await;
            tracing::info!(instance_id = %instance.id, "workflow instance completed");
        }

        for effect in outcome.effects {
            match effect {
                SideEffect::AuditNote { message } => {
                    self.audit(
                        AuditEvent::new(
                            tenant_id.clone(),
                            "workflow_instance",
                            instance.id.0.clone(),
                            "workflow_note",
                        )
                        .with_reason(message),
                    )
                    .await;
                }
                other => {
                    self.effects.deliver(&tenant_id, &instance.id, other).await;
                }
            }
        }

        Ok(())
    }

    /// Close the still-pending sibling actions of a rejected instance so
    /// no dangling assigned work remains.
    async fn supersede_pending(
        &self,
        instance: &WorkflowInstance,
        now: chrono::DateTime<chrono::Utc>,
    ) -> EngineResult<()> {
        let pending = self
            .store
            .pending_actions_for_instance(&instance.tenant_id, &instance.id)
            .await?;
        for sibling in pending {
            let won = self
                .store
                .resolve_action(
                    &instance.tenant_id,
                    &sibling.id,
                    ActionStatus::Rejected,
                    None,
                    Some("Superseded: instance rejected"),
                    now,
                )
                .await?;
            if won {
                self.audit(
                    AuditEvent::new(
                        instance.tenant_id.clone(),
                        "workflow_action",
                        sibling.id.0.clone(),
                        "action_superseded",
                    )
                    .with_reason("Superseded: instance rejected")
                    .with_details(serde_json::json!({
                        "instance_id": instance.id.0.clone(),
                        "node_id": sibling.node_id.0.clone(),
                    })),
                )
                .await;
            }
        }
        Ok(())
    }

    /// Fire-and-forget audit append: a logging failure degrades, it
    /// never aborts the transition that triggered it.
    async fn audit(&self, event: AuditEvent) {
        if let Err(err) = self.store.append_audit(event).await {
            tracing::warn!(error = %err, "audit append failed; continuing");
        }
    }
}

// ── Stepping ─────────────────────────────────────────────────────────

/// An approval action the step decided to open
pub(crate) struct OpenApproval {
    pub node_id: NodeId,
    pub approver_role: String,
    pub sla: Option<SlaPolicy>,
}

/// Everything one stepping pass produced
#[derive(Default)]
pub(crate) struct StepOutcome {
    pub opened: Vec<OpenApproval>,
    pub effects: Vec<SideEffect>,
    pub trace: Vec<SimulatedStep>,
    pub completed: bool,
    pub rejected: bool,
    pub failure: Option<(NodeId, String)>,
}

enum Control {
    Continue,
    Halt,
}

/// Pure worklist walker over one definition + instance.
///
/// FIFO order; exactly one labeled edge taken per condition/policy
/// evaluation; fan-in via durable arrival sets.
struct Stepper<'a> {
    definition: &'a WorkflowDefinition,
    instance: &'a mut WorkflowInstance,
    worklist: VecDeque<NodeId>,
    resolved: Option<(NodeId, ActionStatus)>,
    outcome: StepOutcome,
}

impl<'a> Stepper<'a> {
    fn new(
        definition: &'a WorkflowDefinition,
        instance: &'a mut WorkflowInstance,
        seeds: Vec<NodeId>,
        resolved: Option<(NodeId, ActionStatus)>,
    ) -> Self {
        Self {
            definition,
            instance,
            worklist: seeds.into(),
            resolved,
            outcome: StepOutcome::default(),
        }
    }

    fn run(mut self) -> StepOutcome {
        loop {
            while let Some(node_id) = self.worklist.pop_front() {
                if let Control::Halt = self.step_node(node_id) {
                    return self.outcome;
                }
            }

            // Parked joins: fire any whose unmet feeders can no longer
            // arrive (their sources are unreachable from every live
            // branch). This is what lets a condition-merge proceed while
            // a true parallel join keeps waiting.
            let parked: Vec<NodeId> = self.instance.arrivals.keys().cloned().collect();
            let mut fired = false;
            for join in parked {
                if self.join_ready(&join) {
                    self.instance.clear_arrivals(&join);
                    self.worklist.push_back(join);
                    fired = true;
                }
            }
            if !fired {
                break;
            }
        }

        if self.instance.is_running() && self.instance.current_node_ids.is_empty() {
            self.instance.complete();
            self.outcome.completed = true;
        }
        self.outcome
    }

    fn step_node(&mut self, node_id: NodeId) -> Control {
        let definition = self.definition;
        let Some(node) = definition.get_node(&node_id) else {
            return self.fail(
                node_id.clone(),
                format!("node '{}' is not part of the definition", node_id),
            );
        };
        self.outcome.trace.push(SimulatedStep {
            node_id: node_id.clone(),
            label: node.label.clone(),
            node_type: node.kind.kind_name(),
        });

        match &node.kind {
            NodeKind::Trigger { .. } => {
                let successors = definition.outgoing_edges(&node_id);
                if successors.len() != 1 {
                    return self.fail(
                        node_id.clone(),
                        "trigger node must have exactly one successor".to_string(),
                    );
                }
                let to = successors[0].to.clone();
                self.push_target(&node_id, to);
                Control::Continue
            }

            NodeKind::PolicyCheck { rule } => match self.evaluate(&node_id, rule) {
                Err(control) => control,
                Ok(true) => match definition.branch_edge(&node_id, Branch::Pass) {
                    Some(edge) => {
                        let to = edge.to.clone();
                        self.push_target(&node_id, to);
                        Control::Continue
                    }
                    None => self.fail(
                        node_id.clone(),
                        "policy check has no pass edge".to_string(),
                    ),
                },
                Ok(false) => match definition.branch_edge(&node_id, Branch::Fail) {
                    Some(edge) => {
                        let to = edge.to.clone();
                        self.push_target(&node_id, to);
                        Control::Continue
                    }
                    // No modeled failure path: the check is a gate and a
                    // false evaluation denies the request outright.
                    None => self.reject(),
                },
            },

            NodeKind::Approval {
                approver_role,
                sla,
            } => {
                let just_resolved = match &self.resolved {
                    Some((resolved_node, status)) if resolved_node == &node_id => Some(*status),
                    _ => None,
                };

                match just_resolved {
                    Some(ActionStatus::Approved) => {
                        self.resolved = None;
                        // Escalate successors are annotation markers, not
                        // the continuation path.
                        let nexts: Vec<NodeId> = definition
                            .outgoing_edges(&node_id)
                            .into_iter()
                            .filter(|edge| {
                                !matches!(
                                    definition.get_node(&edge.to).map(|n| &n.kind),
                                    Some(NodeKind::Escalate { .. })
                                )
                            })
                            .map(|edge| edge.to.clone())
                            .collect();
                        match nexts.as_slice() {
                            [to] => {
                                let to = to.clone();
                                self.push_target(&node_id, to);
                                Control::Continue
                            }
                            [] => self.fail(
                                node_id.clone(),
                                "approval node has no successor".to_string(),
                            ),
                            _ => self.fail(
                                node_id.clone(),
                                "approval node must have exactly one successor".to_string(),
                            ),
                        }
                    }
                    Some(ActionStatus::Rejected) => {
                        self.resolved = None;
                        // Any single rejection aborts the whole instance.
                        self.reject()
                    }
                    Some(ActionStatus::Pending) | None => {
                        // Suspend this branch: the node stays in the
                        // frontier and a pending action is opened.
                        self.instance.enter(node_id.clone());
                        let sla = self.escalate_policy(&node_id).or(*sla);
                        self.outcome.opened.push(OpenApproval {
                            node_id,
                            approver_role: approver_role.clone(),
                            sla,
                        });
                        Control::Continue
                    }
                }
            }

            NodeKind::Notify { .. }
            | NodeKind::AssignTask { .. }
            | NodeKind::AuditLog { .. }
            | NodeKind::GenerateDoc { .. }
            | NodeKind::UpdateStatus { .. } => {
                if let Some(effect) = SideEffect::from_kind(&node.kind) {
                    self.outcome.effects.push(effect);
                }
                let successors = definition.outgoing_edges(&node_id);
                if successors.len() != 1 {
                    return self.fail(
                        node_id.clone(),
                        format!(
                            "{} node must have exactly one successor",
                            node.kind.kind_name()
                        ),
                    );
                }
                let to = successors[0].to.clone();
                self.push_target(&node_id, to);
                Control::Continue
            }

            NodeKind::Condition { rule } => match self.evaluate(&node_id, rule) {
                Err(control) => control,
                Ok(value) => {
                    let branch = if value { Branch::True } else { Branch::False };
                    match definition.branch_edge(&node_id, branch) {
                        Some(edge) => {
                            let to = edge.to.clone();
                            self.push_target(&node_id, to);
                            Control::Continue
                        }
                        None => self.fail(
                            node_id.clone(),
                            format!("condition has no {} edge", branch),
                        ),
                    }
                }
            },

            NodeKind::Parallel => {
                let targets: Vec<NodeId> = definition
                    .outgoing_edges(&node_id)
                    .iter()
                    .map(|edge| edge.to.clone())
                    .collect();
                if targets.len() < 2 {
                    return self.fail(
                        node_id.clone(),
                        "parallel node must fan out to at least two branches".to_string(),
                    );
                }
                for to in targets {
                    self.push_target(&node_id, to);
                }
                Control::Continue
            }

            // Annotation marker: its SLA config is read when the
            // preceding approval opens an action. If a graph wires flow
            // through it anyway, it passes through.
            NodeKind::Escalate { .. } => {
                for to in definition
                    .outgoing_edges(&node_id)
                    .iter()
                    .map(|edge| edge.to.clone())
                    .collect::<Vec<_>>()
                {
                    self.push_target(&node_id, to);
                }
                Control::Continue
            }

            // Branch terminates; the run() epilogue completes the
            // instance once the frontier is empty.
            NodeKind::Complete => Control::Continue,
        }
    }

    /// Evaluate a rule against the trigger payload. An unresolvable
    /// rule freezes the instance.
    fn evaluate(&mut self, node_id: &NodeId, rule: &str) -> Result<bool, Control> {
        let parsed = match Rule::parse(rule) {
            Ok(parsed) => parsed,
            Err(err) => {
                return Err(self.fail(
                    node_id.clone(),
                    format!("rule '{}' does not parse: {}", rule, err),
                ));
            }
        };
        match parsed.evaluate(&self.instance.trigger_payload) {
            Ok(value) => Ok(value),
            Err(err) => Err(self.fail(
                node_id.clone(),
                format!("rule '{}' is unresolvable: {}", rule, err),
            )),
        }
    }

    /// Enqueue a traversal into `to`. Nodes fed by more than one edge
    /// are joins: the arrival is recorded durably and the node is only
    /// stepped once every feeder that can still arrive has arrived.
    fn push_target(&mut self, from: &NodeId, to: NodeId) {
        let incoming = self.definition.incoming_edges(&to).len();
        if incoming <= 1 {
            self.worklist.push_back(to);
            return;
        }

        self.instance.record_arrival(to.clone(), from.clone());
        if self.join_ready(&to) {
            self.instance.clear_arrivals(&to);
            self.worklist.push_back(to);
        }
    }

    /// A join fires once each incoming edge has either arrived or lost
    /// every live branch that could still reach its source.
    fn join_ready(&self, join: &NodeId) -> bool {
        let Some(arrived) = self.instance.arrivals_for(join) else {
            return false;
        };
        self.definition.incoming_edges(join).iter().all(|edge| {
            arrived.contains(&edge.from) || !self.live_can_reach(&edge.from)
        })
    }

    fn live_can_reach(&self, target: &NodeId) -> bool {
        self.worklist
            .iter()
            .chain(self.instance.current_node_ids.iter())
            .any(|live| self.definition.reachable_from(live).contains(target))
    }

    /// The SLA policy of an escalate node hanging off this approval, if
    /// one is wired.
    fn escalate_policy(&self, node_id: &NodeId) -> Option<SlaPolicy> {
        self.definition
            .outgoing_edges(node_id)
            .iter()
            .find_map(|edge| match &self.definition.get_node(&edge.to)?.kind {
                NodeKind::Escalate {
                    after_days,
                    default_decision,
                } => Some(SlaPolicy {
                    auto_approve_days: *after_days,
                    default_decision: *default_decision,
                }),
                _ => None,
            })
    }

    fn reject(&mut self) -> Control {
        self.instance.reject();
        self.outcome.rejected = true;
        Control::Halt
    }

    fn fail(&mut self, node_id: NodeId, detail: String) -> Control {
        self.instance.fail(node_id.clone(), detail.clone());
        self.outcome.failure = Some((node_id, detail));
        Control::Halt
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EngineError;
    use crate::clock::ManualClock;
    use crate::effects::RecordingEffectSink;
    use chrono::Utc;
    use greenlight_store::{
        ActionStore, AuditStore, DefinitionStore, InMemoryWorkflowStorage, InstanceStore,
        QueryWindow,
    };
    use greenlight_types::{Edge, Node};
    use serde_json::json;

    type TestExecutor = Executor<InMemoryWorkflowStorage, RecordingEffectSink>;

    struct Harness {
        store: Arc<InMemoryWorkflowStorage>,
        sink: Arc<RecordingEffectSink>,
        clock: ManualClock,
        executor: TestExecutor,
        tenant: TenantId,
    }

    fn harness() -> Harness {
        let store = Arc::new(InMemoryWorkflowStorage::new());
        let sink = Arc::new(RecordingEffectSink::new());
        let clock = ManualClock::new(Utc::now());
        let executor = Executor::new(
            Arc::clone(&store),
            Arc::clone(&sink),
            Arc::new(clock.clone()),
        );
        Harness {
            store,
            sink,
            clock,
            executor,
            tenant: TenantId::new("acme"),
        }
    }

    async fn install(h: &Harness, mut def: WorkflowDefinition) -> DefinitionId {
        def.publish().unwrap();
        let id = def.id.clone();
        h.store.create_definition(def).await.unwrap();
        id
    }

    /// trigger → approval(manager) → approval(hr) → complete
    fn sequential_def(tenant: &TenantId) -> WorkflowDefinition {
        let mut def =
            WorkflowDefinition::new(tenant.clone(), "Sequential approval", UserId::new("admin"));
        def.add_node(Node::trigger("trigger", "leave.submitted"))
            .unwrap();
        def.add_node(Node::approval("manager", "manager")).unwrap();
        def.add_node(Node::approval("hr", "hr")).unwrap();
        def.add_node(Node::complete("done")).unwrap();
        def.add_edge(Edge::new(NodeId::new("trigger"), NodeId::new("manager")))
            .unwrap();
        def.add_edge(Edge::new(NodeId::new("manager"), NodeId::new("hr")))
            .unwrap();
        def.add_edge(Edge::new(NodeId::new("hr"), NodeId::new("done")))
            .unwrap();
        def
    }

    /// trigger → parallel{approval(manager), approval(finance)} → complete
    fn parallel_def(tenant: &TenantId) -> WorkflowDefinition {
        let mut def =
            WorkflowDefinition::new(tenant.clone(), "Parallel approval", UserId::new("admin"));
        def.add_node(Node::trigger("trigger", "expense.submitted"))
            .unwrap();
        def.add_node(Node::parallel("fork")).unwrap();
        def.add_node(Node::approval("manager", "manager")).unwrap();
        def.add_node(Node::approval("finance", "finance")).unwrap();
        def.add_node(Node::complete("done")).unwrap();
        def.add_edge(Edge::new(NodeId::new("trigger"), NodeId::new("fork")))
            .unwrap();
        def.add_edge(Edge::new(NodeId::new("fork"), NodeId::new("manager")))
            .unwrap();
        def.add_edge(Edge::new(NodeId::new("fork"), NodeId::new("finance")))
            .unwrap();
        def.add_edge(Edge::new(NodeId::new("manager"), NodeId::new("done")))
            .unwrap();
        def.add_edge(Edge::new(NodeId::new("finance"), NodeId::new("done")))
            .unwrap();
        def
    }

    /// trigger → policy_check(days > 10) —pass→ approval(hr) → complete
    ///                                   —fail→ complete
    fn conditional_def(tenant: &TenantId) -> WorkflowDefinition {
        let mut def =
            WorkflowDefinition::new(tenant.clone(), "Long-leave approval", UserId::new("admin"));
        def.add_node(Node::trigger("trigger", "leave.submitted"))
            .unwrap();
        def.add_node(Node::policy_check("check", "days > 10")).unwrap();
        def.add_node(Node::approval("hr", "hr")).unwrap();
        def.add_node(Node::complete("done")).unwrap();
        def.add_edge(Edge::new(NodeId::new("trigger"), NodeId::new("check")))
            .unwrap();
        def.add_edge(Edge::branched(
            NodeId::new("check"),
            NodeId::new("hr"),
            Branch::Pass,
        ))
        .unwrap();
        def.add_edge(Edge::branched(
            NodeId::new("check"),
            NodeId::new("done"),
            Branch::Fail,
        ))
        .unwrap();
        def.add_edge(Edge::new(NodeId::new("hr"), NodeId::new("done")))
            .unwrap();
        def
    }

    async fn pending_action_at(
        h: &Harness,
        instance: &WorkflowInstance,
        node: &str,
    ) -> WorkflowAction {
        h.store
            .pending_actions_for_instance(&h.tenant, &instance.id)
            .await
            .unwrap()
            .into_iter()
            .find(|a| a.node_id == NodeId::new(node))
            .expect("pending action")
    }

    #[tokio::test]
    async fn start_suspends_at_first_approval() {
        let h = harness();
        let def_id = install(&h, sequential_def(&h.tenant)).await;

        let instance = h
            .executor
            .start(&h.tenant, &def_id, UserId::new("emp-1"), json!({"days": 3}))
            .await
            .unwrap();

        assert!(instance.is_running());
        assert!(instance.current_node_ids.contains(&NodeId::new("manager")));

        let actions = h
            .store
            .actions_for_instance(&h.tenant, &instance.id)
            .await
            .unwrap();
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].assignee_role, "manager");
        assert!(actions[0].is_pending());
    }

    #[tokio::test]
    async fn start_requires_published_definition() {
        let h = harness();
        let def = sequential_def(&h.tenant);
        let def_id = def.id.clone();
        h.store.create_definition(def).await.unwrap();

        let result = h
            .executor
            .start(&h.tenant, &def_id, UserId::new("emp-1"), json!({}))
            .await;
        assert!(matches!(
            result,
            Err(EngineError::Workflow(WorkflowError::NotPublished(_)))
        ));
    }

    #[tokio::test]
    async fn sequential_approvals_run_to_completion() {
        let h = harness();
        let def_id = install(&h, sequential_def(&h.tenant)).await;
        let instance = h
            .executor
            .start(&h.tenant, &def_id, UserId::new("emp-1"), json!({}))
            .await
            .unwrap();

        let manager_action = pending_action_at(&h, &instance, "manager").await;
        let outcome = h
            .executor
            .decide(
                &h.tenant,
                &manager_action.id,
                Decision::Approved,
                &UserId::new("mgr-1"),
                None,
            )
            .await
            .unwrap();
        assert!(outcome.applied);
        let instance = outcome.instance.unwrap();
        assert!(instance.current_node_ids.contains(&NodeId::new("hr")));

        let hr_action = pending_action_at(&h, &instance, "hr").await;
        let outcome = h
            .executor
            .decide(
                &h.tenant,
                &hr_action.id,
                Decision::Approved,
                &UserId::new("hr-1"),
                Some("within policy".into()),
            )
            .await
            .unwrap();
        let instance = outcome.instance.unwrap();

        assert_eq!(instance.status, InstanceStatus::Completed);
        assert!(instance.current_node_ids.is_empty());
    }

    #[tokio::test]
    async fn sequential_rejection_aborts_without_next_stage() {
        let h = harness();
        let def_id = install(&h, sequential_def(&h.tenant)).await;
        let instance = h
            .executor
            .start(&h.tenant, &def_id, UserId::new("emp-1"), json!({}))
            .await
            .unwrap();

        let manager_action = pending_action_at(&h, &instance, "manager").await;
        let outcome = h
            .executor
            .decide(
                &h.tenant,
                &manager_action.id,
                Decision::Rejected,
                &UserId::new("mgr-1"),
                Some("headcount freeze".into()),
            )
            .await
            .unwrap();

        let instance = outcome.instance.unwrap();
        assert_eq!(instance.status, InstanceStatus::Rejected);
        assert!(instance.current_node_ids.is_empty());

        // No action was ever created for the hr stage.
        let actions = h
            .store
            .actions_for_instance(&h.tenant, &instance.id)
            .await
            .unwrap();
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].node_id, NodeId::new("manager"));
    }

    #[tokio::test]
    async fn parallel_completes_only_after_both_branches() {
        let h = harness();
        let def_id = install(&h, parallel_def(&h.tenant)).await;
        let instance = h
            .executor
            .start(&h.tenant, &def_id, UserId::new("emp-1"), json!({}))
            .await
            .unwrap();

        // Both branch approvals suspended.
        assert_eq!(instance.current_node_ids.len(), 2);

        let manager_action = pending_action_at(&h, &instance, "manager").await;
        let outcome = h
            .executor
            .decide(
                &h.tenant,
                &manager_action.id,
                Decision::Approved,
                &UserId::new("mgr-1"),
                None,
            )
            .await
            .unwrap();
        let instance = outcome.instance.unwrap();

        // One branch resolved: still running, join parked.
        assert_eq!(instance.status, InstanceStatus::Running);
        assert!(instance.current_node_ids.contains(&NodeId::new("finance")));

        let finance_action = pending_action_at(&h, &instance, "finance").await;
        let outcome = h
            .executor
            .decide(
                &h.tenant,
                &finance_action.id,
                Decision::Approved,
                &UserId::new("fin-1"),
                None,
            )
            .await
            .unwrap();
        let instance = outcome.instance.unwrap();

        assert_eq!(instance.status, InstanceStatus::Completed);
        assert!(instance.arrivals.is_empty());
    }

    #[tokio::test]
    async fn parallel_rejection_rejects_whole_instance_and_supersedes_sibling() {
        let h = harness();
        let def_id = install(&h, parallel_def(&h.tenant)).await;
        let instance = h
            .executor
            .start(&h.tenant, &def_id, UserId::new("emp-1"), json!({}))
            .await
            .unwrap();

        let finance_action = pending_action_at(&h, &instance, "finance").await;
        let outcome = h
            .executor
            .decide(
                &h.tenant,
                &finance_action.id,
                Decision::Rejected,
                &UserId::new("fin-1"),
                Some("over budget".into()),
            )
            .await
            .unwrap();
        let instance = outcome.instance.unwrap();
        assert_eq!(instance.status, InstanceStatus::Rejected);

        // The sibling manager action was superseded, not left dangling.
        let actions = h
            .store
            .actions_for_instance(&h.tenant, &instance.id)
            .await
            .unwrap();
        let manager = actions
            .iter()
            .find(|a| a.node_id == NodeId::new("manager"))
            .unwrap();
        assert_eq!(manager.status, ActionStatus::Rejected);
        assert!(manager.decided_by.is_none());
        assert_eq!(
            manager.decision_reason.as_deref(),
            Some("Superseded: instance rejected")
        );

        // A late decision on the superseded action is a no-op.
        let late = h
            .executor
            .decide(
                &h.tenant,
                &manager.id,
                Decision::Approved,
                &UserId::new("mgr-1"),
                None,
            )
            .await
            .unwrap();
        assert!(!late.applied);
    }

    #[tokio::test]
    async fn policy_check_routes_short_leave_straight_to_completion() {
        let h = harness();
        let def_id = install(&h, conditional_def(&h.tenant)).await;

        let instance = h
            .executor
            .start(&h.tenant, &def_id, UserId::new("emp-1"), json!({"days": 5}))
            .await
            .unwrap();

        assert_eq!(instance.status, InstanceStatus::Completed);
        let actions = h
            .store
            .actions_for_instance(&h.tenant, &instance.id)
            .await
            .unwrap();
        assert!(actions.is_empty());
    }

    #[tokio::test]
    async fn policy_check_routes_long_leave_through_hr() {
        let h = harness();
        let def_id = install(&h, conditional_def(&h.tenant)).await;

        let instance = h
            .executor
            .start(&h.tenant, &def_id, UserId::new("emp-1"), json!({"days": 15}))
            .await
            .unwrap();

        assert_eq!(instance.status, InstanceStatus::Running);
        let hr_action = pending_action_at(&h, &instance, "hr").await;

        let outcome = h
            .executor
            .decide(
                &h.tenant,
                &hr_action.id,
                Decision::Approved,
                &UserId::new("hr-1"),
                None,
            )
            .await
            .unwrap();
        assert_eq!(outcome.instance.unwrap().status, InstanceStatus::Completed);
    }

    #[tokio::test]
    async fn unresolvable_rule_freezes_instance() {
        let h = harness();
        // `hours` is not in the payload.
        let mut def =
            WorkflowDefinition::new(h.tenant.clone(), "Broken rule", UserId::new("admin"));
        def.add_node(Node::trigger("trigger", "leave.submitted"))
            .unwrap();
        def.add_node(Node::policy_check("check", "hours > 8")).unwrap();
        def.add_node(Node::complete("done")).unwrap();
        def.add_edge(Edge::new(NodeId::new("trigger"), NodeId::new("check")))
            .unwrap();
        def.add_edge(Edge::branched(
            NodeId::new("check"),
            NodeId::new("done"),
            Branch::Pass,
        ))
        .unwrap();
        let def_id = install(&h, def).await;

        let instance = h
            .executor
            .start(&h.tenant, &def_id, UserId::new("emp-1"), json!({"days": 2}))
            .await
            .unwrap();

        assert_eq!(instance.status, InstanceStatus::Error);
        // Frontier frozen at the failing node for inspection.
        assert!(instance.current_node_ids.contains(&NodeId::new("check")));
        assert!(instance.error.as_deref().unwrap().contains("hours"));

        let entries = h
            .store
            .list_audit(&h.tenant, Some(&instance.id.0), QueryWindow::default())
            .await
            .unwrap();
        assert!(entries.iter().any(|e| e.action == "instance_error"));
    }

    #[tokio::test]
    async fn missing_successor_freezes_instance() {
        let h = harness();
        // notify node with no outgoing edge: structurally reachable, so
        // it validates, but execution has nowhere to go.
        let mut def =
            WorkflowDefinition::new(h.tenant.clone(), "Dead end", UserId::new("admin"));
        def.add_node(Node::trigger("trigger", "x")).unwrap();
        def.add_node(Node::notify("ping", "welcome")).unwrap();
        def.add_edge(Edge::new(NodeId::new("trigger"), NodeId::new("ping")))
            .unwrap();
        let def_id = install(&h, def).await;

        let instance = h
            .executor
            .start(&h.tenant, &def_id, UserId::new("emp-1"), json!({}))
            .await
            .unwrap();

        assert_eq!(instance.status, InstanceStatus::Error);
        assert!(instance.current_node_ids.contains(&NodeId::new("ping")));
    }

    #[tokio::test]
    async fn side_effect_nodes_deliver_and_continue() {
        let h = harness();
        let mut def =
            WorkflowDefinition::new(h.tenant.clone(), "Onboarding", UserId::new("admin"));
        def.add_node(Node::trigger("trigger", "onboarding.started"))
            .unwrap();
        def.add_node(Node::notify("welcome", "welcome_email")).unwrap();
        def.add_node(Node::new(
            "laptop",
            "Order laptop",
            NodeKind::AssignTask {
                task: "order_laptop".into(),
                assignee_role: "it".into(),
            },
        ))
        .unwrap();
        def.add_node(Node::complete("done")).unwrap();
        def.add_edge(Edge::new(NodeId::new("trigger"), NodeId::new("welcome")))
            .unwrap();
        def.add_edge(Edge::new(NodeId::new("welcome"), NodeId::new("laptop")))
            .unwrap();
        def.add_edge(Edge::new(NodeId::new("laptop"), NodeId::new("done")))
            .unwrap();
        let def_id = install(&h, def).await;

        let instance = h
            .executor
            .start(&h.tenant, &def_id, UserId::new("emp-1"), json!({}))
            .await
            .unwrap();

        assert_eq!(instance.status, InstanceStatus::Completed);
        let delivered = h.sink.delivered();
        assert_eq!(delivered.len(), 2);
        assert!(matches!(delivered[0], SideEffect::Notify { .. }));
        assert!(matches!(delivered[1], SideEffect::AssignTask { .. }));
    }

    #[tokio::test]
    async fn escalate_node_stamps_sla_onto_action() {
        let h = harness();
        let mut def =
            WorkflowDefinition::new(h.tenant.clone(), "Escalating approval", UserId::new("admin"));
        def.add_node(Node::trigger("trigger", "leave.submitted"))
            .unwrap();
        def.add_node(Node::approval("manager", "manager")).unwrap();
        def.add_node(Node::escalate("sla", 7, Decision::Approved))
            .unwrap();
        def.add_node(Node::complete("done")).unwrap();
        def.add_edge(Edge::new(NodeId::new("trigger"), NodeId::new("manager")))
            .unwrap();
        def.add_edge(Edge::new(NodeId::new("manager"), NodeId::new("sla")))
            .unwrap();
        def.add_edge(Edge::new(NodeId::new("manager"), NodeId::new("done")))
            .unwrap();
        let def_id = install(&h, def).await;

        let started_at = h.clock.now();
        let instance = h
            .executor
            .start(&h.tenant, &def_id, UserId::new("emp-1"), json!({}))
            .await
            .unwrap();

        let action = pending_action_at(&h, &instance, "manager").await;
        assert_eq!(action.sla.unwrap().auto_approve_days, 7);
        assert_eq!(action.escalate_at, Some(started_at + Duration::days(7)));

        // Approval follows the completion edge, not the escalate marker.
        let outcome = h
            .executor
            .decide(
                &h.tenant,
                &action.id,
                Decision::Approved,
                &UserId::new("mgr-1"),
                None,
            )
            .await
            .unwrap();
        assert_eq!(outcome.instance.unwrap().status, InstanceStatus::Completed);
    }

    #[tokio::test]
    async fn approval_sla_config_stamps_deadline_without_escalate_node() {
        let h = harness();
        let mut def =
            WorkflowDefinition::new(h.tenant.clone(), "SLA approval", UserId::new("admin"));
        def.add_node(Node::trigger("trigger", "leave.submitted"))
            .unwrap();
        def.add_node(Node::approval("manager", "manager").with_sla(SlaPolicy::auto_approve(3)))
            .unwrap();
        def.add_node(Node::complete("done")).unwrap();
        def.add_edge(Edge::new(NodeId::new("trigger"), NodeId::new("manager")))
            .unwrap();
        def.add_edge(Edge::new(NodeId::new("manager"), NodeId::new("done")))
            .unwrap();
        let def_id = install(&h, def).await;

        let instance = h
            .executor
            .start(&h.tenant, &def_id, UserId::new("emp-1"), json!({}))
            .await
            .unwrap();
        let action = pending_action_at(&h, &instance, "manager").await;
        assert_eq!(action.sla.unwrap().auto_approve_days, 3);
        assert!(action.escalate_at.is_some());
    }

    #[tokio::test]
    async fn decide_twice_is_one_change_and_one_noop() {
        let h = harness();
        let def_id = install(&h, sequential_def(&h.tenant)).await;
        let instance = h
            .executor
            .start(&h.tenant, &def_id, UserId::new("emp-1"), json!({}))
            .await
            .unwrap();
        let action = pending_action_at(&h, &instance, "manager").await;

        let first = h
            .executor
            .decide(
                &h.tenant,
                &action.id,
                Decision::Approved,
                &UserId::new("mgr-1"),
                None,
            )
            .await
            .unwrap();
        let second = h
            .executor
            .decide(
                &h.tenant,
                &action.id,
                Decision::Approved,
                &UserId::new("mgr-2"),
                None,
            )
            .await
            .unwrap();

        assert!(first.applied);
        assert!(!second.applied);
        // The winner's identity stands.
        assert_eq!(second.action.decided_by, Some(UserId::new("mgr-1")));
    }

    #[tokio::test]
    async fn resume_on_terminal_instance_is_noop() {
        let h = harness();
        let def_id = install(&h, sequential_def(&h.tenant)).await;
        let instance = h
            .executor
            .start(&h.tenant, &def_id, UserId::new("emp-1"), json!({}))
            .await
            .unwrap();
        let action = pending_action_at(&h, &instance, "manager").await;

        let outcome = h
            .executor
            .decide(
                &h.tenant,
                &action.id,
                Decision::Rejected,
                &UserId::new("mgr-1"),
                None,
            )
            .await
            .unwrap();
        let mut resolved = outcome.action.clone();
        resolved.status = ActionStatus::Approved;

        // A stray replay against the now-rejected instance changes nothing.
        let replayed = h.executor.resume(&resolved).await.unwrap();
        assert_eq!(replayed.status, InstanceStatus::Rejected);
    }

    #[tokio::test]
    async fn frontier_empty_iff_completed_or_rejected() {
        let h = harness();
        let def_id = install(&h, conditional_def(&h.tenant)).await;

        let completed = h
            .executor
            .start(&h.tenant, &def_id, UserId::new("emp-1"), json!({"days": 5}))
            .await
            .unwrap();
        assert!(completed.is_terminal());
        assert!(completed.current_node_ids.is_empty());

        let running = h
            .executor
            .start(&h.tenant, &def_id, UserId::new("emp-2"), json!({"days": 20}))
            .await
            .unwrap();
        assert!(running.is_running());
        assert!(!running.current_node_ids.is_empty());
    }

    #[tokio::test]
    async fn dry_run_previews_without_persisting() {
        let h = harness();
        let def = conditional_def(&h.tenant);

        let long_leave = h.executor.dry_run(&def, json!({"days": 15})).unwrap();
        assert_eq!(long_leave.status, InstanceStatus::Running);
        assert_eq!(long_leave.approvals.len(), 1);
        assert_eq!(long_leave.approvals[0].approver_role, "hr");
        assert!(long_leave
            .steps
            .iter()
            .any(|s| s.node_type == "policy_check"));

        let short_leave = h.executor.dry_run(&def, json!({"days": 5})).unwrap();
        assert_eq!(short_leave.status, InstanceStatus::Completed);
        assert!(short_leave.approvals.is_empty());

        // Nothing was written.
        assert!(h
            .store
            .list_instances(&h.tenant, QueryWindow::default())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn dry_run_rejects_invalid_graph() {
        let h = harness();
        let def = WorkflowDefinition::new(h.tenant.clone(), "Empty", UserId::new("admin"));
        let result = h.executor.dry_run(&def, json!({}));
        assert!(matches!(
            result,
            Err(EngineError::Workflow(WorkflowError::Invalid(_)))
        ));
    }

    #[tokio::test]
    async fn audit_trail_covers_lifecycle() {
        let h = harness();
        let def_id = install(&h, sequential_def(&h.tenant)).await;
        let instance = h
            .executor
            .start(&h.tenant, &def_id, UserId::new("emp-1"), json!({}))
            .await
            .unwrap();
        let action = pending_action_at(&h, &instance, "manager").await;
        h.executor
            .decide(
                &h.tenant,
                &action.id,
                Decision::Rejected,
                &UserId::new("mgr-1"),
                Some("no".into()),
            )
            .await
            .unwrap();

        let entries = h
            .store
            .list_audit(&h.tenant, None, QueryWindow::default())
            .await
            .unwrap();
        let actions: Vec<&str> = entries.iter().map(|e| e.action.as_str()).collect();
        for expected in [
            "instance_started",
            "action_opened",
            "action_decided",
            "instance_rejected",
        ] {
            assert!(actions.contains(&expected), "missing {expected}");
        }
    }
}
