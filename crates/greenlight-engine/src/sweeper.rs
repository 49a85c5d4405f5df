//! SLA escalation sweeper
//!
//! A periodic, idempotent job that finds pending actions whose SLA
//! deadline has elapsed and auto-resolves them with the snapshot's
//! default decision, then resumes the owning instance. Constructed once
//! at startup with injected dependencies (store, executor, clock, batch
//! ceiling) so it is testable with a manual clock; never a module-level
//! singleton.
//!
//! Overlap safety: an overlapping tick (or a human decision racing the
//! sweep) is gated by the same conditional pending→resolved transition
//! as every other decision — the loser observes zero rows affected and
//! skips the resume.

use crate::clock::Clock;
use crate::effects::EffectSink;
use crate::executor::Executor;
use crate::EngineResult;
use chrono::{DateTime, Utc};
use greenlight_store::WorkflowStorage;
use greenlight_types::{AuditEvent, Decision, WorkflowAction};
use std::sync::Arc;
use tokio::sync::watch;

/// What one sweep tick did
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Due actions examined this tick
    pub examined: usize,
    /// Actions this tick actually resolved and resumed
    pub resolved: usize,
    /// Actions skipped because another writer resolved them first
    pub lost_races: usize,
    /// Actions that errored; the sweep continued past them
    pub failures: usize,
}

/// The escalation sweeper
pub struct EscalationSweeper<S: ?Sized, E: ?Sized> {
    store: Arc<S>,
    executor: Executor<S, E>,
    clock: Arc<dyn Clock>,
    batch_limit: usize,
}

impl<S, E> EscalationSweeper<S, E>
where
    S: WorkflowStorage + ?Sized,
    E: EffectSink + ?Sized,
{
    pub fn new(
        store: Arc<S>,
        executor: Executor<S, E>,
        clock: Arc<dyn Clock>,
        batch_limit: usize,
    ) -> Self {
        Self {
            store,
            executor,
            clock,
            batch_limit,
        }
    }

    /// One sweep pass. Errors on individual actions are logged and do
    /// not abort the batch.
    pub async fn tick(&self) -> SweepReport {
        let now = self.clock.now();
        let mut report = SweepReport::default();

        let due = match self.store.due_actions(now, self.batch_limit).await {
            Ok(due) => due,
            Err(err) => {
                tracing::error!(error = %err, "escalation sweep query failed");
                return report;
            }
        };

        for action in due {
            report.examined += 1;
            match self.escalate(&action, now).await {
                Ok(true) => report.resolved += 1,
                Ok(false) => report.lost_races += 1,
                Err(err) => {
                    report.failures += 1;
                    tracing::error!(
                        action_id = %action.id,
                        instance_id = %action.instance_id,
                        error = %err,
                        "escalation failed; continuing sweep"
                    );
                }
            }
        }

        report
    }

    /// Run the sweep on an interval until shutdown is signalled.
    pub async fn run(
        self,
        interval: std::time::Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.tick().await;
                    if report.examined > 0 {
                        tracing::info!(
                            examined = report.examined,
                            resolved = report.resolved,
                            lost_races = report.lost_races,
                            failures = report.failures,
                            "escalation sweep finished"
                        );
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("escalation sweeper stopped");
    }

    // ── Internal ─────────────────────────────────────────────────────

    /// Resolve one overdue action. Returns `Ok(false)` when another
    /// writer (human decision or overlapping tick) got there first.
    async fn escalate(&self, action: &WorkflowAction, now: DateTime<Utc>) -> EngineResult<bool> {
        let Some(sla) = action.sla else {
            // A deadline without a snapshot should not happen; leave the
            // action for a human rather than guessing a decision.
            tracing::warn!(
                action_id = %action.id,
                "due action has no SLA snapshot; skipping"
            );
            return Ok(false);
        };

        let status = sla.default_decision.to_status();
        let reason = match sla.default_decision {
            Decision::Approved => format!(
                "Auto-approved due to SLA breach ({} days)",
                sla.auto_approve_days
            ),
            Decision::Rejected => format!(
                "Auto-rejected due to SLA breach ({} days)",
                sla.auto_approve_days
            ),
        };

        let won = self
            .store
            .resolve_action(
                &action.tenant_id,
                &action.id,
                status,
                None,
                Some(&reason),
                now,
            )
            .await?;
        if !won {
            return Ok(false);
        }

        // actor_id stays empty: this is a system decision.
        if let Err(err) = self
            .store
            .append_audit(
                AuditEvent::new(
                    action.tenant_id.clone(),
                    "workflow_action",
                    action.id.0.clone(),
                    "action_auto_resolved",
                )
                .with_reason(reason.clone())
                .with_details(serde_json::json!({
                    "instance_id": action.instance_id.0.clone(),
                    "node_id": action.node_id.0.clone(),
                    "decision": sla.default_decision.to_string(),
                })),
            )
            .await
        {
            tracing::warn!(error = %err, "audit append failed; continuing");
        }

        tracing::info!(
            action_id = %action.id,
            instance_id = %action.instance_id,
            days = sla.auto_approve_days,
            decision = %sla.default_decision,
            "action auto-resolved by SLA sweep"
        );

        let mut resolved = action.clone();
        resolved.resolve(status, None, Some(reason), now);
        self.executor.resume(&resolved).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::effects::RecordingEffectSink;
    use chrono::Duration;
    use greenlight_store::{
        ActionStore, AuditStore, DefinitionStore, InMemoryWorkflowStorage, InstanceStore,
        QueryWindow,
    };
    use greenlight_types::{
        DefinitionId, Edge, InstanceStatus, Node, NodeId, SlaPolicy, TenantId, UserId,
        WorkflowDefinition,
    };
    use serde_json::json;

    struct Harness {
        store: Arc<InMemoryWorkflowStorage>,
        clock: ManualClock,
        executor: Executor<InMemoryWorkflowStorage, RecordingEffectSink>,
        sweeper: EscalationSweeper<InMemoryWorkflowStorage, RecordingEffectSink>,
        tenant: TenantId,
    }

    fn harness(batch_limit: usize) -> Harness {
        let store = Arc::new(InMemoryWorkflowStorage::new());
        let sink = Arc::new(RecordingEffectSink::new());
        let clock = ManualClock::new(Utc::now());
        let executor = Executor::new(
            Arc::clone(&store),
            Arc::clone(&sink),
            Arc::new(clock.clone()),
        );
        let sweeper = EscalationSweeper::new(
            Arc::clone(&store),
            executor.clone(),
            Arc::new(clock.clone()),
            batch_limit,
        );
        Harness {
            store,
            clock,
            executor,
            sweeper,
            tenant: TenantId::new("acme"),
        }
    }

    /// trigger → approval(manager, auto-approve after `days`) → complete
    async fn install_sla_def(h: &Harness, days: u32) -> DefinitionId {
        let mut def = WorkflowDefinition::new(
            h.tenant.clone(),
            "SLA approval",
            UserId::new("admin"),
        );
        def.add_node(Node::trigger("trigger", "leave.submitted"))
            .unwrap();
        def.add_node(
            Node::approval("manager", "manager").with_sla(SlaPolicy::auto_approve(days)),
        )
        .unwrap();
        def.add_node(Node::complete("done")).unwrap();
        def.add_edge(Edge::new(NodeId::new("trigger"), NodeId::new("manager")))
            .unwrap();
        def.add_edge(Edge::new(NodeId::new("manager"), NodeId::new("done")))
            .unwrap();
        def.publish().unwrap();
        let id = def.id.clone();
        h.store.create_definition(def).await.unwrap();
        id
    }

    #[tokio::test]
    async fn sla_breach_auto_approves_exactly_once() {
        let h = harness(50);
        let def_id = install_sla_def(&h, 7).await;
        let instance = h
            .executor
            .start(&h.tenant, &def_id, UserId::new("emp-1"), json!({}))
            .await
            .unwrap();

        // Day 6: still pending.
        h.clock.advance(Duration::days(6));
        let report = h.sweeper.tick().await;
        assert_eq!(report, SweepReport::default());

        let actions = h
            .store
            .actions_for_instance(&h.tenant, &instance.id)
            .await
            .unwrap();
        assert!(actions[0].is_pending());

        // Day 7 plus a bit: auto-approved, decided_by stays empty.
        h.clock.advance(Duration::days(1) + Duration::hours(1));
        let report = h.sweeper.tick().await;
        assert_eq!(report.examined, 1);
        assert_eq!(report.resolved, 1);

        let actions = h
            .store
            .actions_for_instance(&h.tenant, &instance.id)
            .await
            .unwrap();
        assert_eq!(actions[0].status, greenlight_types::ActionStatus::Approved);
        assert!(actions[0].decided_by.is_none());
        assert!(actions[0]
            .decision_reason
            .as_deref()
            .unwrap()
            .contains("7"));

        let instance = h
            .store
            .get_instance(&h.tenant, &instance.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(instance.status, InstanceStatus::Completed);

        // A later tick finds nothing to do.
        let report = h.sweeper.tick().await;
        assert_eq!(report.examined, 0);
    }

    #[tokio::test]
    async fn overlapping_ticks_resolve_once() {
        let h = harness(50);
        let def_id = install_sla_def(&h, 2).await;
        let instance = h
            .executor
            .start(&h.tenant, &def_id, UserId::new("emp-1"), json!({}))
            .await
            .unwrap();
        h.clock.advance(Duration::days(3));

        // Simulate two overlapping ticks over the same due snapshot.
        let due = h.store.due_actions(h.clock.now(), 50).await.unwrap();
        assert_eq!(due.len(), 1);
        let first = h.sweeper.escalate(&due[0], h.clock.now()).await.unwrap();
        let second = h.sweeper.escalate(&due[0], h.clock.now()).await.unwrap();
        assert!(first);
        assert!(!second);

        let instance = h
            .store
            .get_instance(&h.tenant, &instance.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(instance.status, InstanceStatus::Completed);
    }

    #[tokio::test]
    async fn human_decision_beats_sweep() {
        let h = harness(50);
        let def_id = install_sla_def(&h, 1).await;
        let instance = h
            .executor
            .start(&h.tenant, &def_id, UserId::new("emp-1"), json!({}))
            .await
            .unwrap();
        h.clock.advance(Duration::days(2));

        let actions = h
            .store
            .actions_for_instance(&h.tenant, &instance.id)
            .await
            .unwrap();
        h.executor
            .decide(
                &h.tenant,
                &actions[0].id,
                greenlight_types::Decision::Rejected,
                &UserId::new("mgr-1"),
                Some("too late".into()),
            )
            .await
            .unwrap();

        // The sweep tick after the human decision has nothing due.
        let report = h.sweeper.tick().await;
        assert_eq!(report.examined, 0);

        let actions = h
            .store
            .actions_for_instance(&h.tenant, &instance.id)
            .await
            .unwrap();
        assert_eq!(actions[0].decided_by, Some(UserId::new("mgr-1")));
    }

    #[tokio::test]
    async fn batch_ceiling_bounds_one_tick() {
        let h = harness(2);
        let def_id = install_sla_def(&h, 1).await;
        for n in 0..5 {
            h.executor
                .start(
                    &h.tenant,
                    &def_id,
                    UserId::new(format!("emp-{n}")),
                    json!({}),
                )
                .await
                .unwrap();
        }
        h.clock.advance(Duration::days(2));

        let report = h.sweeper.tick().await;
        assert_eq!(report.examined, 2);
        assert_eq!(report.resolved, 2);

        // Remaining actions drain on subsequent ticks.
        let report = h.sweeper.tick().await;
        assert_eq!(report.resolved, 2);
        let report = h.sweeper.tick().await;
        assert_eq!(report.resolved, 1);
        let report = h.sweeper.tick().await;
        assert_eq!(report.examined, 0);
    }

    #[tokio::test]
    async fn auto_resolution_is_audited_as_system_action() {
        let h = harness(50);
        let def_id = install_sla_def(&h, 1).await;
        let instance = h
            .executor
            .start(&h.tenant, &def_id, UserId::new("emp-1"), json!({}))
            .await
            .unwrap();
        h.clock.advance(Duration::days(2));
        h.sweeper.tick().await;

        let actions = h
            .store
            .actions_for_instance(&h.tenant, &instance.id)
            .await
            .unwrap();
        let entries = h
            .store
            .list_audit(&h.tenant, Some(&actions[0].id.0), QueryWindow::default())
            .await
            .unwrap();
        let auto = entries
            .iter()
            .find(|e| e.action == "action_auto_resolved")
            .expect("auto-resolution audit entry");
        assert!(auto.actor_id.is_none());
        assert!(auto.reason.as_deref().unwrap().contains("SLA breach"));
    }
}
