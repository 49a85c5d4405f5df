//! Side-effect seam
//!
//! Notification delivery, task creation, document rendering, and
//! domain-status updates are external collaborators. The engine
//! executes these nodes synchronously by handing a [`SideEffect`] to
//! the configured sink and continuing; it never waits on delivery
//! outcomes and a delivery problem never aborts a workflow transition.

use async_trait::async_trait;
use greenlight_types::{InstanceId, NodeKind, TenantId};
use std::sync::Mutex;

/// A side effect produced by a non-suspending node
#[derive(Clone, Debug, PartialEq)]
pub enum SideEffect {
    Notify {
        template: String,
        recipient_role: Option<String>,
    },
    AssignTask {
        task: String,
        assignee_role: String,
    },
    AuditNote {
        message: String,
    },
    GenerateDoc {
        template: String,
    },
    UpdateStatus {
        entity: String,
        status: String,
    },
}

impl SideEffect {
    /// The side effect a node kind produces, if any
    pub fn from_kind(kind: &NodeKind) -> Option<SideEffect> {
        match kind {
            NodeKind::Notify {
                template,
                recipient_role,
            } => Some(Self::Notify {
                template: template.clone(),
                recipient_role: recipient_role.clone(),
            }),
            NodeKind::AssignTask {
                task,
                assignee_role,
            } => Some(Self::AssignTask {
                task: task.clone(),
                assignee_role: assignee_role.clone(),
            }),
            NodeKind::AuditLog { message } => Some(Self::AuditNote {
                message: message.clone(),
            }),
            NodeKind::GenerateDoc { template } => Some(Self::GenerateDoc {
                template: template.clone(),
            }),
            NodeKind::UpdateStatus { entity, status } => Some(Self::UpdateStatus {
                entity: entity.clone(),
                status: status.clone(),
            }),
            _ => None,
        }
    }
}

/// Delivery seam for side effects.
///
/// Implementations own their failure handling: delivery problems are
/// logged by the sink, never raised back into the engine.
#[async_trait]
pub trait EffectSink: Send + Sync {
    async fn deliver(&self, tenant_id: &TenantId, instance_id: &InstanceId, effect: SideEffect);
}

/// Default sink: logs each delivery. Deployments plug the real
/// notification and task systems in behind this trait.
pub struct TracingEffectSink;

#[async_trait]
impl EffectSink for TracingEffectSink {
    async fn deliver(&self, tenant_id: &TenantId, instance_id: &InstanceId, effect: SideEffect) {
        tracing::info!(
            tenant_id = %tenant_id,
            instance_id = %instance_id,
            effect = ?effect,
            "side effect delivered"
        );
    }
}

/// Capturing sink for tests
#[derive(Default)]
pub struct RecordingEffectSink {
    delivered: Mutex<Vec<SideEffect>>,
}

impl RecordingEffectSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delivered(&self) -> Vec<SideEffect> {
        self.delivered.lock().expect("sink lock poisoned").clone()
    }
}

#[async_trait]
impl EffectSink for RecordingEffectSink {
    async fn deliver(&self, _tenant_id: &TenantId, _instance_id: &InstanceId, effect: SideEffect) {
        self.delivered
            .lock()
            .expect("sink lock poisoned")
            .push(effect);
    }
}
