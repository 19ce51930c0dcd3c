//! Normalized envelope and the four typed lifecycle events.

use std::collections::BTreeMap;

use cdp_id::{CdpDeploymentId, EntityName, InstanceId, LambdaId, MessageId, TaskDefinitionArn};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{
    DesiredState, EntityType, ObservedState, ProgressStep, ServiceDeploymentSignal,
};

/// A normalized queue message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Transport message id. Tracing only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<MessageId>,

    /// The typed event.
    pub event: LifecycleEvent,
}

/// Lifecycle event kinds understood by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LifecycleEvent {
    TaskStateChanged(TaskStateChanged),
    ServiceDeploymentStateChanged(ServiceDeploymentStateChanged),
    DeploymentLinked(DeploymentLinked),
    EnvironmentState(EnvironmentStateSnapshot),
}

impl LifecycleEvent {
    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            LifecycleEvent::TaskStateChanged(_) => "task_state_changed",
            LifecycleEvent::ServiceDeploymentStateChanged(_) => {
                "service_deployment_state_changed"
            }
            LifecycleEvent::DeploymentLinked(_) => "deployment_linked",
            LifecycleEvent::EnvironmentState(_) => "environment_state",
        }
    }

    /// When the producer says the fact was observed.
    pub fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            LifecycleEvent::TaskStateChanged(e) => e.occurred_at,
            LifecycleEvent::ServiceDeploymentStateChanged(e) => e.occurred_at,
            LifecycleEvent::DeploymentLinked(e) => e.occurred_at,
            LifecycleEvent::EnvironmentState(e) => e.occurred_at,
        }
    }
}

/// One container of an orchestrator task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerImage {
    pub name: String,
    pub image: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_digest: Option<String>,
}

/// Orchestrator task (instance) state change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStateChanged {
    pub instance_id: InstanceId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_definition: Option<TaskDefinitionArn>,
    /// Orchestrator deployment that started the task. Missing for some
    /// event shapes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lambda_id: Option<LambdaId>,
    pub desired: DesiredState,
    pub observed: ObservedState,
    pub containers: Vec<ContainerImage>,
    pub occurred_at: DateTime<Utc>,
}

/// Orchestrator service-level rollout state change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceDeploymentStateChanged {
    pub lambda_id: LambdaId,
    pub signal: ServiceDeploymentSignal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Platform deployer announcing which orchestrator deployment serves a
/// platform deployment request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentLinked {
    pub cdp_deployment_id: CdpDeploymentId,
    pub lambda_id: LambdaId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_definition: Option<TaskDefinitionArn>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requested_instance_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requesting_user: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// CI-reported provisioning progress of one tenant in one environment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantProgress {
    pub complete: bool,
    #[serde(default)]
    pub steps: BTreeMap<ProgressStep, bool>,
}

/// One tenant as listed in an environment snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantState {
    pub name: EntityName,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<EntityType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_type: Option<String>,
    #[serde(default)]
    pub teams: Vec<String>,
    /// Tenant configuration as CI reports it for this environment.
    #[serde(default)]
    pub config: serde_json::Value,
    pub progress: TenantProgress,
    /// Environments this tenant is meant to exist in. `None` means all.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environments: Option<Vec<String>>,
}

/// Full tenant list of one environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentStateSnapshot {
    pub environment: String,
    pub tenants: Vec<TenantState>,
    pub occurred_at: DateTime<Utc>,
}
