//! Wire-level enums shared by the normalizer, the reconciler and the read API.
//!
//! Every status value that leaves the engine is one of the enums below and
//! serializes as a snake_case string.

use serde::{Deserialize, Serialize};

// =============================================================================
// Event Type Constants
// =============================================================================

/// Event type names as they appear in raw envelopes.
pub mod event_types {
    // Orchestrator event bus (`detail-type`)
    pub const ECS_TASK_STATE_CHANGE: &str = "ECS Task State Change";
    pub const ECS_DEPLOYMENT_STATE_CHANGE: &str = "ECS Deployment State Change";

    // Platform / CI (`eventType`)
    pub const DEPLOYMENT_LINKED: &str = "deployment-linked";
    pub const ENVIRONMENT_STATE: &str = "environment-state";

    // Orchestrator service deployment `eventName`
    pub const SERVICE_DEPLOYMENT_IN_PROGRESS: &str = "SERVICE_DEPLOYMENT_IN_PROGRESS";
    pub const SERVICE_DEPLOYMENT_COMPLETED: &str = "SERVICE_DEPLOYMENT_COMPLETED";
    pub const SERVICE_DEPLOYMENT_FAILED: &str = "SERVICE_DEPLOYMENT_FAILED";
}

// =============================================================================
// Orchestrator States
// =============================================================================

/// Desired state reported by the orchestrator for a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DesiredState {
    Running,
    Pending,
    Stopped,
    #[serde(other)]
    Unknown,
}

/// Last observed state reported by the orchestrator for a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ObservedState {
    Provisioning,
    Pending,
    Activating,
    Running,
    Deactivating,
    Stopping,
    Deprovisioning,
    Stopped,
    #[serde(other)]
    Unknown,
}

/// Service-level rollout signal from the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceDeploymentSignal {
    InProgress,
    Completed,
    Failed,
}

impl ServiceDeploymentSignal {
    /// Maps an orchestrator `eventName` to a signal.
    pub fn from_event_name(name: &str) -> Option<Self> {
        match name {
            event_types::SERVICE_DEPLOYMENT_IN_PROGRESS => Some(Self::InProgress),
            event_types::SERVICE_DEPLOYMENT_COMPLETED => Some(Self::Completed),
            event_types::SERVICE_DEPLOYMENT_FAILED => Some(Self::Failed),
            _ => None,
        }
    }
}

// =============================================================================
// Derived Statuses
// =============================================================================

/// Status of one orchestrator task belonging to a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Pending,
    Running,
    Stopping,
    Stopped,
}

impl InstanceStatus {
    /// Pending or running.
    pub fn is_alive(&self) -> bool {
        matches!(self, Self::Pending | Self::Running)
    }
}

/// Aggregate status of a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    Requested,
    Pending,
    Running,
    Stopping,
    Stopped,
    Failed,
    Undeployed,
}

impl std::fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DeploymentStatus::Requested => "requested",
            DeploymentStatus::Pending => "pending",
            DeploymentStatus::Running => "running",
            DeploymentStatus::Stopping => "stopping",
            DeploymentStatus::Stopped => "stopped",
            DeploymentStatus::Failed => "failed",
            DeploymentStatus::Undeployed => "undeployed",
        };
        write!(f, "{}", s)
    }
}

/// Cross-environment lifecycle status of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityStatus {
    Creating,
    Created,
    Decommissioning,
    Decommissioned,
}

impl EntityStatus {
    /// Created and Decommissioned are never left by re-evaluation.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Created | Self::Decommissioned)
    }
}

impl std::fmt::Display for EntityStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EntityStatus::Creating => "creating",
            EntityStatus::Created => "created",
            EntityStatus::Decommissioning => "decommissioning",
            EntityStatus::Decommissioned => "decommissioned",
        };
        write!(f, "{}", s)
    }
}

// =============================================================================
// Entities and Artifacts
// =============================================================================

/// Kind of tenant entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    #[default]
    Microservice,
    TestSuite,
    Repository,
    Prototype,
}

/// How an artifact runs on the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Long-running service; its task events drive deployment status.
    Service,
    /// Run-to-completion test suite; handled outside the status engine.
    Job,
}

/// A named CI provisioning step tracked in an entity's per-environment progress.
///
/// CI reports steps by key. Known keys map to a variant through [`ProgressStep::key`]
/// and [`ProgressStep::from_key`]; unknown keys are carried as [`ProgressStep::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ProgressStep {
    TenantConfig,
    ServiceInfra,
    AppConfig,
    NginxUpstreams,
    SquidProxy,
    Dashboards,
    Other(String),
}

impl ProgressStep {
    const TABLE: [(ProgressStep, &'static str); 6] = [
        (ProgressStep::TenantConfig, "cdp-tenant-config"),
        (ProgressStep::ServiceInfra, "cdp-tf-svc-infra"),
        (ProgressStep::AppConfig, "cdp-app-config"),
        (ProgressStep::NginxUpstreams, "cdp-nginx-upstreams"),
        (ProgressStep::SquidProxy, "cdp-squid-proxy"),
        (ProgressStep::Dashboards, "cdp-grafana-svc"),
    ];

    /// The CI key for this step.
    pub fn key(&self) -> &str {
        match self {
            ProgressStep::Other(key) => key,
            known => Self::TABLE
                .iter()
                .find(|(step, _)| step == known)
                .map(|(_, key)| *key)
                .unwrap_or_default(),
        }
    }

    /// Resolves a CI key to a step.
    pub fn from_key(key: &str) -> Self {
        Self::TABLE
            .iter()
            .find(|(_, k)| *k == key)
            .map(|(step, _)| step.clone())
            .unwrap_or_else(|| ProgressStep::Other(key.to_string()))
    }
}

impl Serialize for ProgressStep {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.key())
    }
}

impl<'de> Deserialize<'de> for ProgressStep {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let key = String::deserialize(deserializer)?;
        Ok(Self::from_key(&key))
    }
}

/// A container image reference split into repository and tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    pub repo: String,
    pub tag: Option<String>,
}

impl ImageRef {
    /// Parses `registry/path/repo:tag`, keeping the registry host out of the
    /// repo name. Digest-pinned references (`repo@sha256:..`) have no tag.
    pub fn parse(image: &str) -> Self {
        let without_digest = image.split_once('@').map(|(i, _)| i).unwrap_or(image);
        let last_segment_start = without_digest.rfind('/').map(|i| i + 1).unwrap_or(0);
        let (path, tag) = match without_digest[last_segment_start..].rfind(':') {
            Some(idx) => {
                let colon = last_segment_start + idx;
                (
                    &without_digest[..colon],
                    Some(without_digest[colon + 1..].to_string()),
                )
            }
            None => (without_digest, None),
        };
        let repo = match path.split_once('/') {
            Some((host, rest)) if host.contains('.') || host.contains(':') => rest,
            _ => path,
        };
        Self {
            repo: repo.to_string(),
            tag,
        }
    }
}
