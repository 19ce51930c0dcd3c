//! Deployment document and its aggregator.
//!
//! A deployment is mutated only through the methods here. Each method reports
//! whether it changed anything so callers can skip the write on replays.

use std::collections::BTreeMap;

use cdp_events::{DeploymentStatus, InstanceStatus, ServiceDeploymentSignal};
use cdp_id::{CdpDeploymentId, InstanceId, LambdaId, TaskDefinitionArn};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::ReconcileConfig;

/// Last known state of one orchestrator task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub status: InstanceStatus,
    pub updated_at: DateTime<Utc>,
}

/// Last service-level rollout signal and when it was observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalRecord {
    pub signal: ServiceDeploymentSignal,
    pub observed_at: DateTime<Utc>,
}

/// Everything the platform knows when a deployment is requested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRequest {
    pub cdp_deployment_id: CdpDeploymentId,
    pub environment: String,
    pub service: String,
    pub version: String,
    pub requested_instance_count: u32,
    pub requesting_user: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_definition: Option<TaskDefinitionArn>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lambda_id: Option<LambdaId>,
}

/// One logical deployment of a service version to an environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    pub cdp_deployment_id: CdpDeploymentId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lambda_id: Option<LambdaId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_definition: Option<TaskDefinitionArn>,
    pub environment: String,
    pub service: String,
    pub version: String,
    pub requested_instance_count: u32,
    pub requesting_user: String,
    #[serde(default)]
    pub instances: BTreeMap<InstanceId, InstanceRecord>,
    pub status: DeploymentStatus,
    #[serde(default)]
    pub unstable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_service_deployment_signal: Option<SignalRecord>,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

/// Result of writing one instance status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceWrite {
    /// First status seen for this instance.
    Inserted,
    /// Newer status replaced an older one.
    Updated,
    /// The stored entry is as new or newer; nothing written.
    Stale,
}

impl InstanceWrite {
    pub fn is_applied(&self) -> bool {
        !matches!(self, Self::Stale)
    }
}

/// Result of linking an orchestrator deployment id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkOutcome {
    Linked,
    AlreadyLinked,
    /// The deployment is linked to a different orchestrator run.
    Conflict { existing: LambdaId },
}

impl Deployment {
    /// A freshly requested deployment with no instance data.
    ///
    /// The status starts at `Requested` and is immediately aggregated, so an
    /// undeploy request (`requested_instance_count == 0`) starts `Undeployed`.
    pub fn from_request(request: DeploymentRequest, now: DateTime<Utc>) -> Self {
        let mut deployment = Self {
            cdp_deployment_id: request.cdp_deployment_id,
            lambda_id: request.lambda_id,
            task_definition: request.task_definition,
            environment: request.environment,
            service: request.service,
            version: request.version,
            requested_instance_count: request.requested_instance_count,
            requesting_user: request.requesting_user,
            instances: BTreeMap::new(),
            status: DeploymentStatus::Requested,
            unstable: false,
            last_service_deployment_signal: None,
            created: now,
            updated: now,
        };
        deployment.status = deployment.aggregate_status();
        deployment
    }

    /// Sets the orchestrator id if none is set yet. A set id never changes.
    pub fn link_lambda(&mut self, lambda_id: &LambdaId) -> LinkOutcome {
        match &self.lambda_id {
            None => {
                self.lambda_id = Some(lambda_id.clone());
                LinkOutcome::Linked
            }
            Some(existing) if existing == lambda_id => LinkOutcome::AlreadyLinked,
            Some(existing) => LinkOutcome::Conflict {
                existing: existing.clone(),
            },
        }
    }

    /// Fills in the task definition if it is not known yet.
    pub fn learn_task_definition(&mut self, task_definition: Option<&TaskDefinitionArn>) -> bool {
        match (task_definition, &self.task_definition) {
            (Some(arn), None) => {
                self.task_definition = Some(arn.clone());
                true
            }
            _ => false,
        }
    }

    /// Writes an instance status unless the stored entry is as new or newer.
    pub fn record_instance(
        &mut self,
        instance_id: &InstanceId,
        status: InstanceStatus,
        at: DateTime<Utc>,
    ) -> InstanceWrite {
        match self.instances.get_mut(instance_id) {
            Some(existing) if existing.updated_at >= at => InstanceWrite::Stale,
            Some(existing) => {
                *existing = InstanceRecord {
                    status,
                    updated_at: at,
                };
                InstanceWrite::Updated
            }
            None => {
                self.instances.insert(
                    instance_id.clone(),
                    InstanceRecord {
                        status,
                        updated_at: at,
                    },
                );
                InstanceWrite::Inserted
            }
        }
    }

    /// Records a service rollout signal unless a newer one is already stored.
    pub fn record_signal(&mut self, signal: ServiceDeploymentSignal, at: DateTime<Utc>) -> bool {
        if let Some(existing) = &self.last_service_deployment_signal {
            if existing.observed_at >= at {
                return false;
            }
        }
        self.last_service_deployment_signal = Some(SignalRecord {
            signal,
            observed_at: at,
        });
        true
    }

    /// Removes the oldest stopped instance when the map exceeds `cap`.
    ///
    /// Live instances are never evicted. Returns the evicted id.
    pub fn trim_instances(&mut self, cap: usize) -> Option<InstanceId> {
        if self.instances.len() <= cap {
            return None;
        }
        let oldest_stopped = self
            .instances
            .iter()
            .filter(|(_, record)| record.status == InstanceStatus::Stopped)
            .min_by(|(a_id, a), (b_id, b)| a.updated_at.cmp(&b.updated_at).then(a_id.cmp(b_id)))
            .map(|(id, _)| id.clone())?;
        self.instances.remove(&oldest_stopped);
        Some(oldest_stopped)
    }

    fn count(&self, status: InstanceStatus) -> usize {
        self.instances
            .values()
            .filter(|record| record.status == status)
            .count()
    }

    fn last_signal(&self) -> Option<ServiceDeploymentSignal> {
        self.last_service_deployment_signal.map(|s| s.signal)
    }

    /// Derives the aggregate status from instances, signal and current status.
    pub fn aggregate_status(&self) -> DeploymentStatus {
        let requested = self.requested_instance_count as usize;
        if requested == 0 {
            return DeploymentStatus::Undeployed;
        }

        let running = self.count(InstanceStatus::Running);
        if running >= requested {
            return if self.last_signal() == Some(ServiceDeploymentSignal::Completed) {
                DeploymentStatus::Running
            } else {
                DeploymentStatus::Pending
            };
        }
        if self.count(InstanceStatus::Pending) > 0 {
            return DeploymentStatus::Pending;
        }
        if self.count(InstanceStatus::Stopping) > 0 {
            return DeploymentStatus::Stopping;
        }
        if running > 0 {
            return DeploymentStatus::Pending;
        }
        if self.last_signal() == Some(ServiceDeploymentSignal::Failed) {
            return DeploymentStatus::Failed;
        }
        if self.status == DeploymentStatus::Requested && self.instances.is_empty() {
            return DeploymentStatus::Requested;
        }
        DeploymentStatus::Stopped
    }

    /// Crash-loop check over the trailing window ending at the newest
    /// instance update.
    ///
    /// Returns `None` when the deployment has no more instances than requested,
    /// in which case the flag is left as it is.
    pub fn detect_instability(&self, config: &ReconcileConfig) -> Option<bool> {
        if self.instances.len() <= self.requested_instance_count as usize {
            return None;
        }
        let newest = self.instances.values().map(|r| r.updated_at).max()?;
        let window = chrono::Duration::from_std(config.crash_loop_window)
            .unwrap_or(chrono::Duration::MAX);
        let since = newest
            .checked_sub_signed(window)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let (alive, dead) = self
            .instances
            .values()
            .filter(|record| record.updated_at >= since)
            .fold((0usize, 0usize), |(alive, dead), record| {
                if record.status.is_alive() {
                    (alive + 1, dead)
                } else {
                    (alive, dead + 1)
                }
            });

        Some(alive > 0 && dead >= config.crash_loop_deaths)
    }

    /// Runs trim, crash-loop detection and aggregation after a write.
    ///
    /// Returns true if the status or the unstable flag changed.
    pub fn reconcile(&mut self, config: &ReconcileConfig) -> bool {
        self.trim_instances(config.instance_cap);

        let mut changed = false;
        if let Some(unstable) = self.detect_instability(config) {
            changed |= self.unstable != unstable;
            self.unstable = unstable;
        }

        let status = self.aggregate_status();
        changed |= self.status != status;
        self.status = status;
        changed
    }

    /// Latest instance update, if any instance is known.
    pub fn last_instance_update(&self) -> Option<DateTime<Utc>> {
        self.instances.values().map(|r| r.updated_at).max()
    }
}
