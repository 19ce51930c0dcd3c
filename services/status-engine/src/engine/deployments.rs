//! Deployment event handlers and registration.

use cdp_events::{RunMode, ServiceDeploymentStateChanged, TaskStateChanged};
use cdp_reconcile::{instance_status, Deployment, DeploymentRequest, LinkOutcome};
use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use super::{DropReason, EngineError, EngineResult, Outcome, StatusEngine};
use crate::store::Update;

impl StatusEngine {
    /// Records a platform deployment request.
    ///
    /// Idempotent on `cdp_deployment_id`: a repeated request returns the
    /// stored deployment unchanged.
    #[instrument(skip(self, request), fields(deployment_id = %request.cdp_deployment_id))]
    pub async fn register_deployment(
        &self,
        request: DeploymentRequest,
    ) -> EngineResult<Update<Deployment>> {
        for (field, value) in [
            ("environment", &request.environment),
            ("service", &request.service),
            ("version", &request.version),
            ("requesting_user", &request.requesting_user),
        ] {
            if value.trim().is_empty() {
                return Err(EngineError::InvalidRequest(format!("{field} is required")));
            }
        }

        let update = self
            .store
            .insert_deployment(Deployment::from_request(request, Utc::now()))
            .await?;
        if update.changed {
            info!(
                service = %update.document.service,
                environment = %update.document.environment,
                version = %update.document.version,
                status = %update.document.status,
                "Registered deployment"
            );
        }
        Ok(update)
    }

    #[instrument(skip_all, fields(instance_id = %event.instance_id))]
    pub(crate) async fn handle_task_state_changed(
        &self,
        event: TaskStateChanged,
    ) -> EngineResult<Outcome> {
        let Some(status) = instance_status(event.desired, event.observed) else {
            debug!(
                desired = ?event.desired,
                observed = ?event.observed,
                "No instance status for orchestrator state pair, dropping"
            );
            return Ok(Outcome::Dropped(DropReason::UnknownTransition));
        };

        let Some(artifact) = self.artifacts.resolve_task(&event.containers).await? else {
            debug!("Task image does not resolve to a known artifact, dropping");
            return Ok(Outcome::Dropped(DropReason::UnknownArtifact));
        };
        if artifact.run_mode == RunMode::Job {
            debug!(artifact = %artifact.repo, "Task belongs to a test-suite job, dropping");
            return Ok(Outcome::Dropped(DropReason::NotAService));
        }

        let Some(correlation) = self
            .correlate_orchestrator_event(
                event.lambda_id.as_ref(),
                Some(&artifact.service_name),
                event.task_definition.as_ref(),
            )
            .await?
        else {
            warn!(
                lambda_id = ?event.lambda_id.as_ref().map(|l| l.as_str()),
                service = %artifact.service_name,
                "No deployment matches task event, dropping"
            );
            return Ok(Outcome::Dropped(DropReason::CorrelationMiss));
        };

        let deployment_id = correlation.deployment.cdp_deployment_id.clone();
        if let Some(existing) = correlation.deployment.instances.get(&event.instance_id) {
            if existing.updated_at >= event.occurred_at {
                debug!(deployment_id = %deployment_id, "Stale task event, dropping");
                return Ok(Outcome::Dropped(DropReason::Stale));
            }
        }

        let now = Utc::now();
        let config = &self.config;
        let apply = |d: &mut Deployment| {
            let mut changed = false;
            if let Some(lambda_id) = &event.lambda_id {
                match d.link_lambda(lambda_id) {
                    LinkOutcome::Linked => changed = true,
                    LinkOutcome::AlreadyLinked => {}
                    LinkOutcome::Conflict { .. } => return false,
                }
            }
            changed |= d.learn_task_definition(event.task_definition.as_ref());
            if d
                .record_instance(&event.instance_id, status, event.occurred_at)
                .is_applied()
            {
                d.reconcile(config);
                changed = true;
            }
            if changed {
                d.updated = now;
            }
            changed
        };

        let Some(update) = self.store.update_deployment(&deployment_id, &apply).await? else {
            return Ok(Outcome::Dropped(DropReason::CorrelationMiss));
        };
        if update.changed {
            info!(
                deployment_id = %deployment_id,
                via = ?correlation.via,
                instance_status = ?status,
                status = %update.document.status,
                unstable = update.document.unstable,
                "Applied task state change"
            );
        }
        Ok(Outcome::from_changed(update.changed))
    }

    #[instrument(skip_all, fields(lambda_id = %event.lambda_id))]
    pub(crate) async fn handle_service_deployment_state_changed(
        &self,
        event: ServiceDeploymentStateChanged,
    ) -> EngineResult<Outcome> {
        let Some(correlation) = self
            .correlate_orchestrator_event(Some(&event.lambda_id), None, None)
            .await?
        else {
            warn!(signal = ?event.signal, "No deployment matches service deployment event, dropping");
            return Ok(Outcome::Dropped(DropReason::CorrelationMiss));
        };

        let deployment_id = correlation.deployment.cdp_deployment_id.clone();
        if let Some(existing) = &correlation.deployment.last_service_deployment_signal {
            if existing.observed_at >= event.occurred_at {
                debug!(deployment_id = %deployment_id, "Stale service deployment event, dropping");
                return Ok(Outcome::Dropped(DropReason::Stale));
            }
        }

        let now = Utc::now();
        let config = &self.config;
        let apply = |d: &mut Deployment| {
            if !d.record_signal(event.signal, event.occurred_at) {
                return false;
            }
            d.reconcile(config);
            d.updated = now;
            true
        };

        let Some(update) = self.store.update_deployment(&deployment_id, &apply).await? else {
            return Ok(Outcome::Dropped(DropReason::CorrelationMiss));
        };
        if update.changed {
            info!(
                deployment_id = %deployment_id,
                signal = ?event.signal,
                reason = event.reason.as_deref().unwrap_or(""),
                status = %update.document.status,
                "Applied service deployment signal"
            );
        }
        Ok(Outcome::from_changed(update.changed))
    }
}
