//! Deployment correlation.
//!
//! Orchestrator events name deployments by orchestrator ids; the platform
//! names them by `cdp_deployment_id`. Resolution walks a fallback chain:
//!
//! 1. exact `lambda_id` match
//! 2. newest deployment with the same (service, task definition), used when the
//!    event has no lambda id or the candidate has not been linked yet
//! 3. for link events: link an existing unlinked deployment by platform id
//! 4. for link events: synthesize the deployment from the event itself
//!
//! Anything else is a correlation miss and is dropped.

use cdp_events::DeploymentLinked;
use cdp_id::{CdpDeploymentId, LambdaId, TaskDefinitionArn};
use cdp_reconcile::{Deployment, DeploymentRequest, LinkOutcome};
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::{DropReason, EngineResult, Outcome, StatusEngine};

/// How a deployment was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrelatedBy {
    LambdaId,
    TaskDefinition,
}

/// A resolved deployment.
#[derive(Debug, Clone)]
pub struct Correlation {
    pub deployment: Deployment,
    pub via: CorrelatedBy,
}

/// Request reconstructed from a link event, if it carries enough to stand on
/// its own.
fn synthesize_request(event: &DeploymentLinked) -> Option<DeploymentRequest> {
    Some(DeploymentRequest {
        cdp_deployment_id: event.cdp_deployment_id.clone(),
        environment: event.environment.clone()?,
        service: event.service.clone()?,
        version: event.version.clone()?,
        requested_instance_count: event.requested_instance_count.unwrap_or(1),
        requesting_user: event.requesting_user.clone()?,
        task_definition: event.task_definition.clone(),
        lambda_id: Some(event.lambda_id.clone()),
    })
}

impl StatusEngine {
    /// Steps 1 and 2 of the chain, for task and service events.
    pub(crate) async fn correlate_orchestrator_event(
        &self,
        lambda_id: Option<&LambdaId>,
        service: Option<&str>,
        task_definition: Option<&TaskDefinitionArn>,
    ) -> EngineResult<Option<Correlation>> {
        if let Some(lambda_id) = lambda_id {
            if let Some(deployment) = self.store.find_deployment_by_lambda_id(lambda_id).await? {
                return Ok(Some(Correlation {
                    deployment,
                    via: CorrelatedBy::LambdaId,
                }));
            }
        }

        let (Some(service), Some(task_definition)) = (service, task_definition) else {
            return Ok(None);
        };
        let Some(candidate) = self
            .store
            .find_latest_deployment_for_task_definition(service, task_definition)
            .await?
        else {
            return Ok(None);
        };

        if lambda_id.is_some() && candidate.lambda_id.is_some() {
            debug!(
                deployment_id = %candidate.cdp_deployment_id,
                service,
                task_definition = %task_definition,
                "Task definition candidate already linked to another lambda id"
            );
            return Ok(None);
        }

        Ok(Some(Correlation {
            deployment: candidate,
            via: CorrelatedBy::TaskDefinition,
        }))
    }

    /// Links `lambda_id` onto an existing deployment. `None` if the
    /// deployment does not exist.
    async fn link_existing(
        &self,
        id: &CdpDeploymentId,
        event: &DeploymentLinked,
        now: DateTime<Utc>,
    ) -> EngineResult<Option<Outcome>> {
        let link = |d: &mut Deployment| {
            let mut changed = match d.link_lambda(&event.lambda_id) {
                LinkOutcome::Linked => true,
                LinkOutcome::AlreadyLinked => false,
                LinkOutcome::Conflict { .. } => return false,
            };
            changed |= d.learn_task_definition(event.task_definition.as_ref());
            if changed {
                d.updated = now;
            }
            changed
        };

        let Some(update) = self.store.update_deployment(id, &link).await? else {
            return Ok(None);
        };

        match &update.document.lambda_id {
            Some(linked) if *linked == event.lambda_id => {
                if update.changed {
                    info!(
                        deployment_id = %id,
                        lambda_id = %event.lambda_id,
                        "Linked deployment to orchestrator deployment"
                    );
                }
                Ok(Some(Outcome::from_changed(update.changed)))
            }
            existing => {
                warn!(
                    deployment_id = %id,
                    lambda_id = %event.lambda_id,
                    existing_lambda_id = ?existing.as_ref().map(|l| l.as_str()),
                    "Deployment already linked to a different lambda id, dropping"
                );
                Ok(Some(Outcome::Dropped(DropReason::LambdaConflict)))
            }
        }
    }

    /// Handles a platform deployer link event.
    pub(crate) async fn handle_deployment_linked(
        &self,
        event: DeploymentLinked,
    ) -> EngineResult<Outcome> {
        let now = Utc::now();

        if let Some(existing) = self
            .store
            .find_deployment_by_lambda_id(&event.lambda_id)
            .await?
        {
            if existing.cdp_deployment_id != event.cdp_deployment_id {
                warn!(
                    lambda_id = %event.lambda_id,
                    deployment_id = %event.cdp_deployment_id,
                    linked_deployment_id = %existing.cdp_deployment_id,
                    "Lambda id already linked to a different deployment, dropping"
                );
                return Ok(Outcome::Dropped(DropReason::LambdaConflict));
            }
            // Replay of a link already applied; may still carry a task definition.
            let id = existing.cdp_deployment_id;
            return Ok(self
                .link_existing(&id, &event, now)
                .await?
                .unwrap_or(Outcome::Unchanged));
        }

        if let Some(outcome) = self
            .link_existing(&event.cdp_deployment_id, &event, now)
            .await?
        {
            return Ok(outcome);
        }

        let Some(request) = synthesize_request(&event) else {
            warn!(
                deployment_id = %event.cdp_deployment_id,
                lambda_id = %event.lambda_id,
                "No deployment for link event and not enough detail to synthesize one, dropping"
            );
            return Ok(Outcome::Dropped(DropReason::CorrelationMiss));
        };

        let inserted = self
            .store
            .insert_deployment(Deployment::from_request(request, now))
            .await?;
        if inserted.changed {
            info!(
                deployment_id = %event.cdp_deployment_id,
                lambda_id = %event.lambda_id,
                service = %inserted.document.service,
                environment = %inserted.document.environment,
                "Synthesized deployment from link event"
            );
            return Ok(Outcome::Applied);
        }

        // Lost an insert race with a concurrent register or link.
        Ok(self
            .link_existing(&event.cdp_deployment_id, &event, now)
            .await?
            .unwrap_or(Outcome::Dropped(DropReason::CorrelationMiss)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::StaticArtifactResolver;
    use crate::store::InMemoryStatusStore;
    use cdp_reconcile::ReconcileConfig;
    use std::sync::Arc;

    fn link_event() -> DeploymentLinked {
        DeploymentLinked {
            cdp_deployment_id: CdpDeploymentId::parse("dep-1").unwrap(),
            lambda_id: LambdaId::parse("ecs-svc/1").unwrap(),
            task_definition: None,
            service: Some("service-a".into()),
            version: Some("1.0.0".into()),
            environment: Some("dev".into()),
            requested_instance_count: None,
            requesting_user: Some("A User".into()),
            occurred_at: Utc::now(),
        }
    }

    #[test]
    fn test_synthesize_requires_core_fields() {
        let request = synthesize_request(&link_event()).unwrap();
        assert_eq!(request.requested_instance_count, 1);
        assert_eq!(request.lambda_id.unwrap().as_str(), "ecs-svc/1");

        let mut event = link_event();
        event.requesting_user = None;
        assert!(synthesize_request(&event).is_none());
    }

    const TASK_DEFINITION: &str = "arn:aws:ecs:eu-west-2:000000000000:task-definition/service-a:7";

    async fn engine_with(deployment: Deployment) -> StatusEngine {
        let engine = StatusEngine::new(
            Arc::new(InMemoryStatusStore::new()),
            Arc::new(StaticArtifactResolver::new()),
            ReconcileConfig::default(),
        );
        engine.store.insert_deployment(deployment).await.unwrap();
        engine
    }

    fn registered(lambda_id: Option<&str>) -> Deployment {
        let mut request = synthesize_request(&link_event()).unwrap();
        request.lambda_id = lambda_id.map(|l| LambdaId::parse(l).unwrap());
        request.task_definition = Some(TaskDefinitionArn::parse(TASK_DEFINITION).unwrap());
        Deployment::from_request(request, Utc::now())
    }

    #[tokio::test]
    async fn test_correlates_by_lambda_id_then_task_definition() {
        let engine = engine_with(registered(Some("ecs-svc/1"))).await;
        let task_definition = TaskDefinitionArn::parse(TASK_DEFINITION).unwrap();

        let by_lambda = engine
            .correlate_orchestrator_event(Some(&LambdaId::parse("ecs-svc/1").unwrap()), None, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_lambda.via, CorrelatedBy::LambdaId);

        let by_task_definition = engine
            .correlate_orchestrator_event(None, Some("service-a"), Some(&task_definition))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_task_definition.via, CorrelatedBy::TaskDefinition);
        assert_eq!(by_task_definition.deployment.cdp_deployment_id.as_str(), "dep-1");
    }

    #[tokio::test]
    async fn test_linked_candidate_is_not_taken_by_another_lambda_id() {
        let engine = engine_with(registered(Some("ecs-svc/1"))).await;
        let task_definition = TaskDefinitionArn::parse(TASK_DEFINITION).unwrap();

        let other = LambdaId::parse("ecs-svc/2").unwrap();
        let miss = engine
            .correlate_orchestrator_event(Some(&other), Some("service-a"), Some(&task_definition))
            .await
            .unwrap();
        assert!(miss.is_none());

        let engine = engine_with(registered(None)).await;
        let hit = engine
            .correlate_orchestrator_event(Some(&other), Some("service-a"), Some(&task_definition))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(hit.via, CorrelatedBy::TaskDefinition);
    }
}
