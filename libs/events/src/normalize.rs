//! Raw envelope parsing.
//!
//! Two raw shapes reach the queue:
//!
//! - orchestrator event-bus envelopes, discriminated by `detail-type`
//! - platform / CI envelopes, discriminated by `eventType`
//!
//! Anything else is rejected with [`EventError::UnknownEventType`].

use std::collections::BTreeMap;

use cdp_id::{CdpDeploymentId, EntityName, InstanceId, LambdaId, MessageId, TaskDefinitionArn};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::envelope::{
    ContainerImage, DeploymentLinked, EnvironmentStateSnapshot, EventEnvelope, LifecycleEvent,
    ServiceDeploymentStateChanged, TaskStateChanged, TenantProgress, TenantState,
};
use crate::error::EventError;
use crate::types::{
    event_types, DesiredState, EntityType, ObservedState, ProgressStep, ServiceDeploymentSignal,
};

/// Parses one raw queue message into a typed envelope.
pub fn normalize(raw: &[u8]) -> Result<EventEnvelope, EventError> {
    let value: serde_json::Value = serde_json::from_slice(raw)?;
    let object = value
        .as_object()
        .ok_or_else(|| EventError::InvalidPayload("envelope is not a JSON object".to_string()))?;

    let message_id = object
        .get("id")
        .and_then(|v| v.as_str())
        .map(MessageId::parse)
        .transpose()?;

    let event = if let Some(detail_type) = object.get("detail-type").and_then(|v| v.as_str()) {
        let envelope: RawBusEnvelope = serde_json::from_value(value.clone())?;
        normalize_bus_event(detail_type, envelope)?
    } else if let Some(event_type) = object.get("eventType").and_then(|v| v.as_str()) {
        let envelope: RawPlatformEnvelope = serde_json::from_value(value.clone())?;
        normalize_platform_event(event_type, envelope)?
    } else {
        return Err(EventError::UnknownEventType(
            "envelope has neither detail-type nor eventType".to_string(),
        ));
    };

    Ok(EventEnvelope { message_id, event })
}

// =============================================================================
// Orchestrator event bus
// =============================================================================

#[derive(Debug, Deserialize)]
struct RawBusEnvelope {
    #[serde(default)]
    time: Option<DateTime<Utc>>,
    detail: serde_json::Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTaskDetail {
    task_arn: String,
    #[serde(default)]
    task_definition_arn: Option<String>,
    #[serde(default)]
    started_by: Option<String>,
    desired_status: DesiredState,
    last_status: ObservedState,
    #[serde(default)]
    containers: Vec<RawContainer>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawContainer {
    #[serde(default)]
    name: String,
    #[serde(default)]
    image: Option<String>,
    #[serde(default)]
    image_digest: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDeploymentDetail {
    event_name: String,
    deployment_id: String,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
}

fn normalize_bus_event(
    detail_type: &str,
    envelope: RawBusEnvelope,
) -> Result<LifecycleEvent, EventError> {
    match detail_type {
        event_types::ECS_TASK_STATE_CHANGE => {
            let detail: RawTaskDetail = serde_json::from_value(envelope.detail)?;
            let occurred_at = detail
                .updated_at
                .or(envelope.time)
                .ok_or(EventError::MissingField("detail.updatedAt"))?;

            let containers = detail
                .containers
                .into_iter()
                .filter_map(|c| {
                    c.image.map(|image| ContainerImage {
                        name: c.name,
                        image,
                        image_digest: c.image_digest.filter(|d| !d.is_empty()),
                    })
                })
                .collect();

            Ok(LifecycleEvent::TaskStateChanged(TaskStateChanged {
                instance_id: InstanceId::parse(&detail.task_arn)?,
                task_definition: non_empty(detail.task_definition_arn)
                    .map(|arn| TaskDefinitionArn::parse(&arn))
                    .transpose()?,
                lambda_id: non_empty(detail.started_by)
                    .map(|id| LambdaId::parse(&id))
                    .transpose()?,
                desired: detail.desired_status,
                observed: detail.last_status,
                containers,
                occurred_at,
            }))
        }
        event_types::ECS_DEPLOYMENT_STATE_CHANGE => {
            let detail: RawDeploymentDetail = serde_json::from_value(envelope.detail)?;
            let signal = ServiceDeploymentSignal::from_event_name(&detail.event_name)
                .ok_or_else(|| EventError::UnknownEventType(detail.event_name.clone()))?;
            let occurred_at = detail
                .updated_at
                .or(envelope.time)
                .ok_or(EventError::MissingField("detail.updatedAt"))?;

            Ok(LifecycleEvent::ServiceDeploymentStateChanged(
                ServiceDeploymentStateChanged {
                    lambda_id: LambdaId::parse(&detail.deployment_id)?,
                    signal,
                    reason: detail.reason,
                    occurred_at,
                },
            ))
        }
        other => Err(EventError::UnknownEventType(other.to_string())),
    }
}

// =============================================================================
// Platform / CI
// =============================================================================

#[derive(Debug, Deserialize)]
struct RawPlatformEnvelope {
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
    payload: serde_json::Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDeploymentLinked {
    cdp_deployment_id: String,
    lambda_id: String,
    #[serde(default)]
    task_definition_arn: Option<String>,
    #[serde(default)]
    service: Option<String>,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    environment: Option<String>,
    #[serde(default)]
    instance_count: Option<u32>,
    #[serde(default)]
    user: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawEnvironmentState {
    environment: String,
    #[serde(default)]
    tenants: Vec<RawTenant>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTenant {
    name: String,
    #[serde(default, rename = "type")]
    entity_type: Option<EntityType>,
    #[serde(default)]
    sub_type: Option<String>,
    #[serde(default)]
    teams: Vec<String>,
    #[serde(default)]
    config: serde_json::Value,
    #[serde(default)]
    progress: RawProgress,
    #[serde(default)]
    environments: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct RawProgress {
    #[serde(default)]
    complete: Option<bool>,
    #[serde(default)]
    steps: BTreeMap<ProgressStep, bool>,
}

impl From<RawProgress> for TenantProgress {
    fn from(raw: RawProgress) -> Self {
        // CI omits `complete` on older pipelines; derive it from the steps.
        let complete = raw
            .complete
            .unwrap_or_else(|| !raw.steps.is_empty() && raw.steps.values().all(|done| *done));
        TenantProgress {
            complete,
            steps: raw.steps,
        }
    }
}

fn normalize_platform_event(
    event_type: &str,
    envelope: RawPlatformEnvelope,
) -> Result<LifecycleEvent, EventError> {
    let occurred_at = envelope
        .timestamp
        .ok_or(EventError::MissingField("timestamp"))?;

    match event_type {
        event_types::DEPLOYMENT_LINKED => {
            let raw: RawDeploymentLinked = serde_json::from_value(envelope.payload)?;
            Ok(LifecycleEvent::DeploymentLinked(DeploymentLinked {
                cdp_deployment_id: CdpDeploymentId::parse(&raw.cdp_deployment_id)?,
                lambda_id: LambdaId::parse(&raw.lambda_id)?,
                task_definition: non_empty(raw.task_definition_arn)
                    .map(|arn| TaskDefinitionArn::parse(&arn))
                    .transpose()?,
                service: non_empty(raw.service),
                version: non_empty(raw.version),
                environment: non_empty(raw.environment),
                requested_instance_count: raw.instance_count,
                requesting_user: non_empty(raw.user),
                occurred_at,
            }))
        }
        event_types::ENVIRONMENT_STATE => {
            let raw: RawEnvironmentState = serde_json::from_value(envelope.payload)?;
            if raw.environment.is_empty() {
                return Err(EventError::MissingField("payload.environment"));
            }
            let tenants = raw
                .tenants
                .into_iter()
                .map(|t| {
                    Ok(TenantState {
                        name: EntityName::parse(&t.name)?,
                        entity_type: t.entity_type,
                        sub_type: t.sub_type,
                        teams: t.teams,
                        config: t.config,
                        progress: t.progress.into(),
                        environments: t.environments,
                    })
                })
                .collect::<Result<Vec<_>, EventError>>()?;

            Ok(LifecycleEvent::EnvironmentState(EnvironmentStateSnapshot {
                environment: raw.environment,
                tenants,
                occurred_at,
            }))
        }
        other => Err(EventError::UnknownEventType(other.to_string())),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task_event_json(started_by: Option<&str>) -> String {
        let mut detail = serde_json::json!({
            "taskArn": "arn:aws:ecs:eu-west-2:000000000000:task/dev/abc",
            "taskDefinitionArn": "arn:aws:ecs:eu-west-2:000000000000:task-definition/service-a:3",
            "desiredStatus": "RUNNING",
            "lastStatus": "PENDING",
            "containers": [
                {"name": "service-a", "image": "service-a:1.0.0", "imageDigest": "sha256:aaa"},
                {"name": "sidecar"}
            ],
            "updatedAt": "2026-01-01T10:00:00Z"
        });
        if let Some(started_by) = started_by {
            detail["startedBy"] = serde_json::json!(started_by);
        }
        serde_json::json!({
            "id": "b1c2",
            "detail-type": "ECS Task State Change",
            "time": "2026-01-01T10:00:01Z",
            "detail": detail
        })
        .to_string()
    }

    #[test]
    fn test_normalize_task_state_change() {
        let envelope = normalize(task_event_json(Some("ecs-svc/111")).as_bytes()).unwrap();
        assert_eq!(envelope.message_id.unwrap().as_str(), "b1c2");

        let LifecycleEvent::TaskStateChanged(task) = envelope.event else {
            panic!("expected task state change");
        };
        assert_eq!(task.lambda_id.unwrap().as_str(), "ecs-svc/111");
        assert_eq!(task.desired, DesiredState::Running);
        assert_eq!(task.observed, ObservedState::Pending);
        assert_eq!(task.containers.len(), 1);
        assert_eq!(task.containers[0].image_digest.as_deref(), Some("sha256:aaa"));
        assert_eq!(task.occurred_at.to_rfc3339(), "2026-01-01T10:00:00+00:00");
    }

    #[test]
    fn test_normalize_task_without_started_by() {
        let envelope = normalize(task_event_json(None).as_bytes()).unwrap();
        let LifecycleEvent::TaskStateChanged(task) = envelope.event else {
            panic!("expected task state change");
        };
        assert!(task.lambda_id.is_none());
        assert!(task.task_definition.is_some());
    }

    #[test]
    fn test_normalize_service_deployment_state_change() {
        let raw = serde_json::json!({
            "detail-type": "ECS Deployment State Change",
            "time": "2026-01-01T10:05:00Z",
            "detail": {
                "eventName": "SERVICE_DEPLOYMENT_COMPLETED",
                "deploymentId": "ecs-svc/111"
            }
        });
        let envelope = normalize(raw.to_string().as_bytes()).unwrap();
        assert!(envelope.message_id.is_none());
        let LifecycleEvent::ServiceDeploymentStateChanged(event) = envelope.event else {
            panic!("expected service deployment state change");
        };
        assert_eq!(event.signal, ServiceDeploymentSignal::Completed);
        assert_eq!(event.occurred_at.to_rfc3339(), "2026-01-01T10:05:00+00:00");
    }

    #[test]
    fn test_normalize_deployment_linked() {
        let raw = serde_json::json!({
            "eventType": "deployment-linked",
            "timestamp": "2026-01-01T09:59:00Z",
            "payload": {
                "cdpDeploymentId": "5b0c7c4e-2f7d-4b55-8d5e-1f8c1d2b3a4f",
                "lambdaId": "ecs-svc/111",
                "service": "service-a",
                "version": "1.0.0",
                "environment": "dev",
                "instanceCount": 2,
                "user": "A User",
                "taskDefinitionArn": ""
            }
        });
        let envelope = normalize(raw.to_string().as_bytes()).unwrap();
        let LifecycleEvent::DeploymentLinked(event) = envelope.event else {
            panic!("expected deployment linked");
        };
        assert_eq!(event.requested_instance_count, Some(2));
        assert_eq!(event.service.as_deref(), Some("service-a"));
        assert!(event.task_definition.is_none());
    }

    #[test]
    fn test_normalize_environment_state_derives_completion() {
        let raw = serde_json::json!({
            "eventType": "environment-state",
            "timestamp": "2026-01-01T09:00:00Z",
            "payload": {
                "environment": "dev",
                "tenants": [
                    {
                        "name": "service-a",
                        "type": "microservice",
                        "teams": ["platform"],
                        "progress": {"steps": {"cdp-tenant-config": true, "cdp-squid-proxy": true}}
                    },
                    {
                        "name": "service-b",
                        "progress": {"steps": {"cdp-tenant-config": true, "cdp-squid-proxy": false}},
                        "environments": ["dev", "prod"]
                    }
                ]
            }
        });
        let envelope = normalize(raw.to_string().as_bytes()).unwrap();
        let LifecycleEvent::EnvironmentState(snapshot) = envelope.event else {
            panic!("expected environment state");
        };
        assert_eq!(snapshot.environment, "dev");
        assert!(snapshot.tenants[0].progress.complete);
        assert!(!snapshot.tenants[1].progress.complete);
        assert_eq!(
            snapshot.tenants[1].environments.as_deref(),
            Some(&["dev".to_string(), "prod".to_string()][..])
        );
        assert!(snapshot.tenants[0]
            .progress
            .steps
            .contains_key(&ProgressStep::SquidProxy));
    }

    #[test]
    fn test_normalize_rejects_garbage() {
        assert!(matches!(
            normalize(b"not json"),
            Err(EventError::Serialization(_))
        ));
        assert!(matches!(
            normalize(br#"{"hello": "world"}"#),
            Err(EventError::UnknownEventType(_))
        ));
        assert!(matches!(
            normalize(br#"{"detail-type": "EC2 Instance State-change", "detail": {}}"#),
            Err(EventError::UnknownEventType(_))
        ));
    }

    #[test]
    fn test_normalize_rejects_missing_timestamp() {
        let raw = serde_json::json!({
            "eventType": "environment-state",
            "payload": {"environment": "dev", "tenants": []}
        });
        assert!(matches!(
            normalize(raw.to_string().as_bytes()),
            Err(EventError::MissingField("timestamp"))
        ));
    }
}
