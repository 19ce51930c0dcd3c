//! The status reconciliation engine.
//!
//! [`StatusEngine`] routes normalized lifecycle events to the deployment
//! correlator or the entity reconciler and applies the resulting mutation as
//! one atomic update of one document. Every handler is safe to run
//! concurrently with any other handler and with the bulk sweep.
//!
//! Handlers return an [`Outcome`]. Correlation misses, unknown transitions
//! and stale events are successful outcomes, not errors: the message is
//! acknowledged and never retried. Only store failures are retryable.

mod correlator;
mod deployments;
mod entities;

use std::sync::Arc;

use cdp_events::{normalize, EventError, LifecycleEvent};
use cdp_id::{CdpDeploymentId, EntityName, LambdaId};
use cdp_reconcile::{Deployment, Entity, ReconcileConfig};
use thiserror::Error;
use tracing::{instrument, Span};

use crate::artifacts::ArtifactResolver;
use crate::resources::ResourceCheck;
use crate::store::{StatusStore, StoreError};

pub use correlator::{CorrelatedBy, Correlation};
pub use entities::{CreateEntityRequest, SweepReport};

/// Engine operation errors.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The envelope will never parse; ack it and move on.
    #[error("malformed envelope: {0}")]
    Malformed(#[from] EventError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("{kind} '{key}' not found")]
    NotFound { kind: &'static str, key: String },

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl EngineError {
    /// Whether redelivering the message may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::Store(e) => e.is_retryable(),
            EngineError::Malformed(_)
            | EngineError::NotFound { .. }
            | EngineError::InvalidRequest(_) => false,
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Why an event was dropped without touching state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// No deployment matched and none could be synthesized.
    CorrelationMiss,
    /// The (desired, observed) pair has no instance status.
    UnknownTransition,
    /// Older than what is already recorded.
    Stale,
    /// No container image resolved to a known artifact.
    UnknownArtifact,
    /// The artifact is a test-suite job.
    NotAService,
    /// The deployment is already linked to another orchestrator run.
    LambdaConflict,
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::CorrelationMiss => "correlation_miss",
            DropReason::UnknownTransition => "unknown_transition",
            DropReason::Stale => "stale",
            DropReason::UnknownArtifact => "unknown_artifact",
            DropReason::NotAService => "not_a_service",
            DropReason::LambdaConflict => "lambda_conflict",
        }
    }
}

impl std::fmt::Display for DropReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of handling one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// At least one document changed.
    Applied,
    /// The event was understood but changed nothing (a replay).
    Unchanged,
    Dropped(DropReason),
}

impl Outcome {
    pub fn from_changed(changed: bool) -> Self {
        if changed {
            Outcome::Applied
        } else {
            Outcome::Unchanged
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Applied => "applied",
            Outcome::Unchanged => "unchanged",
            Outcome::Dropped(reason) => reason.as_str(),
        }
    }
}

/// Fuses lifecycle events into deployment and entity status.
pub struct StatusEngine {
    store: Arc<dyn StatusStore>,
    artifacts: Arc<dyn ArtifactResolver>,
    resource_checks: Vec<Arc<dyn ResourceCheck>>,
    config: ReconcileConfig,
}

impl StatusEngine {
    pub fn new(
        store: Arc<dyn StatusStore>,
        artifacts: Arc<dyn ArtifactResolver>,
        config: ReconcileConfig,
    ) -> Self {
        Self {
            store,
            artifacts,
            resource_checks: Vec::new(),
            config,
        }
    }

    /// Registers a resource check. A later check of the same kind replaces
    /// an earlier one.
    #[must_use]
    pub fn with_resource_check(mut self, check: Arc<dyn ResourceCheck>) -> Self {
        self.resource_checks.retain(|c| c.kind() != check.kind());
        self.resource_checks.push(check);
        self
    }

    pub fn store(&self) -> &Arc<dyn StatusStore> {
        &self.store
    }

    pub fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    /// Normalizes and handles one raw queue message.
    #[instrument(skip_all, fields(message_id = tracing::field::Empty, kind = tracing::field::Empty))]
    pub async fn handle_message(&self, raw: &[u8]) -> EngineResult<Outcome> {
        let envelope = normalize(raw)?;
        let span = Span::current();
        if let Some(message_id) = &envelope.message_id {
            span.record("message_id", message_id.as_str());
        }
        span.record("kind", envelope.event.kind());
        self.handle_event(envelope.event).await
    }

    /// Handles one normalized event.
    pub async fn handle_event(&self, event: LifecycleEvent) -> EngineResult<Outcome> {
        match event {
            LifecycleEvent::TaskStateChanged(event) => self.handle_task_state_changed(event).await,
            LifecycleEvent::ServiceDeploymentStateChanged(event) => {
                self.handle_service_deployment_state_changed(event).await
            }
            LifecycleEvent::DeploymentLinked(event) => self.handle_deployment_linked(event).await,
            LifecycleEvent::EnvironmentState(snapshot) => {
                self.update_environment_state(snapshot).await
            }
        }
    }

    // --- Reads ---

    pub async fn get_deployment(&self, id: &CdpDeploymentId) -> EngineResult<Option<Deployment>> {
        Ok(self.store.get_deployment(id).await?)
    }

    pub async fn get_deployment_by_lambda_id(
        &self,
        lambda_id: &LambdaId,
    ) -> EngineResult<Option<Deployment>> {
        Ok(self.store.find_deployment_by_lambda_id(lambda_id).await?)
    }

    pub async fn list_deployments_for_service(
        &self,
        service: &str,
        environment: Option<&str>,
    ) -> EngineResult<Vec<Deployment>> {
        Ok(self
            .store
            .list_deployments_for_service(service, environment)
            .await?)
    }

    pub async fn get_entity(&self, name: &EntityName) -> EngineResult<Option<Entity>> {
        Ok(self.store.get_entity(name).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_retryability() {
        let malformed = EngineError::from(EventError::MissingField("detail"));
        assert!(!malformed.is_retryable());

        let store = EngineError::from(StoreError::Unavailable("down".into()));
        assert!(store.is_retryable());

        let missing = EngineError::NotFound {
            kind: "entity",
            key: "service-a".into(),
        };
        assert!(!missing.is_retryable());
        assert_eq!(missing.to_string(), "entity 'service-a' not found");
    }

    #[test]
    fn test_outcome_labels() {
        assert_eq!(Outcome::from_changed(true), Outcome::Applied);
        assert_eq!(Outcome::from_changed(false).as_str(), "unchanged");
        assert_eq!(Outcome::Dropped(DropReason::Stale).as_str(), "stale");
    }
}
