//! Status store abstraction.
//!
//! The engine depends on storage only through [`StatusStore`]. Every write is
//! an atomic read-modify-write of exactly one document: the store loads the
//! document, runs the caller's mutation and persists the result only if the
//! mutation reports a change. Implementations must re-run the mutation on a
//! fresh copy if a concurrent writer got there first.
//!
//! - [`memory::InMemoryStatusStore`] for tests and local development
//! - [`crate::db::PgStatusStore`] for production

pub mod memory;

use async_trait::async_trait;
use cdp_id::{CdpDeploymentId, EntityName, LambdaId, TaskDefinitionArn};
use cdp_reconcile::{Deployment, Entity};
use thiserror::Error;

pub use memory::InMemoryStatusStore;

/// Attempts a compare-and-set update makes before giving up.
pub const MAX_CAS_ATTEMPTS: u32 = 5;

/// Mutation applied inside an atomic update. Returns true if it changed the
/// document. May run more than once.
pub type DeploymentMutation<'a> = &'a (dyn Fn(&mut Deployment) -> bool + Send + Sync);

/// See [`DeploymentMutation`].
pub type EntityMutation<'a> = &'a (dyn Fn(&mut Entity) -> bool + Send + Sync);

/// Filter for bulk entity updates.
pub type EntityPredicate<'a> = &'a (dyn Fn(&Entity) -> bool + Send + Sync);

/// Builds the document written when an upsert finds nothing.
pub type EntityFactory<'a> = &'a (dyn Fn() -> Entity + Send + Sync);

/// Status store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The document kept changing under us.
    #[error("{kind} '{key}' was modified concurrently {attempts} times")]
    Conflict {
        kind: &'static str,
        key: String,
        attempts: u32,
    },

    #[error("stored document is not readable: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Whether the operation may succeed if the message is redelivered.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, StoreError::Serialization(_))
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Result of an atomic update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Update<T> {
    /// The document as stored after the update.
    pub document: T,
    /// Whether the mutation changed and persisted the document.
    pub changed: bool,
}

impl<T> Update<T> {
    pub fn unchanged(document: T) -> Self {
        Self {
            document,
            changed: false,
        }
    }

    pub fn changed(document: T) -> Self {
        Self {
            document,
            changed: true,
        }
    }
}

/// Durable keyed storage for deployment and entity documents.
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Cheap connectivity check used by readiness.
    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }

    // --- Deployments ---

    async fn get_deployment(&self, id: &CdpDeploymentId) -> StoreResult<Option<Deployment>>;

    async fn find_deployment_by_lambda_id(
        &self,
        lambda_id: &LambdaId,
    ) -> StoreResult<Option<Deployment>>;

    /// Most recently created deployment of `service` using `task_definition`.
    async fn find_latest_deployment_for_task_definition(
        &self,
        service: &str,
        task_definition: &TaskDefinitionArn,
    ) -> StoreResult<Option<Deployment>>;

    /// Deployments of a service, newest first, optionally in one environment.
    async fn list_deployments_for_service(
        &self,
        service: &str,
        environment: Option<&str>,
    ) -> StoreResult<Vec<Deployment>>;

    /// Inserts the deployment unless its id is already taken.
    ///
    /// Returns the stored document and whether this call inserted it.
    async fn insert_deployment(&self, deployment: Deployment) -> StoreResult<Update<Deployment>>;

    /// Atomically mutates a deployment. `None` if it does not exist.
    async fn update_deployment(
        &self,
        id: &CdpDeploymentId,
        mutate: DeploymentMutation<'_>,
    ) -> StoreResult<Option<Update<Deployment>>>;

    // --- Entities ---

    async fn get_entity(&self, name: &EntityName) -> StoreResult<Option<Entity>>;

    async fn list_entity_names(&self) -> StoreResult<Vec<EntityName>>;

    /// Atomically mutates an entity, creating it from `create` first if it
    /// does not exist. A created entity is always persisted.
    async fn upsert_entity(
        &self,
        name: &EntityName,
        create: EntityFactory<'_>,
        mutate: EntityMutation<'_>,
    ) -> StoreResult<Update<Entity>>;

    /// Atomically mutates an entity. `None` if it does not exist.
    async fn update_entity(
        &self,
        name: &EntityName,
        mutate: EntityMutation<'_>,
    ) -> StoreResult<Option<Update<Entity>>>;

    /// Applies `mutate` to every entity matching `predicate`.
    ///
    /// The predicate is re-checked inside each atomic update, so entities
    /// changed concurrently since the scan are skipped rather than clobbered.
    /// Returns the number of entities changed.
    async fn bulk_update_entities(
        &self,
        predicate: EntityPredicate<'_>,
        mutate: EntityMutation<'_>,
    ) -> StoreResult<usize> {
        let guarded = |entity: &mut Entity| predicate(entity) && mutate(entity);
        let mut changed = 0;
        for name in self.list_entity_names().await? {
            if let Some(update) = self.update_entity(&name, &guarded).await? {
                if update.changed {
                    changed += 1;
                }
            }
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_retryability() {
        assert!(StoreError::Unavailable("lock poisoned".into()).is_retryable());
        assert!(StoreError::Conflict {
            kind: "deployment",
            key: "dep-1".into(),
            attempts: MAX_CAS_ATTEMPTS
        }
        .is_retryable());

        let bad_json = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert!(!StoreError::from(bad_json).is_retryable());
    }
}
