//! In-memory status store.
//!
//! Each update holds the write lock for the whole read-modify-write, which
//! gives the same per-document atomicity the Postgres store gets from its
//! revision check. State is lost when the process exits.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use cdp_id::{CdpDeploymentId, EntityName, LambdaId, TaskDefinitionArn};
use cdp_reconcile::{Deployment, Entity};

use super::{
    DeploymentMutation, EntityFactory, EntityMutation, StatusStore, StoreError, StoreResult,
    Update,
};

fn poison_err<T>(_: PoisonError<T>) -> StoreError {
    StoreError::Unavailable("lock poisoned".to_string())
}

/// Thread-safe in-memory [`StatusStore`].
#[derive(Debug, Default)]
pub struct InMemoryStatusStore {
    deployments: RwLock<HashMap<CdpDeploymentId, Deployment>>,
    entities: RwLock<HashMap<EntityName, Entity>>,
}

impl InMemoryStatusStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored deployments.
    pub fn deployment_count(&self) -> StoreResult<usize> {
        Ok(self.deployments.read().map_err(poison_err)?.len())
    }

    /// Number of stored entities.
    pub fn entity_count(&self) -> StoreResult<usize> {
        Ok(self.entities.read().map_err(poison_err)?.len())
    }
}

#[async_trait]
impl StatusStore for InMemoryStatusStore {
    async fn get_deployment(&self, id: &CdpDeploymentId) -> StoreResult<Option<Deployment>> {
        let deployments = self.deployments.read().map_err(poison_err)?;
        Ok(deployments.get(id).cloned())
    }

    async fn find_deployment_by_lambda_id(
        &self,
        lambda_id: &LambdaId,
    ) -> StoreResult<Option<Deployment>> {
        let deployments = self.deployments.read().map_err(poison_err)?;
        Ok(deployments
            .values()
            .find(|d| d.lambda_id.as_ref() == Some(lambda_id))
            .cloned())
    }

    async fn find_latest_deployment_for_task_definition(
        &self,
        service: &str,
        task_definition: &TaskDefinitionArn,
    ) -> StoreResult<Option<Deployment>> {
        let deployments = self.deployments.read().map_err(poison_err)?;
        Ok(deployments
            .values()
            .filter(|d| d.service == service && d.task_definition.as_ref() == Some(task_definition))
            .max_by(|a, b| {
                a.created
                    .cmp(&b.created)
                    .then_with(|| a.cdp_deployment_id.cmp(&b.cdp_deployment_id))
            })
            .cloned())
    }

    async fn list_deployments_for_service(
        &self,
        service: &str,
        environment: Option<&str>,
    ) -> StoreResult<Vec<Deployment>> {
        let deployments = self.deployments.read().map_err(poison_err)?;
        let mut matching: Vec<Deployment> = deployments
            .values()
            .filter(|d| d.service == service)
            .filter(|d| environment.is_none_or(|env| d.environment == env))
            .cloned()
            .collect();
        matching.sort_by(|a, b| {
            b.created
                .cmp(&a.created)
                .then_with(|| a.cdp_deployment_id.cmp(&b.cdp_deployment_id))
        });
        Ok(matching)
    }

    async fn insert_deployment(&self, deployment: Deployment) -> StoreResult<Update<Deployment>> {
        let mut deployments = self.deployments.write().map_err(poison_err)?;
        if let Some(existing) = deployments.get(&deployment.cdp_deployment_id) {
            return Ok(Update::unchanged(existing.clone()));
        }
        deployments.insert(deployment.cdp_deployment_id.clone(), deployment.clone());
        Ok(Update::changed(deployment))
    }

    async fn update_deployment(
        &self,
        id: &CdpDeploymentId,
        mutate: DeploymentMutation<'_>,
    ) -> StoreResult<Option<Update<Deployment>>> {
        let mut deployments = self.deployments.write().map_err(poison_err)?;
        let Some(stored) = deployments.get_mut(id) else {
            return Ok(None);
        };
        let mut working = stored.clone();
        if !mutate(&mut working) {
            return Ok(Some(Update::unchanged(working)));
        }
        *stored = working.clone();
        Ok(Some(Update::changed(working)))
    }

    async fn get_entity(&self, name: &EntityName) -> StoreResult<Option<Entity>> {
        let entities = self.entities.read().map_err(poison_err)?;
        Ok(entities.get(name).cloned())
    }

    async fn list_entity_names(&self) -> StoreResult<Vec<EntityName>> {
        let entities = self.entities.read().map_err(poison_err)?;
        let mut names: Vec<EntityName> = entities.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn upsert_entity(
        &self,
        name: &EntityName,
        create: EntityFactory<'_>,
        mutate: EntityMutation<'_>,
    ) -> StoreResult<Update<Entity>> {
        let mut entities = self.entities.write().map_err(poison_err)?;
        let (mut working, created) = match entities.get(name) {
            Some(existing) => (existing.clone(), false),
            None => (create(), true),
        };
        let mutated = mutate(&mut working);
        if !(mutated || created) {
            return Ok(Update::unchanged(working));
        }
        entities.insert(name.clone(), working.clone());
        Ok(Update::changed(working))
    }

    async fn update_entity(
        &self,
        name: &EntityName,
        mutate: EntityMutation<'_>,
    ) -> StoreResult<Option<Update<Entity>>> {
        let mut entities = self.entities.write().map_err(poison_err)?;
        let Some(stored) = entities.get_mut(name) else {
            return Ok(None);
        };
        let mut working = stored.clone();
        if !mutate(&mut working) {
            return Ok(Some(Update::unchanged(working)));
        }
        *stored = working.clone();
        Ok(Some(Update::changed(working)))
    }
}
