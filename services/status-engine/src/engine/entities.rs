//! Entity snapshot merge, explicit lifecycle calls and the bulk sweep.

use std::collections::HashSet;

use cdp_events::{EntityType, EnvironmentStateSnapshot};
use cdp_id::EntityName;
use cdp_reconcile::{derive_entity_status, Entity};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use super::{EngineError, EngineResult, Outcome, StatusEngine};
use crate::resources::{required_resource_checks, ResourceCheckResult, ResourceState};
use crate::store::Update;

/// Explicit entity creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateEntityRequest {
    pub name: EntityName,
    #[serde(rename = "type", default)]
    pub entity_type: EntityType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_type: Option<String>,
    #[serde(default)]
    pub teams: Vec<String>,
}

/// Result of one bulk sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub entities_updated: usize,
}

impl StatusEngine {
    /// Merges one environment's full tenant list into the entity records.
    ///
    /// Listed tenants are upserted; known entities missing from the list
    /// lose that environment. Status is re-derived for every touched entity.
    #[instrument(skip_all, fields(environment = %snapshot.environment, tenants = snapshot.tenants.len()))]
    pub async fn update_environment_state(
        &self,
        snapshot: EnvironmentStateSnapshot,
    ) -> EngineResult<Outcome> {
        let now = Utc::now();
        let environment = snapshot.environment.as_str();
        let at = snapshot.occurred_at;
        let canonical = self.config.environments.as_slice();

        if !canonical.iter().any(|e| e == environment) {
            warn!("Snapshot for an environment outside the canonical list");
        }

        let mut merged = 0usize;
        let mut listed = HashSet::with_capacity(snapshot.tenants.len());
        for tenant in &snapshot.tenants {
            listed.insert(tenant.name.clone());
            let create = || Entity::placeholder(tenant.name.clone(), now);
            let merge = |e: &mut Entity| {
                if !e.merge_tenant(environment, tenant, canonical, at) {
                    return false;
                }
                e.reconcile_status(canonical, now);
                e.updated = now;
                true
            };
            if self
                .store
                .upsert_entity(&tenant.name, &create, &merge)
                .await?
                .changed
            {
                merged += 1;
            }
        }

        let mut removed = 0usize;
        for name in self.store.list_entity_names().await? {
            if listed.contains(&name) {
                continue;
            }
            let remove = |e: &mut Entity| {
                if !e.remove_environment(environment, at) {
                    return false;
                }
                e.reconcile_status(canonical, now);
                e.updated = now;
                true
            };
            if let Some(update) = self.store.update_entity(&name, &remove).await? {
                if update.changed {
                    debug!(entity = %name, status = %update.document.status, "Removed environment from entity");
                    removed += 1;
                }
            }
        }

        if merged + removed > 0 {
            info!(merged, removed, "Applied environment snapshot");
        }
        Ok(Outcome::from_changed(merged + removed > 0))
    }

    /// Creates an entity in `Creating`. No-op if it already exists.
    #[instrument(skip(self, request), fields(entity = %request.name))]
    pub async fn create_entity(&self, request: CreateEntityRequest) -> EngineResult<Update<Entity>> {
        let now = Utc::now();
        let create = || {
            Entity::new(
                request.name.clone(),
                request.entity_type,
                request.sub_type.clone(),
                request.teams.clone(),
                now,
            )
        };
        let update = self
            .store
            .upsert_entity(&request.name, &create, &|_: &mut Entity| false)
            .await?;
        if update.changed {
            info!(entity_type = ?update.document.entity_type, "Created entity");
        }
        Ok(update)
    }

    /// Starts decommissioning an entity.
    ///
    /// The first call records who triggered it and when; later calls change
    /// nothing.
    #[instrument(skip(self, workflows_triggered))]
    pub async fn start_decommission(
        &self,
        name: &EntityName,
        triggered_by: &str,
        workflows_triggered: Vec<String>,
    ) -> EngineResult<Update<Entity>> {
        let now = Utc::now();
        let canonical = self.config.environments.as_slice();
        let start = |e: &mut Entity| {
            if !e.start_decommission(triggered_by, workflows_triggered.clone(), now) {
                return false;
            }
            e.reconcile_status(canonical, now);
            e.updated = now;
            true
        };

        let update = self
            .store
            .update_entity(name, &start)
            .await?
            .ok_or_else(|| EngineError::NotFound {
                kind: "entity",
                key: name.to_string(),
            })?;
        if update.changed {
            info!(status = %update.document.status, "Decommission started");
        }
        Ok(update)
    }

    /// Re-derives status for every entity whose derived status drifted.
    ///
    /// Safe to run at any time and any number of times; a sweep over settled
    /// entities writes nothing.
    #[instrument(skip(self))]
    pub async fn run_bulk_status_sweep(&self) -> EngineResult<SweepReport> {
        let now = Utc::now();
        let canonical = self.config.environments.as_slice();
        let predicate = |e: &Entity| derive_entity_status(e, canonical).is_some();
        let apply = |e: &mut Entity| {
            if !e.reconcile_status(canonical, now) {
                return false;
            }
            e.updated = now;
            true
        };

        let entities_updated = self.store.bulk_update_entities(&predicate, &apply).await?;
        if entities_updated > 0 {
            info!(entities_updated, "Bulk status sweep updated entities");
        } else {
            debug!("Bulk status sweep found nothing to update");
        }
        Ok(SweepReport { entities_updated })
    }

    /// Runs every resource check the entity's type requires.
    #[instrument(skip(self))]
    pub async fn check_entity_resources(
        &self,
        name: &EntityName,
    ) -> EngineResult<Vec<ResourceCheckResult>> {
        let entity = self
            .store
            .get_entity(name)
            .await?
            .ok_or_else(|| EngineError::NotFound {
                kind: "entity",
                key: name.to_string(),
            })?;

        let mut results = Vec::new();
        for kind in required_resource_checks(entity.entity_type) {
            let check = self.resource_checks.iter().find(|c| c.kind() == *kind);
            let (check_name, state) = match check {
                Some(check) => {
                    let state = if check.exists_for(name).await? {
                        ResourceState::Present
                    } else {
                        ResourceState::Missing
                    };
                    (check.name().to_string(), state)
                }
                None => (kind.name().to_string(), ResourceState::Unchecked),
            };
            results.push(ResourceCheckResult {
                check: *kind,
                name: check_name,
                state,
            });
        }
        Ok(results)
    }
}
