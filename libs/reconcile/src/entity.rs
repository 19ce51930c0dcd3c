//! Entity document and per-environment snapshot merge.

use std::collections::BTreeMap;

use cdp_events::{EntityStatus, EntityType, TenantProgress, TenantState};
use cdp_id::EntityName;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::status_rules::derive_entity_status;

/// Provisioning progress of an entity in one environment.
pub type EnvProgress = TenantProgress;

/// Decommission bookkeeping. Present once a decommission has started.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decommission {
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub triggered_by: String,
    #[serde(default)]
    pub workflows_triggered: Vec<String>,
}

/// CI-supplied descriptors that do not drive status directly.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityMetadata {
    /// Environments the entity is restricted to. `None` means all.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environments: Option<Vec<String>>,
}

impl EntityMetadata {
    fn expects(&self, environment: &str) -> bool {
        self.environments
            .as_ref()
            .is_none_or(|envs| envs.iter().any(|e| e == environment))
    }
}

/// A tenant service tracked across environments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub name: EntityName,
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_type: Option<String>,
    #[serde(default)]
    pub teams: Vec<String>,
    pub status: EntityStatus,
    /// Last tenant configuration reported per environment.
    #[serde(default)]
    pub envs: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub progress: BTreeMap<String, EnvProgress>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decommissioned: Option<Decommission>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<EntityMetadata>,
    /// Timestamp of the newest snapshot applied per environment.
    #[serde(default)]
    pub snapshot_at: BTreeMap<String, DateTime<Utc>>,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

impl Entity {
    pub fn new(
        name: EntityName,
        entity_type: EntityType,
        sub_type: Option<String>,
        teams: Vec<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            name,
            entity_type,
            sub_type,
            teams,
            status: EntityStatus::Creating,
            envs: BTreeMap::new(),
            progress: BTreeMap::new(),
            decommissioned: None,
            metadata: None,
            snapshot_at: BTreeMap::new(),
            created: now,
            updated: now,
        }
    }

    /// Placeholder used when a snapshot mentions an unknown entity.
    pub fn placeholder(name: EntityName, now: DateTime<Utc>) -> Self {
        Self::new(name, EntityType::default(), None, Vec::new(), now)
    }

    pub fn is_decommission_started(&self) -> bool {
        self.decommissioned.is_some()
    }

    /// Whether an environment snapshot taken at `at` is older than the last
    /// one applied for that environment.
    pub fn is_stale_snapshot(&self, environment: &str, at: DateTime<Utc>) -> bool {
        self.snapshot_at
            .get(environment)
            .is_some_and(|applied| *applied > at)
    }

    fn expects(&self, environment: &str) -> bool {
        self.metadata
            .as_ref()
            .is_none_or(|metadata| metadata.expects(environment))
    }

    /// Merges one tenant entry of an environment snapshot.
    ///
    /// Environments outside a declared restriction list get a synthetic
    /// complete progress entry so completion is computed over the full
    /// canonical list. Returns true if the document changed.
    pub fn merge_tenant(
        &mut self,
        environment: &str,
        tenant: &TenantState,
        canonical_environments: &[String],
        at: DateTime<Utc>,
    ) -> bool {
        if self.is_stale_snapshot(environment, at) {
            return false;
        }
        let before = self.clone();

        if let Some(entity_type) = tenant.entity_type {
            self.entity_type = entity_type;
        }
        if tenant.sub_type.is_some() {
            self.sub_type = tenant.sub_type.clone();
        }
        if !tenant.teams.is_empty() {
            self.teams = tenant.teams.clone();
        }

        self.envs
            .insert(environment.to_string(), tenant.config.clone());
        self.progress
            .insert(environment.to_string(), tenant.progress.clone());

        match &tenant.environments {
            Some(restricted) => {
                let metadata = self.metadata.get_or_insert_with(EntityMetadata::default);
                metadata.environments = Some(restricted.clone());
                // Environments added back to the list lose their synthetic entry.
                let envs = &self.envs;
                self.progress
                    .retain(|env, _| !restricted.contains(env) || envs.contains_key(env));
                if !self.is_decommission_started() {
                    for env in canonical_environments {
                        if !restricted.contains(env) {
                            self.progress.insert(
                                env.clone(),
                                EnvProgress {
                                    complete: true,
                                    steps: BTreeMap::new(),
                                },
                            );
                        }
                    }
                }
            }
            None => {
                if let Some(metadata) = self.metadata.as_mut() {
                    metadata.environments = None;
                }
            }
        }

        self.snapshot_at.insert(environment.to_string(), at);
        *self != before
    }

    /// Drops the environment's entries after a snapshot no longer lists the
    /// entity there.
    ///
    /// Synthetic entries for environments the entity is restricted away from
    /// are kept unless a decommission is running. Returns true if anything was
    /// removed.
    pub fn remove_environment(&mut self, environment: &str, at: DateTime<Utc>) -> bool {
        if self.is_stale_snapshot(environment, at) {
            return false;
        }
        if !self.is_decommission_started() && !self.expects(environment) {
            return false;
        }
        let removed_env = self.envs.remove(environment).is_some();
        let removed_progress = self.progress.remove(environment).is_some();
        if removed_env || removed_progress {
            self.snapshot_at.insert(environment.to_string(), at);
            true
        } else {
            false
        }
    }

    /// Records the start of a decommission. Only the first call takes effect.
    ///
    /// Synthetic progress for environments outside the restriction list is
    /// dropped, since no snapshot will ever remove it.
    pub fn start_decommission(
        &mut self,
        triggered_by: &str,
        workflows_triggered: Vec<String>,
        now: DateTime<Utc>,
    ) -> bool {
        if self.is_decommission_started() {
            return false;
        }
        self.decommissioned = Some(Decommission {
            started_at: now,
            finished_at: None,
            triggered_by: triggered_by.to_string(),
            workflows_triggered,
        });
        if let Some(restricted) = self
            .metadata
            .as_ref()
            .and_then(|metadata| metadata.environments.clone())
        {
            self.progress.retain(|env, _| restricted.contains(env));
        }
        true
    }

    /// Whether every canonical environment reports complete progress.
    pub fn all_environments_complete(&self, canonical_environments: &[String]) -> bool {
        canonical_environments.iter().all(|env| {
            self.progress
                .get(env)
                .is_some_and(|progress| progress.complete)
        })
    }

    /// Applies the first matching status rule. Returns true if the status
    /// changed.
    pub fn reconcile_status(
        &mut self,
        canonical_environments: &[String],
        now: DateTime<Utc>,
    ) -> bool {
        match derive_entity_status(self, canonical_environments) {
            Some(rule) => rule.apply(self, now),
            None => false,
        }
    }
}
