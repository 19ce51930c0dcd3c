//! Entity status rules.
//!
//! Each rule names a target status and a guard. Guards are mutually exclusive,
//! and no guard matches an entity that already has the rule's target status, so
//! re-running the rules over an unchanged entity is a no-op.
//!
//! `Created` and `Decommissioned` are only ever left through the decommission
//! path: `Creating` never matches a created entity and nothing matches a
//! decommissioned one.

use cdp_events::EntityStatus;
use chrono::{DateTime, Utc};

use crate::entity::Entity;

/// One status transition rule of the bulk sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityStatusRule {
    Created,
    Creating,
    Decommissioning,
    Decommissioned,
}

impl EntityStatusRule {
    /// Rules in evaluation order.
    pub const ALL: [EntityStatusRule; 4] = [
        EntityStatusRule::Created,
        EntityStatusRule::Creating,
        EntityStatusRule::Decommissioning,
        EntityStatusRule::Decommissioned,
    ];

    pub fn target(&self) -> EntityStatus {
        match self {
            EntityStatusRule::Created => EntityStatus::Created,
            EntityStatusRule::Creating => EntityStatus::Creating,
            EntityStatusRule::Decommissioning => EntityStatus::Decommissioning,
            EntityStatusRule::Decommissioned => EntityStatus::Decommissioned,
        }
    }

    /// Whether the rule applies to the entity in its current state.
    pub fn matches(&self, entity: &Entity, canonical_environments: &[String]) -> bool {
        if entity.status == self.target() {
            return false;
        }
        match self {
            EntityStatusRule::Created => {
                !entity.is_decommission_started()
                    && entity.all_environments_complete(canonical_environments)
            }
            EntityStatusRule::Creating => {
                !entity.status.is_terminal()
                    && !entity.is_decommission_started()
                    && !entity.all_environments_complete(canonical_environments)
            }
            EntityStatusRule::Decommissioning => {
                entity.is_decommission_started()
                    && !entity.progress.is_empty()
                    && entity.status != EntityStatus::Decommissioned
            }
            EntityStatusRule::Decommissioned => {
                entity.is_decommission_started() && entity.progress.is_empty()
            }
        }
    }

    /// Moves the entity to the rule's target status. Returns true if the
    /// entity changed.
    pub fn apply(&self, entity: &mut Entity, now: DateTime<Utc>) -> bool {
        if entity.status == self.target() {
            return false;
        }
        entity.status = self.target();
        if *self == EntityStatusRule::Decommissioned {
            if let Some(decommission) = entity.decommissioned.as_mut() {
                decommission.finished_at.get_or_insert(now);
            }
            entity.metadata = None;
        }
        true
    }
}

/// The rule that applies to the entity, if any.
pub fn derive_entity_status(
    entity: &Entity,
    canonical_environments: &[String],
) -> Option<EntityStatusRule> {
    EntityStatusRule::ALL
        .into_iter()
        .find(|rule| rule.matches(entity, canonical_environments))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{EntityMetadata, EnvProgress};
    use cdp_id::EntityName;
    use chrono::TimeZone;
    use proptest::prelude::*;
    use rstest::rstest;
    use std::collections::BTreeMap;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 10, 0, 0).unwrap()
    }

    fn envs() -> Vec<String> {
        vec!["dev".into(), "test".into(), "prod".into()]
    }

    fn entity_with(status: EntityStatus, progress: &[(&str, bool)], decommissioning: bool) -> Entity {
        let mut e = Entity::placeholder(EntityName::parse("service-a").unwrap(), t0());
        e.status = status;
        for (env, complete) in progress {
            e.progress.insert(
                env.to_string(),
                EnvProgress {
                    complete: *complete,
                    steps: BTreeMap::new(),
                },
            );
        }
        if decommissioning {
            e.start_decommission("A User", vec![], t0());
        }
        e
    }

    #[rstest]
    #[case(EntityStatus::Creating, &[("dev", true), ("test", true), ("prod", false)], false, None)]
    #[case(EntityStatus::Creating, &[("dev", true), ("test", true), ("prod", true)], false, Some(EntityStatusRule::Created))]
    #[case(EntityStatus::Created, &[("dev", false), ("test", true), ("prod", true)], false, None)]
    #[case(EntityStatus::Created, &[("dev", true), ("test", true), ("prod", true)], true, Some(EntityStatusRule::Decommissioning))]
    #[case(EntityStatus::Decommissioning, &[("dev", true)], true, None)]
    #[case(EntityStatus::Decommissioning, &[], true, Some(EntityStatusRule::Decommissioned))]
    #[case(EntityStatus::Creating, &[], true, Some(EntityStatusRule::Decommissioned))]
    #[case(EntityStatus::Decommissioned, &[("dev", true)], true, None)]
    fn test_derive_entity_status(
        #[case] status: EntityStatus,
        #[case] progress: &[(&str, bool)],
        #[case] decommissioning: bool,
        #[case] expected: Option<EntityStatusRule>,
    ) {
        let entity = entity_with(status, progress, decommissioning);
        assert_eq!(derive_entity_status(&entity, &envs()), expected);
    }

    #[test]
    fn test_missing_environment_is_incomplete() {
        let entity = entity_with(EntityStatus::Created, &[], false);
        let mut creating = entity.clone();
        creating.status = EntityStatus::Creating;
        assert_eq!(derive_entity_status(&creating, &envs()), None);
        assert_eq!(derive_entity_status(&entity, &envs()), None);
    }

    #[test]
    fn test_decommissioned_sets_finished_and_clears_metadata() {
        let mut entity = entity_with(EntityStatus::Decommissioning, &[], true);
        entity.metadata = Some(EntityMetadata {
            environments: Some(vec!["dev".into()]),
        });

        assert!(entity.reconcile_status(&envs(), t0() + chrono::Duration::hours(1)));
        assert_eq!(entity.status, EntityStatus::Decommissioned);
        assert_eq!(entity.metadata, None);
        assert_eq!(
            entity.decommissioned.as_ref().and_then(|d| d.finished_at),
            Some(t0() + chrono::Duration::hours(1))
        );

        assert!(!entity.reconcile_status(&envs(), t0() + chrono::Duration::hours(2)));
    }

    fn progress_strategy() -> impl Strategy<Value = Vec<(usize, bool)>> {
        proptest::collection::vec((0usize..3, any::<bool>()), 0..12)
    }

    proptest! {
        #[test]
        fn prop_created_never_regresses(updates in progress_strategy()) {
            let names = envs();
            let mut entity = entity_with(
                EntityStatus::Creating,
                &[("dev", true), ("test", true), ("prod", true)],
                false,
            );
            entity.reconcile_status(&names, t0());
            prop_assert_eq!(entity.status, EntityStatus::Created);

            for (env, complete) in updates {
                if complete {
                    entity.progress.insert(
                        names[env].clone(),
                        EnvProgress { complete, steps: BTreeMap::new() },
                    );
                } else {
                    entity.progress.remove(&names[env]);
                }
                entity.reconcile_status(&names, t0());
                prop_assert_eq!(entity.status, EntityStatus::Created);
            }
        }

        #[test]
        fn prop_rules_are_idempotent(
            progress in proptest::collection::vec(any::<bool>(), 0..3),
            decommissioning in any::<bool>(),
        ) {
            let names = envs();
            let pairs: Vec<(&str, bool)> = progress
                .iter()
                .enumerate()
                .map(|(i, c)| (names[i].as_str(), *c))
                .collect();
            let mut entity = entity_with(EntityStatus::Creating, &pairs, decommissioning);
            entity.reconcile_status(&names, t0());
            let settled = entity.clone();
            prop_assert!(!entity.reconcile_status(&names, t0()));
            prop_assert_eq!(entity, settled);
        }
    }
}
