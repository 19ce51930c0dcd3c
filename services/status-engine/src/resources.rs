//! Required-resource checks per entity type.
//!
//! Which resources an entity needs depends only on its type, so the mapping
//! is a static table of check kinds. Concrete checks are registered with the
//! engine by kind; a required kind with no registered check is reported as
//! unchecked.

use std::collections::BTreeSet;

use async_trait::async_trait;
use cdp_events::EntityType;
use cdp_id::EntityName;
use serde::{Deserialize, Serialize};

use crate::store::StoreError;

/// A resource an entity may need before it is usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceCheckKind {
    CodeRepository,
    ContainerRepository,
    TenantConfig,
    ServiceInfrastructure,
    AppConfig,
    Dashboards,
}

impl ResourceCheckKind {
    pub fn name(&self) -> &'static str {
        match self {
            ResourceCheckKind::CodeRepository => "code_repository",
            ResourceCheckKind::ContainerRepository => "container_repository",
            ResourceCheckKind::TenantConfig => "tenant_config",
            ResourceCheckKind::ServiceInfrastructure => "service_infrastructure",
            ResourceCheckKind::AppConfig => "app_config",
            ResourceCheckKind::Dashboards => "dashboards",
        }
    }
}

const MICROSERVICE_CHECKS: &[ResourceCheckKind] = &[
    ResourceCheckKind::CodeRepository,
    ResourceCheckKind::ContainerRepository,
    ResourceCheckKind::TenantConfig,
    ResourceCheckKind::ServiceInfrastructure,
    ResourceCheckKind::AppConfig,
    ResourceCheckKind::Dashboards,
];

const TEST_SUITE_CHECKS: &[ResourceCheckKind] = &[
    ResourceCheckKind::CodeRepository,
    ResourceCheckKind::ContainerRepository,
    ResourceCheckKind::TenantConfig,
    ResourceCheckKind::ServiceInfrastructure,
];

const REPOSITORY_CHECKS: &[ResourceCheckKind] = &[ResourceCheckKind::CodeRepository];

const PROTOTYPE_CHECKS: &[ResourceCheckKind] = &[
    ResourceCheckKind::CodeRepository,
    ResourceCheckKind::TenantConfig,
];

/// Ordered resource checks an entity type requires.
pub fn required_resource_checks(entity_type: EntityType) -> &'static [ResourceCheckKind] {
    match entity_type {
        EntityType::Microservice => MICROSERVICE_CHECKS,
        EntityType::TestSuite => TEST_SUITE_CHECKS,
        EntityType::Repository => REPOSITORY_CHECKS,
        EntityType::Prototype => PROTOTYPE_CHECKS,
    }
}

/// Existence check for one kind of resource.
#[async_trait]
pub trait ResourceCheck: Send + Sync {
    fn kind(&self) -> ResourceCheckKind;

    fn name(&self) -> &str {
        self.kind().name()
    }

    async fn exists_for(&self, entity: &EntityName) -> Result<bool, StoreError>;
}

/// Outcome of one required check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceState {
    Present,
    Missing,
    /// No check is registered for this kind.
    Unchecked,
}

/// One line of a resource report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceCheckResult {
    pub check: ResourceCheckKind,
    pub name: String,
    pub state: ResourceState,
}

/// Check backed by a fixed set of entity names.
#[derive(Debug, Clone)]
pub struct StaticResourceCheck {
    kind: ResourceCheckKind,
    present: BTreeSet<String>,
}

impl StaticResourceCheck {
    pub fn new<I, S>(kind: ResourceCheckKind, present: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            kind,
            present: present.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl ResourceCheck for StaticResourceCheck {
    fn kind(&self) -> ResourceCheckKind {
        self.kind
    }

    async fn exists_for(&self, entity: &EntityName) -> Result<bool, StoreError> {
        Ok(self.present.contains(entity.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(EntityType::Microservice, 6)]
    #[case(EntityType::TestSuite, 4)]
    #[case(EntityType::Repository, 1)]
    #[case(EntityType::Prototype, 2)]
    fn test_required_checks_per_type(#[case] entity_type: EntityType, #[case] count: usize) {
        let checks = required_resource_checks(entity_type);
        assert_eq!(checks.len(), count);
        assert_eq!(checks[0], ResourceCheckKind::CodeRepository);
    }

    #[test]
    fn test_test_suites_have_no_dashboards() {
        assert!(!required_resource_checks(EntityType::TestSuite)
            .contains(&ResourceCheckKind::Dashboards));
    }

    #[tokio::test]
    async fn test_static_check() {
        let check = StaticResourceCheck::new(ResourceCheckKind::CodeRepository, ["service-a"]);
        assert_eq!(check.name(), "code_repository");
        assert!(check
            .exists_for(&EntityName::parse("service-a").unwrap())
            .await
            .unwrap());
        assert!(!check
            .exists_for(&EntityName::parse("service-b").unwrap())
            .await
            .unwrap());
    }
}
