//! Artifact resolution for task events.
//!
//! Task events identify what is running only through container image
//! references. The resolver maps an image to a known deployable artifact so
//! the engine can tell service deployments apart from test-suite jobs, which
//! share the same event stream.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use cdp_events::{ContainerImage, ImageRef, RunMode};
use serde::{Deserialize, Serialize};

use crate::store::{StoreError, StoreResult};

/// A deployable artifact known to the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub repo: String,
    pub tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    /// Platform service the artifact belongs to.
    pub service_name: String,
    pub run_mode: RunMode,
}

/// Looks up artifacts by image digest or by repository and tag.
#[async_trait]
pub trait ArtifactResolver: Send + Sync {
    async fn find_by_digest(&self, digest: &str) -> StoreResult<Option<Artifact>>;

    async fn find_by_repo_and_tag(&self, repo: &str, tag: &str) -> StoreResult<Option<Artifact>>;

    /// Resolves one container: digest first, then repository and tag.
    async fn resolve_container(&self, container: &ContainerImage) -> StoreResult<Option<Artifact>> {
        if let Some(digest) = container.image_digest.as_deref() {
            if let Some(artifact) = self.find_by_digest(digest).await? {
                return Ok(Some(artifact));
            }
        }
        let image = ImageRef::parse(&container.image);
        match image.tag.as_deref() {
            Some(tag) => self.find_by_repo_and_tag(&image.repo, tag).await,
            None => Ok(None),
        }
    }

    /// First container of a task that resolves to a known artifact.
    ///
    /// Sidecars (log routers, proxies) are not platform artifacts and are
    /// skipped.
    async fn resolve_task(&self, containers: &[ContainerImage]) -> StoreResult<Option<Artifact>> {
        for container in containers {
            if let Some(artifact) = self.resolve_container(container).await? {
                return Ok(Some(artifact));
            }
        }
        Ok(None)
    }
}

fn poison_err<T>(_: PoisonError<T>) -> StoreError {
    StoreError::Unavailable("lock poisoned".to_string())
}

#[derive(Debug, Default)]
struct Catalogue {
    next_seq: u64,
    /// Keyed by repo and tag; the sequence number records registration order.
    entries: HashMap<(String, String), (u64, Artifact)>,
}

impl Catalogue {
    fn insert(&mut self, artifact: Artifact) {
        self.next_seq += 1;
        self.entries.insert(
            (artifact.repo.clone(), artifact.tag.clone()),
            (self.next_seq, artifact),
        );
    }
}

/// In-memory artifact catalogue.
///
/// When several artifacts share a digest, the most recently registered one
/// wins.
#[derive(Debug, Default)]
pub struct StaticArtifactResolver {
    catalogue: RwLock<Catalogue>,
}

impl StaticArtifactResolver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an artifact, replacing any with the same repo and tag.
    pub fn register(&self, artifact: Artifact) -> StoreResult<()> {
        self.catalogue.write().map_err(poison_err)?.insert(artifact);
        Ok(())
    }

    /// Builder-style [`register`](Self::register) for test setup.
    #[must_use]
    pub fn with_artifact(
        self,
        repo: &str,
        tag: &str,
        service_name: &str,
        run_mode: RunMode,
    ) -> Self {
        if let Ok(mut catalogue) = self.catalogue.write() {
            catalogue.insert(Artifact {
                repo: repo.to_string(),
                tag: tag.to_string(),
                digest: None,
                service_name: service_name.to_string(),
                run_mode,
            });
        }
        self
    }
}

#[async_trait]
impl ArtifactResolver for StaticArtifactResolver {
    async fn find_by_digest(&self, digest: &str) -> StoreResult<Option<Artifact>> {
        let catalogue = self.catalogue.read().map_err(poison_err)?;
        Ok(catalogue
            .entries
            .values()
            .filter(|(_, a)| a.digest.as_deref() == Some(digest))
            .max_by_key(|(seq, _)| *seq)
            .map(|(_, a)| a.clone()))
    }

    async fn find_by_repo_and_tag(&self, repo: &str, tag: &str) -> StoreResult<Option<Artifact>> {
        let catalogue = self.catalogue.read().map_err(poison_err)?;
        Ok(catalogue
            .entries
            .get(&(repo.to_string(), tag.to_string()))
            .map(|(_, a)| a.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn container(image: &str, digest: Option<&str>) -> ContainerImage {
        ContainerImage {
            name: "app".to_string(),
            image: image.to_string(),
            image_digest: digest.map(String::from),
        }
    }

    #[tokio::test]
    async fn test_digest_takes_precedence() {
        let resolver = StaticArtifactResolver::new();
        resolver
            .register(Artifact {
                repo: "service-a".into(),
                tag: "1.0.0".into(),
                digest: Some("sha256:aaa".into()),
                service_name: "service-a".into(),
                run_mode: RunMode::Service,
            })
            .unwrap();
        resolver
            .register(Artifact {
                repo: "service-a".into(),
                tag: "2.0.0".into(),
                digest: None,
                service_name: "service-a".into(),
                run_mode: RunMode::Service,
            })
            .unwrap();

        let found = resolver
            .resolve_container(&container("registry.example.com/service-a:2.0.0", Some("sha256:aaa")))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.tag, "1.0.0");
    }

    fn with_digest(repo: &str, tag: &str, digest: &str, run_mode: RunMode) -> Artifact {
        Artifact {
            repo: repo.into(),
            tag: tag.into(),
            digest: Some(digest.into()),
            service_name: repo.into(),
            run_mode,
        }
    }

    #[tokio::test]
    async fn test_digest_lookup_prefers_newest_registration() {
        let resolver = StaticArtifactResolver::new();
        for i in 0..20 {
            resolver
                .register(with_digest(&format!("old-{i}"), "1.0.0", "sha256:shared", RunMode::Service))
                .unwrap();
        }
        resolver
            .register(with_digest("service-a-tests", "0.1.0", "sha256:shared", RunMode::Job))
            .unwrap();

        let found = resolver.find_by_digest("sha256:shared").await.unwrap().unwrap();
        assert_eq!(found.repo, "service-a-tests");
        assert_eq!(found.run_mode, RunMode::Job);

        // Re-registering an older artifact makes it the newest again.
        resolver
            .register(with_digest("old-3", "1.0.0", "sha256:shared", RunMode::Service))
            .unwrap();
        let found = resolver.find_by_digest("sha256:shared").await.unwrap().unwrap();
        assert_eq!(found.repo, "old-3");
    }

    #[tokio::test]
    async fn test_falls_back_to_repo_and_tag() {
        let resolver = StaticArtifactResolver::new().with_artifact(
            "service-a-tests",
            "0.3.0",
            "service-a-tests",
            RunMode::Job,
        );

        let found = resolver
            .resolve_container(&container(
                "000000000000.dkr.ecr.eu-west-2.amazonaws.com/service-a-tests:0.3.0",
                Some("sha256:unknown"),
            ))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.run_mode, RunMode::Job);
    }

    #[tokio::test]
    async fn test_resolve_task_skips_sidecars() {
        let resolver = StaticArtifactResolver::new().with_artifact(
            "service-a",
            "1.0.0",
            "service-a",
            RunMode::Service,
        );
        let containers = vec![
            container("amazon/aws-for-fluent-bit:stable", None),
            container("service-a:1.0.0", None),
        ];
        let found = resolver.resolve_task(&containers).await.unwrap().unwrap();
        assert_eq!(found.service_name, "service-a");

        assert!(resolver
            .resolve_task(&[container("service-a", None)])
            .await
            .unwrap()
            .is_none());
    }
}
