//! Artifact catalogue lookups.

use async_trait::async_trait;
use cdp_events::RunMode;
use cdp_id::EntityName;
use sqlx::{
    postgres::{PgPool, PgRow},
    Row,
};

use crate::artifacts::{Artifact, ArtifactResolver};
use crate::resources::{ResourceCheck, ResourceCheckKind};
use crate::store::{StoreError, StoreResult};

struct ArtifactRow(Artifact);

impl<'r> sqlx::FromRow<'r, PgRow> for ArtifactRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let run_mode: String = row.try_get("run_mode")?;
        let run_mode = match run_mode.as_str() {
            "service" => RunMode::Service,
            "job" => RunMode::Job,
            other => {
                return Err(sqlx::Error::ColumnDecode {
                    index: "run_mode".to_string(),
                    source: format!("unknown run mode '{other}'").into(),
                })
            }
        };
        Ok(Self(Artifact {
            repo: row.try_get("repo")?,
            tag: row.try_get("tag")?,
            digest: row.try_get("digest")?,
            service_name: row.try_get("service_name")?,
            run_mode,
        }))
    }
}

/// [`ArtifactResolver`] over the `artifacts` table.
#[derive(Clone)]
pub struct PgArtifactResolver {
    pool: PgPool,
}

impl PgArtifactResolver {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ArtifactResolver for PgArtifactResolver {
    async fn find_by_digest(&self, digest: &str) -> StoreResult<Option<Artifact>> {
        // Digests can repeat across repos; the newest registration wins.
        let row = sqlx::query_as::<_, ArtifactRow>(
            r#"
            SELECT repo, tag, digest, service_name, run_mode
            FROM artifacts
            WHERE digest = $1
            ORDER BY created_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(digest)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| r.0))
    }

    async fn find_by_repo_and_tag(&self, repo: &str, tag: &str) -> StoreResult<Option<Artifact>> {
        let row = sqlx::query_as::<_, ArtifactRow>(
            r#"
            SELECT repo, tag, digest, service_name, run_mode
            FROM artifacts
            WHERE repo = $1 AND tag = $2
            "#,
        )
        .bind(repo)
        .bind(tag)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| r.0))
    }
}

/// Container repository check: the entity has at least one catalogued
/// artifact.
#[derive(Clone)]
pub struct PgContainerRepositoryCheck {
    pool: PgPool,
}

impl PgContainerRepositoryCheck {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ResourceCheck for PgContainerRepositoryCheck {
    fn kind(&self) -> ResourceCheckKind {
        ResourceCheckKind::ContainerRepository
    }

    async fn exists_for(&self, entity: &EntityName) -> Result<bool, StoreError> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM artifacts WHERE service_name = $1)",
        )
        .bind(entity.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }
}
