//! Postgres-backed status store.
//!
//! Documents live in a JSONB `doc` column next to a `revision` counter. An
//! update reads the document and its revision, applies the mutation, and
//! writes back with `WHERE revision = $n`. If another writer bumped the
//! revision in between, the mutation is re-applied to the fresh document.

use async_trait::async_trait;
use cdp_id::{CdpDeploymentId, EntityName, LambdaId, TaskDefinitionArn};
use cdp_reconcile::{Deployment, Entity};
use serde::de::DeserializeOwned;
use sqlx::{
    postgres::{PgPool, PgRow},
    types::Json,
    Row,
};
use tracing::debug;

use crate::store::{
    DeploymentMutation, EntityFactory, EntityMutation, StatusStore, StoreError, StoreResult,
    Update, MAX_CAS_ATTEMPTS,
};

/// A document row as read, before the JSON is decoded.
///
/// Decoding happens outside sqlx so an unreadable document surfaces as
/// [`StoreError::Serialization`] rather than a database error.
struct StoredRow {
    doc: serde_json::Value,
    revision: i64,
}

impl<'r> sqlx::FromRow<'r, PgRow> for StoredRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let Json(doc) = row.try_get::<Json<serde_json::Value>, _>("doc")?;
        Ok(Self {
            doc,
            revision: row.try_get("revision")?,
        })
    }
}

impl StoredRow {
    fn decode<T: DeserializeOwned>(self) -> StoreResult<Versioned<T>> {
        Ok(Versioned {
            doc: serde_json::from_value(self.doc)?,
            revision: self.revision,
        })
    }
}

/// A document together with the revision it was read at.
struct Versioned<T> {
    doc: T,
    revision: i64,
}

fn decode_optional<T: DeserializeOwned>(row: Option<StoredRow>) -> StoreResult<Option<T>> {
    row.map(|row| row.decode::<T>().map(|v| v.doc)).transpose()
}

/// [`StatusStore`] over the `deployments` and `entities` tables.
#[derive(Clone)]
pub struct PgStatusStore {
    pool: PgPool,
}

impl PgStatusStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn load_deployment(&self, id: &CdpDeploymentId) -> StoreResult<Option<Versioned<Deployment>>> {
        let row = sqlx::query_as::<_, StoredRow>(
            r#"
            SELECT doc, revision
            FROM deployments
            WHERE cdp_deployment_id = $1
            "#,
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.map(StoredRow::decode).transpose()
    }

    async fn load_entity(&self, name: &EntityName) -> StoreResult<Option<Versioned<Entity>>> {
        let row = sqlx::query_as::<_, StoredRow>(
            r#"
            SELECT doc, revision
            FROM entities
            WHERE name = $1
            "#,
        )
        .bind(name.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.map(StoredRow::decode).transpose()
    }

    /// Writes `entity` if the stored revision is still `revision`.
    async fn write_entity(&self, entity: &Entity, revision: i64) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE entities
            SET doc = $1, status = $2, updated_at = $3, revision = revision + 1
            WHERE name = $4 AND revision = $5
            "#,
        )
        .bind(Json(entity))
        .bind(entity.status.to_string())
        .bind(entity.updated)
        .bind(entity.name.as_str())
        .bind(revision)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Inserts `entity` unless the name is taken. Returns false on a lost race.
    async fn create_entity(&self, entity: &Entity) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO entities (name, status, doc, revision, created_at, updated_at)
            VALUES ($1, $2, $3, 1, $4, $5)
            ON CONFLICT (name) DO NOTHING
            "#,
        )
        .bind(entity.name.as_str())
        .bind(entity.status.to_string())
        .bind(Json(entity))
        .bind(entity.created)
        .bind(entity.updated)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl StatusStore for PgStatusStore {
    async fn health_check(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn get_deployment(&self, id: &CdpDeploymentId) -> StoreResult<Option<Deployment>> {
        Ok(self.load_deployment(id).await?.map(|v| v.doc))
    }

    async fn find_deployment_by_lambda_id(
        &self,
        lambda_id: &LambdaId,
    ) -> StoreResult<Option<Deployment>> {
        let row = sqlx::query_as::<_, StoredRow>(
            r#"
            SELECT doc, revision
            FROM deployments
            WHERE lambda_id = $1
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(lambda_id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        decode_optional(row)
    }

    async fn find_latest_deployment_for_task_definition(
        &self,
        service: &str,
        task_definition: &TaskDefinitionArn,
    ) -> StoreResult<Option<Deployment>> {
        let row = sqlx::query_as::<_, StoredRow>(
            r#"
            SELECT doc, revision
            FROM deployments
            WHERE service = $1 AND task_definition = $2
            ORDER BY created_at DESC, cdp_deployment_id DESC
            LIMIT 1
            "#,
        )
        .bind(service)
        .bind(task_definition.as_str())
        .fetch_optional(&self.pool)
        .await?;
        decode_optional(row)
    }

    async fn list_deployments_for_service(
        &self,
        service: &str,
        environment: Option<&str>,
    ) -> StoreResult<Vec<Deployment>> {
        let rows = sqlx::query_as::<_, StoredRow>(
            r#"
            SELECT doc, revision
            FROM deployments
            WHERE service = $1 AND ($2::TEXT IS NULL OR environment = $2)
            ORDER BY created_at DESC, cdp_deployment_id ASC
            "#,
        )
        .bind(service)
        .bind(environment)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|row| row.decode::<Deployment>().map(|v| v.doc))
            .collect()
    }

    async fn insert_deployment(&self, deployment: Deployment) -> StoreResult<Update<Deployment>> {
        let result = sqlx::query(
            r#"
            INSERT INTO deployments (
                cdp_deployment_id, lambda_id, service, environment, task_definition,
                status, doc, revision, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, 1, $8, $9)
            ON CONFLICT (cdp_deployment_id) DO NOTHING
            "#,
        )
        .bind(deployment.cdp_deployment_id.as_str())
        .bind(deployment.lambda_id.as_ref().map(|l| l.as_str()))
        .bind(&deployment.service)
        .bind(&deployment.environment)
        .bind(deployment.task_definition.as_ref().map(|t| t.as_str()))
        .bind(deployment.status.to_string())
        .bind(Json(&deployment))
        .bind(deployment.created)
        .bind(deployment.updated)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(Update::changed(deployment));
        }
        match self.load_deployment(&deployment.cdp_deployment_id).await? {
            Some(existing) => Ok(Update::unchanged(existing.doc)),
            None => Err(StoreError::Unavailable(format!(
                "deployment '{}' vanished after insert conflict",
                deployment.cdp_deployment_id
            ))),
        }
    }

    async fn update_deployment(
        &self,
        id: &CdpDeploymentId,
        mutate: DeploymentMutation<'_>,
    ) -> StoreResult<Option<Update<Deployment>>> {
        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let Some(Versioned { mut doc, revision }) = self.load_deployment(id).await? else {
                return Ok(None);
            };
            if !mutate(&mut doc) {
                return Ok(Some(Update::unchanged(doc)));
            }

            let result = sqlx::query(
                r#"
                UPDATE deployments
                SET doc = $1, lambda_id = $2, task_definition = $3, status = $4,
                    updated_at = $5, revision = revision + 1
                WHERE cdp_deployment_id = $6 AND revision = $7
                "#,
            )
            .bind(Json(&doc))
            .bind(doc.lambda_id.as_ref().map(|l| l.as_str()))
            .bind(doc.task_definition.as_ref().map(|t| t.as_str()))
            .bind(doc.status.to_string())
            .bind(doc.updated)
            .bind(id.as_str())
            .bind(revision)
            .execute(&self.pool)
            .await?;

            if result.rows_affected() == 1 {
                return Ok(Some(Update::changed(doc)));
            }
            debug!(deployment_id = %id, attempt, "Deployment revision conflict, retrying");
        }

        Err(StoreError::Conflict {
            kind: "deployment",
            key: id.to_string(),
            attempts: MAX_CAS_ATTEMPTS,
        })
    }

    async fn get_entity(&self, name: &EntityName) -> StoreResult<Option<Entity>> {
        Ok(self.load_entity(name).await?.map(|v| v.doc))
    }

    async fn list_entity_names(&self) -> StoreResult<Vec<EntityName>> {
        let names: Vec<String> = sqlx::query_scalar("SELECT name FROM entities ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        let mut parsed = Vec::with_capacity(names.len());
        for name in names {
            match EntityName::parse(&name) {
                Ok(name) => parsed.push(name),
                Err(e) => debug!(entity = %name, error = %e, "Skipping unparseable entity name"),
            }
        }
        Ok(parsed)
    }

    async fn upsert_entity(
        &self,
        name: &EntityName,
        create: EntityFactory<'_>,
        mutate: EntityMutation<'_>,
    ) -> StoreResult<Update<Entity>> {
        for attempt in 1..=MAX_CAS_ATTEMPTS {
            match self.load_entity(name).await? {
                Some(Versioned { mut doc, revision }) => {
                    if !mutate(&mut doc) {
                        return Ok(Update::unchanged(doc));
                    }
                    if self.write_entity(&doc, revision).await? {
                        return Ok(Update::changed(doc));
                    }
                }
                None => {
                    let mut doc = create();
                    mutate(&mut doc);
                    if self.create_entity(&doc).await? {
                        return Ok(Update::changed(doc));
                    }
                }
            }
            debug!(entity = %name, attempt, "Entity revision conflict, retrying");
        }

        Err(StoreError::Conflict {
            kind: "entity",
            key: name.to_string(),
            attempts: MAX_CAS_ATTEMPTS,
        })
    }

    async fn update_entity(
        &self,
        name: &EntityName,
        mutate: EntityMutation<'_>,
    ) -> StoreResult<Option<Update<Entity>>> {
        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let Some(Versioned { mut doc, revision }) = self.load_entity(name).await? else {
                return Ok(None);
            };
            if !mutate(&mut doc) {
                return Ok(Some(Update::unchanged(doc)));
            }
            if self.write_entity(&doc, revision).await? {
                return Ok(Some(Update::changed(doc)));
            }
            debug!(entity = %name, attempt, "Entity revision conflict, retrying");
        }

        Err(StoreError::Conflict {
            kind: "entity",
            key: name.to_string(),
            attempts: MAX_CAS_ATTEMPTS,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unreadable_document_is_not_retryable() {
        let row = StoredRow {
            doc: json!({"bogus": true}),
            revision: 3,
        };
        let err = match row.decode::<Deployment>() {
            Ok(_) => panic!("expected a decode failure"),
            Err(err) => err,
        };
        assert!(matches!(err, StoreError::Serialization(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_missing_row_decodes_to_none() {
        let decoded: Option<Entity> = decode_optional(None).unwrap();
        assert!(decoded.is_none());
    }
}
