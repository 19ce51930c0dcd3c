//! Postgres backing for the status engine.
//!
//! [`Database`] owns the pool and hands out the store, queue and artifact
//! catalogue handles that share it.

mod artifacts;
mod error;
mod queue;
mod status_store;

pub use artifacts::{PgArtifactResolver, PgContainerRepositoryCheck};
pub use error::DbError;
pub use queue::PgMessageQueue;
pub use status_store::PgStatusStore;

use std::path::PathBuf;
use std::time::Duration;

use sqlx::migrate::Migrator;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{debug, info};

const DEFAULT_DATABASE_URL: &str = "postgres://localhost/cdp";

/// Pool settings.
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            max_connections: 10,
            min_connections: 1,
            acquire_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(600),
            max_lifetime: Duration::from_secs(1800),
        }
    }
}

fn env_parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|raw| raw.trim().parse().ok())
}

impl DbConfig {
    /// Reads `DATABASE_URL`, `DB_MAX_CONNECTIONS` and `DB_MIN_CONNECTIONS`.
    /// Unset or unparseable values keep their defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            database_url: std::env::var("DATABASE_URL").unwrap_or(defaults.database_url),
            max_connections: env_parsed("DB_MAX_CONNECTIONS").unwrap_or(defaults.max_connections),
            min_connections: env_parsed("DB_MIN_CONNECTIONS").unwrap_or(defaults.min_connections),
            ..defaults
        }
    }
}

/// Where migrations may live relative to the working directory, in lookup
/// order. The crate's own directory comes last so tests find it from anywhere.
fn migration_dirs() -> Vec<PathBuf> {
    vec![
        PathBuf::from("./migrations"),
        PathBuf::from("services/status-engine/migrations"),
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("migrations"),
    ]
}

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub async fn connect(config: &DbConfig) -> Result<Self, DbError> {
        info!(
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            "Connecting to database"
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .idle_timeout(Some(config.idle_timeout))
            .max_lifetime(Some(config.max_lifetime))
            .connect(&config.database_url)
            .await
            .map_err(DbError::Connect)?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Applies the schema from the first migrations directory that loads.
    ///
    /// Only dev mode and tests call this; deployed databases are migrated
    /// separately.
    pub async fn run_migrations(&self) -> Result<(), DbError> {
        let dirs = migration_dirs();
        let mut last_error = None;

        for dir in &dirs {
            match Migrator::new(dir.clone()).await {
                Ok(migrator) => {
                    info!(migrations_dir = %dir.display(), "Applying migrations");
                    return migrator.run(&self.pool).await.map_err(DbError::Migration);
                }
                Err(e) => {
                    debug!(migrations_dir = %dir.display(), error = %e, "Migrations not found");
                    last_error = Some(e.to_string());
                }
            }
        }

        Err(DbError::MigrationDirNotFound {
            tried: dirs
                .iter()
                .map(|dir| dir.display().to_string())
                .collect::<Vec<_>>()
                .join(", "),
            last_error: last_error.unwrap_or_else(|| "no candidates".to_string()),
        })
    }

    pub fn status_store(&self) -> PgStatusStore {
        PgStatusStore::new(self.pool.clone())
    }

    /// Queue handle; received messages stay hidden for `visibility_timeout`.
    pub fn message_queue(&self, visibility_timeout: Duration) -> PgMessageQueue {
        PgMessageQueue::new(self.pool.clone(), visibility_timeout)
    }

    pub fn artifact_resolver(&self) -> PgArtifactResolver {
        PgArtifactResolver::new(self.pool.clone())
    }
}
