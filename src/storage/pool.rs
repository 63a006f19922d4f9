//! Database connection and pool management.
//!
//! The database type is inferred from the connection URL scheme
//! (`sqlite:` vs `postgres:`/`postgresql:`) rather than configured
//! separately — there is exactly one `database.url` knob in the YAML
//! schema (§6).

use sqlx::{migrate::MigrateDatabase, Pool, Sqlite};
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

#[cfg(feature = "postgres")]
use sqlx::Postgres;

use crate::config::DatabaseConfig;
use crate::domain::{ControlPlaneError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseType {
    Sqlite,
    #[cfg(feature = "postgres")]
    Postgres,
}

fn infer_database_type(url: &str) -> Result<DatabaseType> {
    if url.starts_with("sqlite:") {
        return Ok(DatabaseType::Sqlite);
    }
    #[cfg(feature = "postgres")]
    if url.starts_with("postgres:") || url.starts_with("postgresql:") {
        return Ok(DatabaseType::Postgres);
    }
    Err(ControlPlaneError::config(format!(
        "unrecognized database url scheme in '{url}'"
    )))
}

/// SQLite connection pool manager.
#[derive(Clone)]
pub struct SqlitePool {
    pool: Pool<Sqlite>,
}

impl SqlitePool {
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        info!(url = %config.url, "creating sqlite connection pool");

        if !config.url.contains(":memory:") && !Sqlite::database_exists(&config.url).await? {
            info!(url = %config.url, "creating sqlite database");
            Sqlite::create_database(&config.url).await?;
        }

        let connect_options = sqlx::sqlite::SqliteConnectOptions::from_str(&config.url)
            .map_err(|e| ControlPlaneError::config(e.to_string()))?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(30))
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true);

        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(config.pool_size)
            .connect_with(connect_options)
            .await?;

        let instance = Self { pool };

        if config.run_migrations {
            instance.run_migrations().await?;
        }

        info!("sqlite pool ready");
        Ok(instance)
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn run_migrations(&self) -> Result<()> {
        info!("running sqlite migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| ControlPlaneError::internal(format!("migration failed: {e}")))?;
        Ok(())
    }

    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            connections: self.pool.size(),
            idle_connections: self.pool.num_idle() as u32,
        }
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// PostgreSQL connection pool manager.
#[cfg(feature = "postgres")]
#[derive(Clone)]
pub struct PostgresPool {
    pool: Pool<Postgres>,
}

#[cfg(feature = "postgres")]
impl PostgresPool {
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        info!(url = %config.url, "creating postgres connection pool");

        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(config.pool_size)
            .acquire_timeout(Duration::from_secs(30))
            .connect(&config.url)
            .await?;

        let instance = Self { pool };

        if config.run_migrations {
            instance.run_migrations().await?;
        }

        info!("postgres pool ready");
        Ok(instance)
    }

    pub fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }

    pub async fn run_migrations(&self) -> Result<()> {
        info!("running postgres migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| ControlPlaneError::internal(format!("migration failed: {e}")))?;
        Ok(())
    }

    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            connections: self.pool.size(),
            idle_connections: self.pool.num_idle() as u32,
        }
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PoolStats {
    pub connections: u32,
    pub idle_connections: u32,
}

/// Unified pool handle the rest of the crate depends on, so repository
/// code never matches on feature flags itself.
#[derive(Clone)]
pub enum DatabasePool {
    Sqlite(SqlitePool),
    #[cfg(feature = "postgres")]
    Postgres(PostgresPool),
}

impl DatabasePool {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        match infer_database_type(&config.url)? {
            DatabaseType::Sqlite => Ok(DatabasePool::Sqlite(SqlitePool::new(config).await?)),
            #[cfg(feature = "postgres")]
            DatabaseType::Postgres => Ok(DatabasePool::Postgres(PostgresPool::new(config).await?)),
        }
    }

    pub async fn health_check(&self) -> Result<()> {
        match self {
            DatabasePool::Sqlite(pool) => pool.health_check().await,
            #[cfg(feature = "postgres")]
            DatabasePool::Postgres(pool) => pool.health_check().await,
        }
    }

    pub fn stats(&self) -> PoolStats {
        match self {
            DatabasePool::Sqlite(pool) => pool.stats(),
            #[cfg(feature = "postgres")]
            DatabasePool::Postgres(pool) => pool.stats(),
        }
    }

    pub async fn close(&self) {
        match self {
            DatabasePool::Sqlite(pool) => pool.close().await,
            #[cfg(feature = "postgres")]
            DatabasePool::Postgres(pool) => pool.close().await,
        }
    }
}
