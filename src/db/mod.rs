/// Database layer for Breakwater
///
/// Manages the SQLite connection pool and embedded migrations. All
/// stores share one pool; per-store schema lives in ./migrations.
use crate::error::{EngineError, EngineResult};
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;

/// Migrations embedded at compile time from ./migrations
pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Database connection options
#[derive(Debug, Clone)]
pub struct DatabaseOptions {
    pub max_connections: u32,
    pub enable_wal: bool,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self {
            max_connections: 10,
            enable_wal: true,
        }
    }
}

/// Create a SQLite connection pool
pub async fn create_pool(path: &Path, options: DatabaseOptions) -> EngineResult<SqlitePool> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(options.max_connections)
        .connect_with(
            SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true)
                .journal_mode(if options.enable_wal {
                    SqliteJournalMode::Wal
                } else {
                    SqliteJournalMode::Delete
                })
                .foreign_keys(true)
                .busy_timeout(std::time::Duration::from_secs(5)),
        )
        .await
        .map_err(EngineError::Database)?;

    Ok(pool)
}

/// Run migrations for a database
pub async fn run_migrations(pool: &SqlitePool) -> EngineResult<()> {
    MIGRATOR
        .run(pool)
        .await
        .map_err(|e| EngineError::Internal(format!("Migration failed: {}", e)))?;

    Ok(())
}

/// Test database connection
pub async fn test_connection(pool: &SqlitePool) -> EngineResult<()> {
    sqlx::query("SELECT 1")
        .execute(pool)
        .await
        .map_err(EngineError::Database)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pool_with_migrations() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.sqlite");

        let pool = create_pool(&path, DatabaseOptions::default()).await.unwrap();
        run_migrations(&pool).await.unwrap();
        test_connection(&pool).await.unwrap();

        // Migrated schema includes the core tables.
        sqlx::query("SELECT COUNT(*) FROM risk_signals")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("SELECT COUNT(*) FROM enforcement_actions")
            .execute(&pool)
            .await
            .unwrap();
    }
}
