/// Database layer for Clubhouse
///
/// Manages the SQLite connection pool and embedded migrations, and holds
/// the row models shared by the account, auth and committee services.

pub mod models;

use crate::error::{AppError, AppResult};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::time::Duration;

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
pub async fn create_pool(path: &Path, options: DatabaseOptions) -> AppResult<SqlitePool> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
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
                .busy_timeout(Duration::from_secs(5)),
        )
        .await?;

    Ok(pool)
}

/// Create a private in-memory database with migrations applied
///
/// A single connection keeps every query on the same in-memory database.
pub async fn create_memory_pool() -> AppResult<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(
            SqliteConnectOptions::new()
                .in_memory(true)
                .foreign_keys(true),
        )
        .await?;

    run_migrations(&pool).await?;
    Ok(pool)
}

/// Run migrations for a database
/// Migrations are embedded at compile time from ./migrations directory
pub async fn run_migrations(pool: &SqlitePool) -> AppResult<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| AppError::Internal(format!("Migration failed: {}", e)))?;

    Ok(())
}

/// Test database connection
pub async fn test_connection(pool: &SqlitePool) -> AppResult<()> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_memory_pool_has_schema() {
        let pool = create_memory_pool().await.unwrap();
        test_connection(&pool).await.unwrap();

        let tables: Vec<String> =
            sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type = 'table'")
                .fetch_all(&pool)
                .await
                .unwrap();
        for table in [
            "users",
            "activation_tokens",
            "login_otp",
            "login_attempts",
            "otp_attempts",
            "session_tokens",
            "committee_snapshots",
            "committee_settings",
            "security_logs",
        ] {
            assert!(tables.iter().any(|t| t == table), "missing table {}", table);
        }
    }

    #[tokio::test]
    async fn test_file_pool_creates_parent_directory() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("clubhouse.sqlite");

        let pool = create_pool(&path, DatabaseOptions::default()).await.unwrap();
        run_migrations(&pool).await.unwrap();
        test_connection(&pool).await.unwrap();

        assert!(path.exists());
    }
}
