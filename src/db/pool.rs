use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use tracing::info;

use crate::config::DatabaseConfig;
use crate::error::AppError;

/// Open (creating if necessary) the WAL-mode SQLite pool backing the
/// repository. Mirrors the teacher's `create_connection_pool`, adapted
/// from Postgres' `PgPoolOptions` to SQLite's single-writer model: a
/// small pool with a generous busy timeout absorbs the brief write
/// contention WAL mode still allows between the scheduler and the
/// progress monitor.
pub async fn create_pool(config: &DatabaseConfig) -> Result<SqlitePool, AppError> {
    let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", config.path))
        .map_err(|e| AppError::ConfigInvalid(format!("invalid database path: {e}")))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(10));

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .min_connections(1)
        .acquire_timeout(Duration::from_secs(10))
        .connect_with(options)
        .await
        .map_err(AppError::from)?;

    info!(path = %config.path, "connected to sqlite store");
    Ok(pool)
}

pub async fn test_connection(pool: &SqlitePool) -> Result<(), AppError> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}
