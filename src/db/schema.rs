use sqlx::{Row, SqlitePool};
use tracing::info;

use crate::error::AppError;

/// Apply the schema. Every statement is idempotent: `CREATE TABLE IF NOT
/// EXISTS` for new tables, and a PRAGMA-table_info introspection pass for
/// columns added after a table's first release. There is no migration
/// framework or version-numbered up/down scripts — a fresh database and
/// an upgraded one converge on the same shape by running this function.
pub async fn migrate(pool: &SqlitePool) -> Result<(), AppError> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS jobs (
            id TEXT PRIMARY KEY,
            source_path TEXT NOT NULL,
            dest_path TEXT NOT NULL,
            status TEXT NOT NULL,
            category TEXT,
            tags TEXT NOT NULL DEFAULT '[]',
            file_size_bytes INTEGER,
            tuning TEXT NOT NULL DEFAULT '{}',
            progress TEXT NOT NULL DEFAULT '{}',
            retries INTEGER NOT NULL DEFAULT 0,
            max_retries INTEGER NOT NULL DEFAULT 3,
            last_error TEXT,
            metadata TEXT NOT NULL DEFAULT 'null',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            started_at TEXT,
            completed_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS job_attempts (
            id TEXT PRIMARY KEY,
            job_id TEXT NOT NULL REFERENCES jobs(id),
            attempt_num INTEGER NOT NULL,
            status TEXT NOT NULL,
            log TEXT NOT NULL DEFAULT '',
            error TEXT,
            started_at TEXT NOT NULL,
            finished_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_job_attempts_job_id ON job_attempts(job_id)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sync_jobs (
            id TEXT PRIMARY KEY,
            status TEXT NOT NULL,
            stats TEXT NOT NULL DEFAULT '{}',
            last_error TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            started_at TEXT,
            completed_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS kv_store (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    add_column_if_missing(pool, "jobs", "category", "TEXT").await?;
    add_column_if_missing(pool, "jobs", "tags", "TEXT NOT NULL DEFAULT '[]'").await?;
    add_column_if_missing(pool, "jobs", "priority", "INTEGER NOT NULL DEFAULT 0").await?;
    add_column_if_missing(pool, "sync_jobs", "remote_path", "TEXT NOT NULL DEFAULT ''").await?;
    add_column_if_missing(pool, "sync_jobs", "local_path", "TEXT NOT NULL DEFAULT ''").await?;
    add_column_if_missing(pool, "sync_jobs", "rclone_job_id", "INTEGER").await?;
    add_column_if_missing(pool, "sync_jobs", "progress", "TEXT NOT NULL DEFAULT '{}'").await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_priority ON jobs(priority)")
        .execute(pool)
        .await?;

    set_schema_version(pool, 3).await?;

    info!("schema migration complete");
    Ok(())
}

/// Add `column` to `table` if it is not already present, per
/// `PRAGMA table_info`. Used for columns introduced after a table's
/// first release; running this against an up-to-date schema is a no-op.
async fn add_column_if_missing(
    pool: &SqlitePool,
    table: &str,
    column: &str,
    ddl_type: &str,
) -> Result<(), AppError> {
    let rows = sqlx::query(&format!("PRAGMA table_info({table})"))
        .fetch_all(pool)
        .await?;

    let exists = rows
        .iter()
        .any(|row| row.get::<String, _>("name") == column);

    if !exists {
        let stmt = format!("ALTER TABLE {table} ADD COLUMN {column} {ddl_type}");
        sqlx::query(&stmt).execute(pool).await?;
        info!(table, column, "added missing column");
    }

    Ok(())
}

async fn set_schema_version(pool: &SqlitePool, version: i64) -> Result<(), AppError> {
    sqlx::query(
        "INSERT INTO kv_store (key, value) VALUES ('schema_version', ?1)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
    )
    .bind(version.to_string())
    .execute(pool)
    .await?;
    Ok(())
}
