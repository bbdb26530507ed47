use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{AttemptStatus, Job, JobAttempt, JobStatus, SyncJob, SyncStats, SyncStatus};

const DEFAULT_LIMIT: i64 = 50;
const MAX_LIMIT: i64 = 1000;

/// Columns a caller may sort by. Whitelisted so `sort_by` can be taken
/// from untrusted input (the HTTP layer) without opening a SQL
/// injection hole through string interpolation.
const SORTABLE_JOB_COLUMNS: &[&str] = &["priority", "created_at", "updated_at", "status"];
const SORTABLE_SYNC_COLUMNS: &[&str] = &["created_at", "updated_at", "status"];

/// Persistence layer over the SQLite store. Every query goes through the
/// runtime `sqlx::query`/`query_as` API rather than the `query!` macros:
/// the macros need either a live database connection or a cached
/// `sqlx-data.json` at compile time, neither of which this crate can
/// assume is available. Row -> domain-struct mapping is therefore done
/// by hand in the `row_to_*` helpers below.
#[derive(Clone)]
pub struct Repository {
    pool: SqlitePool,
}

/// Filter for listing jobs. Unset fields are unconstrained. `statuses`
/// empty means "any status". Sorting defaults to `priority DESC`, which
/// is what the scheduler relies on to dequeue in priority order.
#[derive(Debug, Clone)]
pub struct JobFilter {
    pub statuses: Vec<JobStatus>,
    pub category: Option<String>,
    pub min_priority: Option<i32>,
    pub max_priority: Option<i32>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub sort_by: Option<String>,
    pub sort_desc: bool,
}

impl Default for JobFilter {
    fn default() -> Self {
        Self {
            statuses: Vec::new(),
            category: None,
            min_priority: None,
            max_priority: None,
            limit: None,
            offset: None,
            sort_by: None,
            sort_desc: true,
        }
    }
}

/// Filter for listing sync jobs. Mirrors `JobFilter` minus the
/// job-only fields (no priority, no category).
#[derive(Debug, Clone)]
pub struct SyncJobFilter {
    pub statuses: Vec<SyncStatus>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub sort_by: Option<String>,
    pub sort_desc: bool,
}

impl Default for SyncJobFilter {
    fn default() -> Self {
        Self {
            statuses: Vec::new(),
            limit: None,
            offset: None,
            sort_by: None,
            sort_desc: true,
        }
    }
}

fn clamp_limit(limit: Option<i64>) -> i64 {
    limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
}

fn sortable_column<'a>(requested: &Option<String>, allowed: &'a [&'a str], default: &'a str) -> &'a str {
    match requested {
        Some(col) => allowed.iter().copied().find(|c| *c == col).unwrap_or(default),
        None => default,
    }
}

impl Repository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // --- Jobs ---------------------------------------------------------

    pub async fn create_job(&self, job: &Job) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO jobs (
                id, source_path, dest_path, status, priority, category, tags,
                file_size_bytes, tuning, progress, retries, max_retries,
                last_error, metadata, created_at, updated_at, started_at, completed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)
            "#,
        )
        .bind(job.id.to_string())
        .bind(&job.source_path)
        .bind(&job.dest_path)
        .bind(job.status.as_str())
        .bind(job.priority)
        .bind(&job.category)
        .bind(serde_json::to_string(&job.tags)?)
        .bind(job.file_size_bytes.map(|v| v as i64))
        .bind(serde_json::to_string(&job.tuning)?)
        .bind(serde_json::to_string(&job.progress)?)
        .bind(job.retries as i64)
        .bind(job.max_retries as i64)
        .bind(&job.last_error)
        .bind(serde_json::to_string(&job.metadata)?)
        .bind(job.created_at.to_rfc3339())
        .bind(job.updated_at.to_rfc3339())
        .bind(job.started_at.map(|t| t.to_rfc3339()))
        .bind(job.completed_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_job(&self, id: Uuid) -> Result<Job, AppError> {
        let row = sqlx::query("SELECT * FROM jobs WHERE id = ?1")
            .bind(id.to_string())
            .fetch_one(&self.pool)
            .await?;

        row_to_job(&row)
    }

    pub async fn update_job(&self, job: &Job) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE jobs SET
                source_path = ?2, dest_path = ?3, status = ?4, priority = ?5, category = ?6,
                tags = ?7, file_size_bytes = ?8, tuning = ?9, progress = ?10,
                retries = ?11, max_retries = ?12, last_error = ?13, metadata = ?14,
                updated_at = ?15, started_at = ?16, completed_at = ?17
            WHERE id = ?1
            "#,
        )
        .bind(job.id.to_string())
        .bind(&job.source_path)
        .bind(&job.dest_path)
        .bind(job.status.as_str())
        .bind(job.priority)
        .bind(&job.category)
        .bind(serde_json::to_string(&job.tags)?)
        .bind(job.file_size_bytes.map(|v| v as i64))
        .bind(serde_json::to_string(&job.tuning)?)
        .bind(serde_json::to_string(&job.progress)?)
        .bind(job.retries as i64)
        .bind(job.max_retries as i64)
        .bind(&job.last_error)
        .bind(serde_json::to_string(&job.metadata)?)
        .bind(job.updated_at.to_rfc3339())
        .bind(job.started_at.map(|t| t.to_rfc3339()))
        .bind(job.completed_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("job {id}", id = job.id)));
        }
        Ok(())
    }

    pub async fn delete_job(&self, id: Uuid) -> Result<(), AppError> {
        let result = sqlx::query("DELETE FROM jobs WHERE id = ?1")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("job {id}")));
        }
        Ok(())
    }

    pub async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>, AppError> {
        let mut sql = String::from("SELECT * FROM jobs WHERE 1=1");

        if !filter.statuses.is_empty() {
            let placeholders = vec!["?"; filter.statuses.len()].join(", ");
            sql.push_str(&format!(" AND status IN ({placeholders})"));
        }
        if filter.category.is_some() {
            sql.push_str(" AND category = ?");
        }
        if filter.min_priority.is_some() {
            sql.push_str(" AND priority >= ?");
        }
        if filter.max_priority.is_some() {
            sql.push_str(" AND priority <= ?");
        }

        let sort_col = sortable_column(&filter.sort_by, SORTABLE_JOB_COLUMNS, "priority");
        let direction = if filter.sort_desc { "DESC" } else { "ASC" };
        sql.push_str(&format!(" ORDER BY {sort_col} {direction}, created_at ASC"));

        let limit = clamp_limit(filter.limit);
        sql.push_str(" LIMIT ?");
        if filter.offset.is_some() {
            sql.push_str(" OFFSET ?");
        }

        let mut query = sqlx::query(&sql);
        for status in &filter.statuses {
            query = query.bind(status.as_str());
        }
        if let Some(category) = &filter.category {
            query = query.bind(category);
        }
        if let Some(min) = filter.min_priority {
            query = query.bind(min);
        }
        if let Some(max) = filter.max_priority {
            query = query.bind(max);
        }
        query = query.bind(limit);
        if let Some(offset) = filter.offset {
            query = query.bind(offset);
        }

        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(row_to_job).collect()
    }

    /// Jobs left in `Pending` or `Running` by an unclean shutdown. Used
    /// by the scheduler's recovery pass to requeue them, ordered by
    /// priority so recovery preserves the same admission order a clean
    /// start would have used.
    pub async fn list_recoverable_jobs(&self) -> Result<Vec<Job>, AppError> {
        let rows = sqlx::query(
            "SELECT * FROM jobs WHERE status IN ('pending', 'running') ORDER BY priority DESC, created_at ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_job).collect()
    }

    /// Counts of jobs grouped by status, for introspection/metrics.
    pub async fn job_summary(&self) -> Result<Vec<(JobStatus, i64)>, AppError> {
        let rows = sqlx::query("SELECT status, COUNT(*) as n FROM jobs GROUP BY status")
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| {
                let status: String = row.get("status");
                let status = status.parse::<JobStatus>().map_err(AppError::Internal)?;
                Ok((status, row.get::<i64, _>("n")))
            })
            .collect()
    }

    /// Delete terminal jobs older than the configured retention window.
    /// Completed and failed jobs may have different retention periods.
    pub async fn cleanup_old_jobs(
        &self,
        completed_before: DateTime<Utc>,
        failed_before: DateTime<Utc>,
    ) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"
            DELETE FROM jobs
            WHERE (status = 'completed' AND completed_at < ?1)
               OR (status IN ('failed', 'cancelled') AND completed_at < ?2)
            "#,
        )
        .bind(completed_before.to_rfc3339())
        .bind(failed_before.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    // --- Job attempts ---------------------------------------------------

    pub async fn create_attempt(&self, attempt: &JobAttempt) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO job_attempts (id, job_id, attempt_num, status, log, error, started_at, finished_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(attempt.id.to_string())
        .bind(attempt.job_id.to_string())
        .bind(attempt.attempt_num as i64)
        .bind(attempt.status.as_str())
        .bind(&attempt.log)
        .bind(&attempt.error)
        .bind(attempt.started_at.to_rfc3339())
        .bind(attempt.finished_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn update_attempt(&self, attempt: &JobAttempt) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE job_attempts SET status = ?2, log = ?3, error = ?4, finished_at = ?5
            WHERE id = ?1
            "#,
        )
        .bind(attempt.id.to_string())
        .bind(attempt.status.as_str())
        .bind(&attempt.log)
        .bind(&attempt.error)
        .bind(attempt.finished_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn list_attempts(&self, job_id: Uuid) -> Result<Vec<JobAttempt>, AppError> {
        let rows = sqlx::query("SELECT * FROM job_attempts WHERE job_id = ?1 ORDER BY attempt_num ASC")
            .bind(job_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_attempt).collect()
    }

    // --- Sync jobs -------------------------------------------------------

    pub async fn create_sync_job(&self, sync: &SyncJob) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO sync_jobs (
                id, remote_path, local_path, status, rclone_job_id, progress, stats, last_error,
                created_at, updated_at, started_at, completed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
        )
        .bind(sync.id.to_string())
        .bind(&sync.remote_path)
        .bind(&sync.local_path)
        .bind(sync.status.as_str())
        .bind(sync.rclone_job_id)
        .bind(serde_json::to_string(&sync.progress)?)
        .bind(serde_json::to_string(&sync.stats)?)
        .bind(&sync.last_error)
        .bind(sync.created_at.to_rfc3339())
        .bind(sync.updated_at.to_rfc3339())
        .bind(sync.started_at.map(|t| t.to_rfc3339()))
        .bind(sync.completed_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn update_sync_job(&self, sync: &SyncJob) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE sync_jobs SET status = ?2, rclone_job_id = ?3, progress = ?4, stats = ?5,
                last_error = ?6, updated_at = ?7, started_at = ?8, completed_at = ?9
            WHERE id = ?1
            "#,
        )
        .bind(sync.id.to_string())
        .bind(sync.status.as_str())
        .bind(sync.rclone_job_id)
        .bind(serde_json::to_string(&sync.progress)?)
        .bind(serde_json::to_string(&sync.stats)?)
        .bind(&sync.last_error)
        .bind(sync.updated_at.to_rfc3339())
        .bind(sync.started_at.map(|t| t.to_rfc3339()))
        .bind(sync.completed_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("sync job {id}", id = sync.id)));
        }
        Ok(())
    }

    pub async fn delete_sync_job(&self, id: Uuid) -> Result<(), AppError> {
        let result = sqlx::query("DELETE FROM sync_jobs WHERE id = ?1")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("sync job {id}")));
        }
        Ok(())
    }

    pub async fn get_sync_job(&self, id: Uuid) -> Result<SyncJob, AppError> {
        let row = sqlx::query("SELECT * FROM sync_jobs WHERE id = ?1")
            .bind(id.to_string())
            .fetch_one(&self.pool)
            .await?;
        row_to_sync_job(&row)
    }

    pub async fn list_sync_jobs(&self, filter: &SyncJobFilter) -> Result<Vec<SyncJob>, AppError> {
        let mut sql = String::from("SELECT * FROM sync_jobs WHERE 1=1");

        if !filter.statuses.is_empty() {
            let placeholders = vec!["?"; filter.statuses.len()].join(", ");
            sql.push_str(&format!(" AND status IN ({placeholders})"));
        }

        let sort_col = sortable_column(&filter.sort_by, SORTABLE_SYNC_COLUMNS, "created_at");
        let direction = if filter.sort_desc { "DESC" } else { "ASC" };
        sql.push_str(&format!(" ORDER BY {sort_col} {direction}"));

        let limit = clamp_limit(filter.limit);
        sql.push_str(" LIMIT ?");
        if filter.offset.is_some() {
            sql.push_str(" OFFSET ?");
        }

        let mut query = sqlx::query(&sql);
        for status in &filter.statuses {
            query = query.bind(status.as_str());
        }
        query = query.bind(limit);
        if let Some(offset) = filter.offset {
            query = query.bind(offset);
        }

        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(row_to_sync_job).collect()
    }

    /// The single sync currently queued or running, if any. Enforces the
    /// one-active-sync-at-a-time invariant at the query layer.
    pub async fn get_active_sync_job(&self) -> Result<Option<SyncJob>, AppError> {
        let row = sqlx::query("SELECT * FROM sync_jobs WHERE status IN ('queued', 'running') ORDER BY created_at ASC LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_sync_job).transpose()
    }

    /// Count of syncs currently queued or running. Invariant 4 in the
    /// spec requires this never exceed 1 for `running` alone, but the
    /// gatekeeper and recovery both care about queued-or-running.
    pub async fn count_active_sync_jobs(&self) -> Result<i64, AppError> {
        let row = sqlx::query("SELECT COUNT(*) as n FROM sync_jobs WHERE status IN ('queued', 'running')")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get::<i64, _>("n"))
    }

    /// Sync rows left `Running` by an unclean shutdown.
    pub async fn list_recoverable_sync_jobs(&self) -> Result<Vec<SyncJob>, AppError> {
        let rows = sqlx::query("SELECT * FROM sync_jobs WHERE status = 'running'")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_sync_job).collect()
    }

    /// Counts of sync jobs grouped by status, for introspection/metrics.
    pub async fn sync_job_summary(&self) -> Result<Vec<(SyncStatus, i64)>, AppError> {
        let rows = sqlx::query("SELECT status, COUNT(*) as n FROM sync_jobs GROUP BY status")
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| {
                let status: String = row.get("status");
                let status = status.parse::<SyncStatus>().map_err(AppError::Internal)?;
                Ok((status, row.get::<i64, _>("n")))
            })
            .collect()
    }

    // --- Key/value -------------------------------------------------------

    pub async fn get_kv(&self, key: &str) -> Result<Option<String>, AppError> {
        let row = sqlx::query("SELECT value FROM kv_store WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get::<String, _>("value")))
    }

    pub async fn set_kv(&self, key: &str, value: &str) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO kv_store (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, AppError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| AppError::Internal(format!("corrupt timestamp {s}: {e}")))
}

fn parse_optional_datetime(s: Option<String>) -> Result<Option<DateTime<Utc>>, AppError> {
    s.map(|s| parse_datetime(&s)).transpose()
}

fn row_to_job(row: &sqlx::sqlite::SqliteRow) -> Result<Job, AppError> {
    let status_str: String = row.get("status");
    let tags_str: String = row.get("tags");
    let tuning_str: String = row.get("tuning");
    let progress_str: String = row.get("progress");
    let metadata_str: String = row.get("metadata");
    let file_size_bytes: Option<i64> = row.get("file_size_bytes");

    Ok(Job {
        id: Uuid::parse_str(&row.get::<String, _>("id"))
            .map_err(|e| AppError::Internal(format!("corrupt job id: {e}")))?,
        source_path: row.get("source_path"),
        dest_path: row.get("dest_path"),
        status: status_str.parse().map_err(AppError::Internal)?,
        priority: row.get("priority"),
        category: row.get("category"),
        tags: serde_json::from_str(&tags_str)?,
        file_size_bytes: file_size_bytes.map(|v| v as u64),
        tuning: serde_json::from_str(&tuning_str)?,
        progress: serde_json::from_str(&progress_str)?,
        retries: row.get::<i64, _>("retries") as u32,
        max_retries: row.get::<i64, _>("max_retries") as u32,
        last_error: row.get("last_error"),
        metadata: serde_json::from_str(&metadata_str)?,
        created_at: parse_datetime(&row.get::<String, _>("created_at"))?,
        updated_at: parse_datetime(&row.get::<String, _>("updated_at"))?,
        started_at: parse_optional_datetime(row.get("started_at"))?,
        completed_at: parse_optional_datetime(row.get("completed_at"))?,
    })
}

fn row_to_attempt(row: &sqlx::sqlite::SqliteRow) -> Result<JobAttempt, AppError> {
    let status_str: String = row.get("status");
    Ok(JobAttempt {
        id: Uuid::parse_str(&row.get::<String, _>("id"))
            .map_err(|e| AppError::Internal(format!("corrupt attempt id: {e}")))?,
        job_id: Uuid::parse_str(&row.get::<String, _>("job_id"))
            .map_err(|e| AppError::Internal(format!("corrupt job id: {e}")))?,
        attempt_num: row.get::<i64, _>("attempt_num") as u32,
        status: status_str.parse::<AttemptStatus>().map_err(AppError::Internal)?,
        log: row.get("log"),
        error: row.get("error"),
        started_at: parse_datetime(&row.get::<String, _>("started_at"))?,
        finished_at: parse_optional_datetime(row.get("finished_at"))?,
    })
}

fn row_to_sync_job(row: &sqlx::sqlite::SqliteRow) -> Result<SyncJob, AppError> {
    let status_str: String = row.get("status");
    let stats_str: String = row.get("stats");
    let progress_str: String = row.get("progress");
    let stats: SyncStats = serde_json::from_str(&stats_str)?;

    Ok(SyncJob {
        id: Uuid::parse_str(&row.get::<String, _>("id"))
            .map_err(|e| AppError::Internal(format!("corrupt sync id: {e}")))?,
        remote_path: row.get("remote_path"),
        local_path: row.get("local_path"),
        status: status_str.parse::<SyncStatus>().map_err(AppError::Internal)?,
        rclone_job_id: row.get("rclone_job_id"),
        progress: serde_json::from_str(&progress_str)?,
        stats,
        last_error: row.get("last_error"),
        created_at: parse_datetime(&row.get::<String, _>("created_at"))?,
        updated_at: parse_datetime(&row.get::<String, _>("updated_at"))?,
        started_at: parse_optional_datetime(row.get("started_at"))?,
        completed_at: parse_optional_datetime(row.get("completed_at"))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::migrate;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn test_repo() -> Repository {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        migrate(&pool).await.unwrap();
        Repository::new(pool)
    }

    #[tokio::test]
    async fn create_and_get_job_round_trips() {
        let repo = test_repo().await;
        let job = Job::new("src".into(), "dst".into(), 3);
        repo.create_job(&job).await.unwrap();

        let loaded = repo.get_job(job.id).await.unwrap();
        assert_eq!(loaded.id, job.id);
        assert_eq!(loaded.status, JobStatus::Queued);
        assert_eq!(loaded.source_path, "src");
        assert_eq!(loaded.priority, 0);
    }

    #[tokio::test]
    async fn get_missing_job_is_not_found() {
        let repo = test_repo().await;
        let err = repo.get_job(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn update_job_persists_status_transition() {
        let repo = test_repo().await;
        let mut job = Job::new("src".into(), "dst".into(), 3);
        repo.create_job(&job).await.unwrap();

        job.mark_running(Utc::now());
        repo.update_job(&job).await.unwrap();

        let loaded = repo.get_job(job.id).await.unwrap();
        assert_eq!(loaded.status, JobStatus::Running);
        assert!(loaded.started_at.is_some());
    }

    #[tokio::test]
    async fn list_jobs_filters_by_status() {
        let repo = test_repo().await;
        let mut running = Job::new("a".into(), "b".into(), 3);
        running.mark_running(Utc::now());
        repo.create_job(&running).await.unwrap();
        repo.create_job(&Job::new("c".into(), "d".into(), 3)).await.unwrap();

        let filter = JobFilter {
            statuses: vec![JobStatus::Running],
            ..Default::default()
        };
        let jobs = repo.list_jobs(&filter).await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].status, JobStatus::Running);
    }

    #[tokio::test]
    async fn list_jobs_orders_by_priority_desc_by_default() {
        let repo = test_repo().await;
        repo.create_job(&Job::with_priority("low".into(), "d".into(), 3, 1))
            .await
            .unwrap();
        repo.create_job(&Job::with_priority("high".into(), "d".into(), 3, 9))
            .await
            .unwrap();
        repo.create_job(&Job::with_priority("mid".into(), "d".into(), 3, 5))
            .await
            .unwrap();

        let jobs = repo.list_jobs(&JobFilter::default()).await.unwrap();
        let priorities: Vec<i32> = jobs.iter().map(|j| j.priority).collect();
        assert_eq!(priorities, vec![9, 5, 1]);
    }

    #[tokio::test]
    async fn list_jobs_respects_priority_bounds() {
        let repo = test_repo().await;
        repo.create_job(&Job::with_priority("a".into(), "d".into(), 3, 1))
            .await
            .unwrap();
        repo.create_job(&Job::with_priority("b".into(), "d".into(), 3, 5))
            .await
            .unwrap();
        repo.create_job(&Job::with_priority("c".into(), "d".into(), 3, 10))
            .await
            .unwrap();

        let filter = JobFilter {
            min_priority: Some(2),
            max_priority: Some(9),
            ..Default::default()
        };
        let jobs = repo.list_jobs(&filter).await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].priority, 5);
    }

    #[tokio::test]
    async fn list_jobs_clamps_limit_to_max() {
        let repo = test_repo().await;
        let filter = JobFilter {
            limit: Some(5000),
            ..Default::default()
        };
        // Just exercising that an oversized limit doesn't error; with no
        // rows present the result is empty either way.
        let jobs = repo.list_jobs(&filter).await.unwrap();
        assert!(jobs.is_empty());
    }

    #[tokio::test]
    async fn attempts_are_listed_in_order() {
        let repo = test_repo().await;
        let job = Job::new("src".into(), "dst".into(), 3);
        repo.create_job(&job).await.unwrap();

        let a1 = JobAttempt::start(job.id, 1, Utc::now());
        let a2 = JobAttempt::start(job.id, 2, Utc::now());
        repo.create_attempt(&a1).await.unwrap();
        repo.create_attempt(&a2).await.unwrap();

        let attempts = repo.list_attempts(job.id).await.unwrap();
        assert_eq!(attempts.len(), 2);
        assert_eq!(attempts[0].attempt_num, 1);
        assert_eq!(attempts[1].attempt_num, 2);
    }

    #[tokio::test]
    async fn kv_set_then_get_round_trips() {
        let repo = test_repo().await;
        repo.set_kv("foo", "bar").await.unwrap();
        assert_eq!(repo.get_kv("foo").await.unwrap(), Some("bar".to_string()));
        repo.set_kv("foo", "baz").await.unwrap();
        assert_eq!(repo.get_kv("foo").await.unwrap(), Some("baz".to_string()));
    }

    #[tokio::test]
    async fn active_sync_job_enforces_single_slot_visibility() {
        let repo = test_repo().await;
        assert!(repo.get_active_sync_job().await.unwrap().is_none());
        assert_eq!(repo.count_active_sync_jobs().await.unwrap(), 0);

        let sync = SyncJob::new("seedbox:library".to_string(), "/data/library".to_string());
        repo.create_sync_job(&sync).await.unwrap();
        let active = repo.get_active_sync_job().await.unwrap();
        assert_eq!(active.unwrap().id, sync.id);
        assert_eq!(repo.count_active_sync_jobs().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn sync_job_round_trips_rclone_job_id_and_progress() {
        let repo = test_repo().await;
        let mut sync = SyncJob::new("seedbox:library".to_string(), "/data/library".to_string());
        repo.create_sync_job(&sync).await.unwrap();

        sync.mark_started(99, Utc::now());
        sync.progress.bytes = 1024;
        repo.update_sync_job(&sync).await.unwrap();

        let loaded = repo.get_sync_job(sync.id).await.unwrap();
        assert_eq!(loaded.rclone_job_id, Some(99));
        assert_eq!(loaded.progress.bytes, 1024);
    }

    #[tokio::test]
    async fn list_recoverable_sync_jobs_finds_only_running() {
        let repo = test_repo().await;
        let queued = SyncJob::new("seedbox:a".to_string(), "/data/a".to_string());
        let mut running = SyncJob::new("seedbox:b".to_string(), "/data/b".to_string());
        running.mark_started(1, Utc::now());
        repo.create_sync_job(&queued).await.unwrap();
        repo.create_sync_job(&running).await.unwrap();

        let recoverable = repo.list_recoverable_sync_jobs().await.unwrap();
        assert_eq!(recoverable.len(), 1);
        assert_eq!(recoverable[0].id, running.id);
    }

    #[tokio::test]
    async fn job_summary_counts_by_status() {
        let repo = test_repo().await;
        repo.create_job(&Job::new("a".into(), "b".into(), 3)).await.unwrap();
        repo.create_job(&Job::new("c".into(), "d".into(), 3)).await.unwrap();
        let mut running = Job::new("e".into(), "f".into(), 3);
        running.mark_running(Utc::now());
        repo.create_job(&running).await.unwrap();

        let summary = repo.job_summary().await.unwrap();
        let queued_count = summary
            .iter()
            .find(|(status, _)| *status == JobStatus::Queued)
            .map(|(_, n)| *n)
            .unwrap_or(0);
        let running_count = summary
            .iter()
            .find(|(status, _)| *status == JobStatus::Running)
            .map(|(_, n)| *n)
            .unwrap_or(0);
        assert_eq!(queued_count, 2);
        assert_eq!(running_count, 1);
    }

    #[tokio::test]
    async fn sync_job_summary_counts_by_status() {
        let repo = test_repo().await;
        repo.create_sync_job(&SyncJob::new("a".into(), "/a".into())).await.unwrap();
        let mut running = SyncJob::new("b".into(), "/b".into());
        running.mark_started(1, Utc::now());
        repo.create_sync_job(&running).await.unwrap();

        let summary = repo.sync_job_summary().await.unwrap();
        let queued_count = summary
            .iter()
            .find(|(status, _)| *status == SyncStatus::Queued)
            .map(|(_, n)| *n)
            .unwrap_or(0);
        let running_count = summary
            .iter()
            .find(|(status, _)| *status == SyncStatus::Running)
            .map(|(_, n)| *n)
            .unwrap_or(0);
        assert_eq!(queued_count, 1);
        assert_eq!(running_count, 1);
    }
}
